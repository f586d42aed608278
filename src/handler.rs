//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! Routes hold handlers of *different* concrete types in one table, so every
//! handler is erased to `Arc<dyn ErasedHandler>` at registration time. The
//! erased form also carries the handler's declared parameters, which the
//! terminal middleware feeds to the [`Resolver`](crate::Resolver) before the
//! call:
//!
//! ```text
//! async fn show(req: Request) -> Response { … }    ← plain handler, no parameters
//! handler::with_params([...], show_post)           ← handler with declared parameters
//!        ↓ into_boxed_handler()
//! Arc<dyn ErasedHandler>                           ← stored in the route / container
//!        ↓ Resolver::resolve(parameters)           ← once per request
//! handler.call(req, args)                          ← one vtable dispatch
//!        ↓
//! Box::pin(async { show_post(req, args).await.into_response() })
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::resolver::{Arguments, Parameter};
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` lets tokio move the future across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    /// Identifies the handler in error messages.
    fn name(&self) -> &str;

    fn parameters(&self) -> &[Parameter];

    fn call(&self, req: Request, args: Arguments) -> BoxFuture<Response>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied by any `async fn(Request) -> impl IntoResponse`, and by
/// handlers built with [`with_params`]. The trait is sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn name(&self) -> &str { std::any::type_name::<F>() }

    fn parameters(&self) -> &[Parameter] { &[] }

    fn call(&self, req: Request, _args: Arguments) -> BoxFuture<Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// A handler together with its declared parameter list. Build with
/// [`with_params`].
pub struct WithParams<F> {
    name: String,
    parameters: Vec<Parameter>,
    f: F,
}

impl<F> WithParams<F> {
    /// Overrides the name used in resolution errors (defaults to the
    /// function's type name).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Declares the parameters `f` expects, so each call receives them resolved.
///
/// ```rust
/// use kite::{Arguments, Parameter, Request, handler};
///
/// struct Mailer;
///
/// async fn send(_req: Request, args: Arguments) -> String {
///     let to = args.str("to").unwrap_or("nobody");
///     let _mailer = args.get::<Mailer>("mailer");
///     format!("sent to {to}")
/// }
///
/// let h = handler::with_params(
///     [Parameter::new("to"), Parameter::of::<Mailer>("mailer").optional()],
///     send,
/// );
/// ```
pub fn with_params<F, Fut, R>(parameters: impl IntoIterator<Item = Parameter>, f: F) -> WithParams<F>
where
    F: Fn(Request, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    WithParams {
        name: std::any::type_name::<F>().to_owned(),
        parameters: parameters.into_iter().collect(),
        f,
    }
}

impl<F> private::Sealed for WithParams<F> {}

impl<F, Fut, R> Handler for WithParams<F>
where
    F: Fn(Request, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

impl<F, Fut, R> ErasedHandler for WithParams<F>
where
    F: Fn(Request, Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn name(&self) -> &str { &self.name }

    fn parameters(&self) -> &[Parameter] { &self.parameters }

    fn call(&self, req: Request, args: Arguments) -> BoxFuture<Response> {
        let fut = (self.f)(req, args);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── Route targets ─────────────────────────────────────────────────────────────

/// What a route points at: a handler, or the name of one registered in the
/// container and looked up when a request arrives.
#[derive(Clone)]
pub enum Target {
    Handler(BoxedHandler),
    Named(String),
}

impl Target {
    pub fn handler(handler: impl Handler) -> Self {
        Self::Handler(handler.into_boxed_handler())
    }

    pub fn named(id: impl Into<String>) -> Self {
        Self::Named(id.into())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(h) => f.debug_tuple("Handler").field(&h.name()).finish(),
            Self::Named(id) => f.debug_tuple("Named").field(id).finish(),
        }
    }
}
