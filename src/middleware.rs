//! Middleware pipeline.
//!
//! A [`Pipeline`] is a per-request queue of middleware, consumed strictly
//! front to back. [`Pipeline::handle`] pops one unit, resolves it if it was
//! only given by name, and calls it with the rest of the queue as [`Next`].
//! A middleware either answers on its own (the chain stops there) or calls
//! `next.run(req)` and gets the response of everything behind it, which it
//! may still adjust:
//!
//! ```rust
//! use kite::middleware::{self, Next};
//! use kite::Request;
//!
//! let stamp = middleware::from_fn(|req: Request, next: Next| async move {
//!     let mut res = next.run(req).await?;
//!     res.set_header("x-served-by", "kite");
//!     Ok(res)
//! });
//! ```
//!
//! The last unit must produce a response without delegating; the app always
//! appends a [`Terminal`] that calls the route handler. Running out of units
//! is [`Error::PipelineExhausted`].

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::container::{ServiceLookup, ServiceLookupExt};
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Target};
use crate::request::Request;
use crate::resolver::{ResolutionContext, Resolver};
use crate::response::Response;

/// A unit of the request-processing chain.
pub trait Middleware: Send + Sync + 'static {
    fn process(&self, req: Request, next: Next) -> BoxFuture<Result<Response, Error>>;
}

/// A resolved middleware, shareable across requests.
pub type SharedMiddleware = Arc<dyn Middleware>;

// ── from_fn ───────────────────────────────────────────────────────────────────

/// Middleware from an async closure.
pub struct FromFn<F>(F);

pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    FromFn(f)
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    fn process(&self, req: Request, next: Next) -> BoxFuture<Result<Response, Error>> {
        Box::pin((self.0)(req, next))
    }
}

// ── Units ─────────────────────────────────────────────────────────────────────

/// A middleware ready to run, or the container name of one.
#[derive(Clone)]
pub enum MiddlewareUnit {
    Resolved(SharedMiddleware),
    Lazy(String),
}

impl MiddlewareUnit {
    pub fn new(middleware: impl Middleware) -> Self {
        Self::Resolved(Arc::new(middleware))
    }

    pub fn lazy(id: impl Into<String>) -> Self {
        Self::Lazy(id.into())
    }

    fn resolve(self, services: &dyn ServiceLookup) -> Result<SharedMiddleware, Error> {
        match self {
            Self::Resolved(mw) => Ok(mw),
            Self::Lazy(id) => {
                trace!(middleware = %id, "resolving");
                services
                    .resolve_named::<SharedMiddleware>(&id)
                    .map(|mw| Arc::clone(&*mw))
                    .map_err(|e| {
                        // Present but not a middleware: no underlying cause.
                        let source = if services.has(&e.key) { None } else { Some(e) };
                        Error::MiddlewareResolution { id, source }
                    })
            }
        }
    }
}

impl fmt::Debug for MiddlewareUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(_) => f.write_str("Resolved(..)"),
            Self::Lazy(id) => f.debug_tuple("Lazy").field(id).finish(),
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// The per-request middleware queue.
pub struct Pipeline {
    units: VecDeque<MiddlewareUnit>,
    services: Arc<dyn ServiceLookup>,
}

impl Pipeline {
    pub fn new(services: Arc<dyn ServiceLookup>) -> Self {
        Self { units: VecDeque::new(), services }
    }

    pub fn push(&mut self, middleware: impl Middleware) -> &mut Self {
        self.units.push_back(MiddlewareUnit::new(middleware));
        self
    }

    /// Appends a middleware the container will supply when its turn comes.
    pub fn push_lazy(&mut self, id: impl Into<String>) -> &mut Self {
        self.units.push_back(MiddlewareUnit::lazy(id));
        self
    }

    pub fn prepend(&mut self, middleware: impl Middleware) -> &mut Self {
        self.units.push_front(MiddlewareUnit::new(middleware));
        self
    }

    pub fn prepend_lazy(&mut self, id: impl Into<String>) -> &mut Self {
        self.units.push_front(MiddlewareUnit::lazy(id));
        self
    }

    pub fn push_unit(&mut self, unit: MiddlewareUnit) -> &mut Self {
        self.units.push_back(unit);
        self
    }

    /// Remaining units, front first.
    pub fn units(&self) -> impl Iterator<Item = &MiddlewareUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize { self.units.len() }

    pub fn is_empty(&self) -> bool { self.units.is_empty() }

    pub fn services(&self) -> &Arc<dyn ServiceLookup> { &self.services }

    /// Runs the front unit with the rest of the pipeline as its `next`.
    pub fn handle(mut self, req: Request) -> BoxFuture<Result<Response, Error>> {
        Box::pin(async move {
            let unit = self.units.pop_front().ok_or(Error::PipelineExhausted)?;
            let middleware = unit.resolve(&*self.services)?;
            trace!(remaining = self.units.len(), "middleware");
            middleware.process(req, Next { pipeline: self }).await
        })
    }

    /// Appends `terminal` and runs the whole chain.
    pub async fn execute(mut self, terminal: impl Middleware, req: Request) -> Result<Response, Error> {
        self.push(terminal);
        self.handle(req).await
    }
}

impl Extend<MiddlewareUnit> for Pipeline {
    fn extend<I: IntoIterator<Item = MiddlewareUnit>>(&mut self, iter: I) {
        self.units.extend(iter);
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("units", &self.units).finish()
    }
}

/// The rest of the chain, handed to each middleware. Consumed by `run`, so
/// it can be invoked at most once.
pub struct Next {
    pipeline: Pipeline,
}

impl Next {
    pub fn run(self, req: Request) -> BoxFuture<Result<Response, Error>> {
        self.pipeline.handle(req)
    }

    /// Units left behind this one.
    pub fn remaining(&self) -> usize { self.pipeline.len() }

    pub fn services(&self) -> &Arc<dyn ServiceLookup> { self.pipeline.services() }
}

// ── Terminal ──────────────────────────────────────────────────────────────────

/// The last unit of every routed request: resolves the handler's declared
/// parameters and calls it. Never delegates.
pub struct Terminal {
    target: Target,
    explicit: ResolutionContext,
}

impl Terminal {
    pub fn new(target: Target, explicit: ResolutionContext) -> Self {
        Self { target, explicit }
    }
}

impl Middleware for Terminal {
    fn process(&self, req: Request, next: Next) -> BoxFuture<Result<Response, Error>> {
        let services = Arc::clone(next.services());
        let target = self.target.clone();
        let explicit = self.explicit.clone();

        Box::pin(async move {
            let handler: BoxedHandler = match target {
                Target::Handler(h) => h,
                Target::Named(id) => match services.resolve_named::<BoxedHandler>(&id) {
                    Ok(h) => Arc::clone(&*h),
                    Err(e) => return Err(Error::UnresolvedHandler { id, source: Some(e) }),
                },
            };
            let args = Resolver::new(&*services)
                .resolve(handler.name(), handler.parameters(), &explicit)?;
            debug!(handler = handler.name(), args = args.len(), "calling handler");
            Ok(handler.call(req, args).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::{Method, StatusCode, Uri};

    use super::*;
    use crate::container::Container;
    use crate::resolver::{Arguments, Parameter};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn request() -> Request {
        Request::new(Method::GET, Uri::from_static("/"))
    }

    fn services() -> Arc<dyn ServiceLookup> {
        Arc::new(Container::new())
    }

    fn passing(log: &Log, tag: &'static str) -> impl Middleware {
        let log = Arc::clone(log);
        from_fn(move |req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(tag);
                let mut res = next.run(req).await?;
                res.append_header("x-trail", tag);
                Ok(res)
            }
        })
    }

    fn answering(log: &Log, tag: &'static str) -> impl Middleware {
        let log = Arc::clone(log);
        from_fn(move |_req: Request, _next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(tag);
                Ok(Response::text(tag))
            }
        })
    }

    #[tokio::test]
    async fn short_circuit_stops_the_chain() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(services());
        pipeline
            .push(passing(&log, "a"))
            .push(answering(&log, "b"))
            .push(answering(&log, "c"));

        let res = pipeline.handle(request()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), ["a", "b"]);
        assert_eq!(res.body(), b"b");
        assert_eq!(res.header("x-trail"), Some("a"));
    }

    #[tokio::test]
    async fn units_run_front_to_back_and_unwind_in_reverse() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(services());
        pipeline.push(passing(&log, "b")).push(answering(&log, "end"));
        pipeline.prepend(passing(&log, "a"));

        let res = pipeline.handle(request()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), ["a", "b", "end"]);
        let trail: Vec<_> = res.headers().iter()
            .filter(|(k, _)| k == "x-trail")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(trail, ["b", "a"]);
    }

    #[tokio::test]
    async fn empty_pipeline_is_exhausted() {
        let err = Pipeline::new(services()).handle(request()).await.unwrap_err();
        assert!(matches!(err, Error::PipelineExhausted));
    }

    #[tokio::test]
    async fn delegating_past_the_end_is_exhausted() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(services());
        pipeline.push(passing(&log, "only"));
        let err = pipeline.handle(request()).await.unwrap_err();
        assert!(matches!(err, Error::PipelineExhausted));
    }

    #[tokio::test]
    async fn lazy_units_come_from_the_container() {
        let log = Log::default();
        let mut container = Container::new();
        container.middleware("auth", answering(&log, "auth"));

        let mut pipeline = Pipeline::new(Arc::new(container));
        pipeline.push_lazy("auth");
        assert!(matches!(pipeline.units().next(), Some(MiddlewareUnit::Lazy(id)) if id == "auth"));

        let res = pipeline.handle(request()).await.unwrap();
        assert_eq!(res.body(), b"auth");
    }

    #[tokio::test]
    async fn unknown_lazy_unit_is_a_resolution_error() {
        let mut pipeline = Pipeline::new(services());
        pipeline.push_lazy("missing");
        let err = pipeline.handle(request()).await.unwrap_err();
        assert!(matches!(err, Error::MiddlewareResolution { ref id, source: Some(_) } if id == "missing"));
    }

    #[tokio::test]
    async fn lazy_unit_of_the_wrong_type_is_a_resolution_error() {
        let mut container = Container::new();
        container.named("auth", 5u8);
        let mut pipeline = Pipeline::new(Arc::new(container));
        pipeline.push_lazy("auth");
        let err = pipeline.handle(request()).await.unwrap_err();
        assert!(matches!(err, Error::MiddlewareResolution { source: None, .. }));
    }

    #[tokio::test]
    async fn terminal_resolves_declared_parameters() {
        struct Greeting(&'static str);
        let mut container = Container::new();
        container.instance(Greeting("hello"));

        let handler = crate::handler::with_params(
            [Parameter::of::<Greeting>("greeting"), Parameter::new("name")],
            |_req: Request, args: Arguments| async move {
                let greeting = args.get::<Greeting>("greeting").map(|g| g.0).unwrap_or("?");
                format!("{greeting} {}", args.str("name").unwrap_or("?"))
            },
        );
        let mut explicit = ResolutionContext::new();
        explicit.insert("name", String::from("ada"));

        let res = Pipeline::new(Arc::new(container))
            .execute(Terminal::new(Target::handler(handler), explicit), request())
            .await
            .unwrap();
        assert_eq!(res.body(), b"hello ada");
    }

    #[tokio::test]
    async fn terminal_reports_unresolved_parameters() {
        struct Missing;
        let handler = crate::handler::with_params(
            [Parameter::of::<Missing>("missing")],
            |_req: Request, _args: Arguments| async { StatusCode::OK },
        ).named("reports::show");

        let err = Pipeline::new(services())
            .execute(Terminal::new(Target::handler(handler), ResolutionContext::new()), request())
            .await
            .unwrap_err();
        match err {
            Error::UnresolvedParameter(e) => {
                assert_eq!(e.parameter, "missing");
                assert_eq!(e.target, "reports::show");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn terminal_looks_up_named_handlers() {
        async fn ping(_req: Request) -> &'static str { "pong" }
        let mut container = Container::new();
        container.handler("ping", ping);

        let res = Pipeline::new(Arc::new(container))
            .execute(Terminal::new(Target::named("ping"), ResolutionContext::new()), request())
            .await
            .unwrap();
        assert_eq!(res.body(), b"pong");

        let err = Pipeline::new(services())
            .execute(Terminal::new(Target::named("ping"), ResolutionContext::new()), request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedHandler { .. }));
    }
}
