//! # kite
//!
//! The request-dispatch core of a small HTTP framework.
//!
//! Three pieces do the work:
//!
//! - **Routing.** Patterns such as `/users/{id:\d+}[/{tab}]` compile to
//!   anchored regular expressions. Within a method the first registered
//!   route that matches the whole path wins, and named routes can be turned
//!   back into URLs.
//! - **Middleware.** Each request runs through a queue of middleware. Any
//!   unit may answer on its own or delegate to the rest of the queue through
//!   [`Next`](middleware::Next). Units may be given by container id and are
//!   only resolved when the request reaches them.
//! - **Argument resolution.** Handlers declare their parameters; each one is
//!   filled from the route variables, then the service [`Container`], then
//!   its default, in that order.
//!
//! Parsing HTTP is left to hyper. TLS and process supervision belong to
//! whatever sits in front of the server.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::Method;
//! use kite::{App, Arguments, Container, Parameter, Request, Route, RouteCollector, Server, handler};
//!
//! struct Greeter { greeting: &'static str }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kite::Error> {
//!     let mut services = Container::new();
//!     services.instance(Greeter { greeting: "hello" });
//!
//!     let routes = RouteCollector::new()
//!         .add(Route::new(
//!             Method::GET,
//!             "/hello/{name}",
//!             handler::with_params([Parameter::of::<Greeter>("greeter"), Parameter::new("name")], greet),
//!         ).name("hello"))?
//!         .build()?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(App::new(routes, services)).await
//! }
//!
//! async fn greet(_req: Request, args: Arguments) -> String {
//!     let greeter = args.get::<Greeter>("greeter");
//!     let name = args.str("name").unwrap_or("stranger");
//!     format!("{} {name}", greeter.map(|g| g.greeting).unwrap_or("hi"))
//! }
//! ```

mod app;
mod config;
mod container;
mod error;
mod pattern;
mod request;
mod resolver;
mod response;
mod router;
mod server;

pub mod handler;
pub mod middleware;

pub use app::App;
pub use config::AppConfig;
pub use container::{Container, Key, Scope, Service, ServiceLookup, ServiceLookupExt, TypeKey};
pub use error::{Error, MalformedPattern, NotFound, PatternErrorKind, UnresolvedParameter};
pub use handler::{Handler, Target};
pub use pattern::{CompiledPattern, Params, Segment, Variable, compile, compile_variants};
pub use request::Request;
pub use resolver::{Arguments, Parameter, ResolutionContext, Resolver, TypeSpec};
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use router::{Dispatch, Route, RouteCollector, RouteEntry, RouteMatch, RouteTable, Router};
pub use server::Server;
