//! The application: dispatch, pipeline assembly and response coercion for
//! one request at a time.
//!
//! An [`App`] is an explicit value owned by whoever serves it. Nothing here
//! is global; two apps in one process do not see each other.
//!
//! For a matched route the pipeline is the route's own middleware, then the
//! app-wide middleware, then a [`Terminal`] that resolves the handler's
//! parameters and calls it. Unmatched requests run the app-wide middleware
//! in front of a terminal that answers `404` or `405`.

use std::sync::Arc;

use http::{Method, StatusCode};
use tracing::{debug, error, warn};

use crate::config::AppConfig;
use crate::container::{Key, Scope, Service, ServiceLookup};
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, MiddlewareUnit, Next, Pipeline, Terminal};
use crate::pattern::Segment;
use crate::request::Request;
use crate::resolver::ResolutionContext;
use crate::response::{IntoResponse, Response};
use crate::router::{Dispatch, RouteEntry, RouteTable, Router};

/// One application: its routes, its services, its app-wide middleware and
/// its configuration.
///
/// Built once at startup and shared by reference across every request; see
/// [`Server::serve`](crate::Server::serve). Requests never mutate it, so no
/// lock sits on the request path. The route table can still be swapped
/// through [`router`](App::router).
pub struct App {
    router: Arc<Router>,
    services: Arc<dyn ServiceLookup>,
    middleware: Vec<MiddlewareUnit>,
    config: AppConfig,
}

impl App {
    /// An app serving `table`, resolving handler arguments and lazy
    /// middleware from `services`, with the default [`AppConfig`].
    ///
    /// Path normalisation is on by default; routes it makes unreachable are
    /// logged with `warn!`.
    pub fn new(table: RouteTable, services: impl ServiceLookup + 'static) -> Self {
        let app = Self {
            router: Arc::new(Router::new(table)),
            services: Arc::new(services),
            middleware: Vec::new(),
            config: AppConfig::default(),
        };
        app.warn_unreachable();
        app
    }

    /// Replaces the configuration. Turning normalisation on re-checks the
    /// routes for ones it makes unreachable.
    pub fn with_config(mut self, config: AppConfig) -> Self {
        let recheck = config.normalize_paths && !self.config.normalize_paths;
        self.config = config;
        if recheck {
            self.warn_unreachable();
        }
        self
    }

    fn warn_unreachable(&self) {
        if !self.config.normalize_paths {
            return;
        }
        let table = self.router.table();
        for pattern in unreachable_when_normalized(&table) {
            warn!(route = pattern, "route has an empty or trailing path segment; normalised paths never match it");
        }
    }

    /// Adds middleware that runs for every request, after any route middleware.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(MiddlewareUnit::new(middleware));
        self
    }

    /// Like [`middleware`](App::middleware), resolved from the container by
    /// `id` when a request reaches it.
    pub fn lazy_middleware(mut self, id: &str) -> Self {
        self.middleware.push(MiddlewareUnit::lazy(id));
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &AppConfig { &self.config }

    /// The routing handle, for swapping in a rebuilt table.
    pub fn router(&self) -> &Arc<Router> { &self.router }

    /// The shared registry every request scope sits in front of.
    pub fn services(&self) -> &Arc<dyn ServiceLookup> { &self.services }

    /// Processes one request to completion.
    ///
    /// Never fails: configuration errors surfacing mid-request are logged and
    /// answered with `500`.
    pub async fn handle(&self, mut req: Request) -> Response {
        let path = if self.config.normalize_paths {
            normalize(req.path())
        } else {
            req.path().to_owned()
        };

        let result = match self.router.dispatch(req.method(), &path) {
            Dispatch::Found(matched) => {
                debug!(method = %req.method(), path = %path, route = matched.route.declared(), "dispatch");

                let mut scope = Scope::new(Arc::clone(&self.services));
                scope.insert(matched.params.clone());
                scope.insert_service(Key::of::<RouteEntry>(), Arc::clone(&matched.route) as Service);

                let explicit = ResolutionContext::from(&matched.params);
                let terminal = Terminal::new(matched.route.target().clone(), explicit);

                let mut pipeline = Pipeline::new(Arc::new(scope));
                pipeline.extend(matched.route.middleware().iter().cloned());
                pipeline.extend(self.middleware.iter().cloned());

                req.set_params(matched.params);
                pipeline.execute(terminal, req).await
            }
            Dispatch::NotFound => {
                debug!(method = %req.method(), path = %path, "no route");
                self.unrouted(Unrouted { allow: None }, req).await
            }
            Dispatch::MethodNotAllowed(allowed) => {
                debug!(method = %req.method(), path = %path, ?allowed, "method not allowed");
                self.unrouted(Unrouted { allow: Some(allowed) }, req).await
            }
        };

        let mut res = result.unwrap_or_else(|e| {
            error!(error = %e, "request aborted");
            e.into_response()
        });
        if let Some(v) = self.config.powered_by.as_deref().filter(|v| !v.is_empty()) {
            res.set_header("x-powered-by", v);
        }
        res
    }

    async fn unrouted(&self, terminal: Unrouted, req: Request) -> Result<Response, Error> {
        let mut pipeline = Pipeline::new(Arc::clone(&self.services));
        pipeline.extend(self.middleware.iter().cloned());
        pipeline.execute(terminal, req).await
    }

    /// Builds the URL of the route called `name`.
    ///
    /// When no route can be built from `params`, falls back to
    /// `web_root + name`, with `params` as the query string.
    pub fn url(&self, name: &str, params: &[(&str, &str)], method: &Method) -> String {
        if let Some(url) = self.router.build_url(name, method, params) {
            return url;
        }
        let mut url = format!("{}{}", self.config.web_root, name);
        if !params.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

/// Terminal for requests no route matched.
struct Unrouted {
    allow: Option<Vec<Method>>,
}

impl Middleware for Unrouted {
    fn process(&self, _req: Request, _next: Next) -> BoxFuture<Result<Response, Error>> {
        let res = match &self.allow {
            None => Response::status(StatusCode::NOT_FOUND),
            Some(methods) => {
                let allow = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                Response::builder()
                    .status(StatusCode::METHOD_NOT_ALLOWED)
                    .header("allow", &allow)
                    .no_body()
            }
        };
        Box::pin(async move { Ok(res) })
    }
}

/// Declared patterns that no normalised path can match: a literal holding
/// an empty segment, or a trailing slash on anything but the root.
fn unreachable_when_normalized(table: &RouteTable) -> Vec<&str> {
    table.entries().iter()
        .filter(|entry| {
            let pattern = entry.pattern();
            let segments = pattern.segments();
            let empty = segments.iter()
                .any(|s| matches!(s, Segment::Literal(text) if text.contains("//")));
            let trailing = pattern.source() != "/"
                && matches!(segments.last(), Some(Segment::Literal(text)) if text.ends_with('/'));
            empty || trailing
        })
        .map(|entry| entry.pattern().source())
        .collect()
}

/// Collapses empty segments: `//a///b/` becomes `/a/b`.
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_and_empty_segments_are_reported() {
        async fn ok(_req: Request) -> &'static str { "ok" }
        let table = crate::router::RouteCollector::new()
            .get("/", ok).unwrap()
            .get("/users/", ok).unwrap()
            .get("/a//b", ok).unwrap()
            .get("/users/{id}", ok).unwrap()
            .get("/files/{name}/", ok).unwrap()
            .build().unwrap();
        assert_eq!(unreachable_when_normalized(&table), ["/users/", "/a//b", "/files/{name}/"]);
    }

    #[test]
    fn normalize_collapses_empty_segments() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("//a///b/"), "/a/b");
        assert_eq!(normalize("/users/42"), "/users/42");
    }
}
