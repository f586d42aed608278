//! Route table, dispatcher and URL builder.
//!
//! Routes are declared on a [`RouteCollector`], compiled into an immutable
//! [`RouteTable`], and published through a [`Router`] handle that can swap
//! in a rebuilt table atomically.
//!
//! Within one method, routes are tried in registration order and the first
//! one that matches the whole path wins. There is no specificity ranking.
//! Each method keeps a radix tree ([`matchit`]) for its literal-only routes
//! and a [`RegexSet`] over the rest; the set reports every matching route in
//! one pass, and the lowest index is the earliest registration.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::{Method, Uri};
use matchit::Router as MatchitRouter;
use regex::RegexSet;
use tracing::{debug, trace};

use crate::error::Error;
use crate::handler::{Handler, Target};
use crate::middleware::{Middleware, MiddlewareUnit};
use crate::pattern::{self, CompiledPattern, Params, Segment};

// ── Route declarations ────────────────────────────────────────────────────────

/// A route declaration: methods, pattern, target, optional name and the
/// middleware that only this route runs.
pub struct Route {
    methods: Vec<Method>,
    pattern: String,
    target: Target,
    name: Option<String>,
    middleware: Vec<MiddlewareUnit>,
}

impl Route {
    /// A route for one method, served by `handler`.
    pub fn new(method: Method, pattern: &str, handler: impl Handler) -> Self {
        Self::to(method, pattern, Target::handler(handler))
    }

    /// A route whose handler is looked up in the container by `id`.
    pub fn named_target(method: Method, pattern: &str, id: &str) -> Self {
        Self::to(method, pattern, Target::named(id))
    }

    /// A route for an already built [`Target`].
    pub fn to(method: Method, pattern: &str, target: Target) -> Self {
        Self {
            methods: vec![method],
            pattern: pattern.to_owned(),
            target,
            name: None,
            middleware: Vec::new(),
        }
    }

    /// Also serve this route for `method`.
    pub fn method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Names the route for [`RouteTable::build_url`].
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Adds middleware that runs for this route only, ahead of the app-wide
    /// middleware. Layers run in the order they are added.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(MiddlewareUnit::new(middleware));
        self
    }

    /// Like [`layer`](Route::layer), with the middleware taken from the
    /// container by `id` when a request reaches it.
    pub fn layer_lazy(mut self, id: &str) -> Self {
        self.middleware.push(MiddlewareUnit::lazy(id));
        self
    }
}

/// One compiled (method, pattern variant) pair. Owned by the table and never
/// modified after registration.
pub struct RouteEntry {
    method: Method,
    pattern: CompiledPattern,
    declared: Arc<str>,
    target: Target,
    name: Option<Arc<str>>,
    middleware: Arc<[MiddlewareUnit]>,
}

impl RouteEntry {
    pub fn method(&self) -> &Method { &self.method }

    /// The compiled variant this entry matches.
    pub fn pattern(&self) -> &CompiledPattern { &self.pattern }

    /// The pattern as declared, prefix and optional sections included.
    pub fn declared(&self) -> &str { &self.declared }

    pub fn target(&self) -> &Target { &self.target }

    pub fn name(&self) -> Option<&str> { self.name.as_deref() }

    /// Route-level middleware, shared by every variant of the declaration.
    pub fn middleware(&self) -> &[MiddlewareUnit] { &self.middleware }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern.source())
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

/// Collects route declarations. Every pattern is compiled as it is added, so
/// a malformed route fails at startup.
///
/// ```rust
/// use http::Method;
/// use kite::{Request, Route, RouteCollector};
///
/// async fn show(req: Request) -> String { format!("user {}", req.param("id").unwrap_or("?")) }
/// async fn list(_req: Request) -> &'static str { "users" }
///
/// # fn main() -> Result<(), kite::Error> {
/// let table = RouteCollector::new()
///     .group("/users", |users| {
///         users.get("", list)?
///              .add(Route::new(Method::GET, r"/{id:\d+}", show).name("user"))
///     })?
///     .build()?;
///
/// assert_eq!(table.build_url("user", &Method::GET, &[("id", "7")]).as_deref(), Some("/users/7"));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RouteCollector {
    prefix: String,
    entries: Vec<Arc<RouteEntry>>,
}

impl RouteCollector {
    pub fn new() -> Self { Self::default() }

    /// Prepends `prefix` to every pattern added from now on.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_owned();
        self
    }

    /// Adds the routes declared by `f` under `prefix`, nested in any current
    /// prefix.
    pub fn group<F>(mut self, prefix: &str, f: F) -> Result<Self, Error>
    where
        F: FnOnce(Self) -> Result<Self, Error>,
    {
        let outer = self.prefix.clone();
        self.prefix.push_str(prefix);
        let mut this = f(self)?;
        this.prefix = outer;
        Ok(this)
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Result<Self, Error> {
        self.add(Route::new(Method::GET, pattern, handler))
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Result<Self, Error> {
        self.add(Route::new(Method::POST, pattern, handler))
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Result<Self, Error> {
        self.add(Route::new(Method::PUT, pattern, handler))
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Result<Self, Error> {
        self.add(Route::new(Method::DELETE, pattern, handler))
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Result<Self, Error> {
        self.add(Route::new(Method::PATCH, pattern, handler))
    }

    pub fn head(self, pattern: &str, handler: impl Handler) -> Result<Self, Error> {
        self.add(Route::new(Method::HEAD, pattern, handler))
    }

    /// Registers a route under every one of its methods.
    pub fn add(mut self, route: Route) -> Result<Self, Error> {
        let declared: Arc<str> = format!("{}{}", self.prefix, route.pattern).into();
        let variants = pattern::compile_variants(&declared)?;
        let name: Option<Arc<str>> = route.name.as_deref().map(Arc::from);
        let middleware: Arc<[MiddlewareUnit]> = route.middleware.into();

        for method in &route.methods {
            for variant in &variants {
                let duplicate = self.entries.iter().any(|e| {
                    e.method == *method && same_shape(e.pattern.segments(), variant.segments())
                });
                if duplicate {
                    return Err(Error::DuplicateRoute {
                        method: method.clone(),
                        pattern: variant.source().to_owned(),
                    });
                }
            }
            for variant in &variants {
                self.entries.push(Arc::new(RouteEntry {
                    method: method.clone(),
                    pattern: variant.clone(),
                    declared: Arc::clone(&declared),
                    target: route.target.clone(),
                    name: name.clone(),
                    middleware: Arc::clone(&middleware),
                }));
            }
        }
        trace!(pattern = %declared, methods = ?route.methods, "route added");
        Ok(self)
    }

    /// Number of entries so far: one per method and optional variant.
    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Compiles the per-method lookup structures. The result is immutable;
    /// to change routes, build a new table and hand it to
    /// [`Router::replace`].
    pub fn build(self) -> Result<RouteTable, Error> {
        RouteTable::from_entries(self.entries)
    }
}

/// Two variants match exactly the same paths when their literals and
/// variable regexes line up, whatever the variables are called.
fn same_shape(a: &[Segment], b: &[Segment]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|pair| match pair {
        (Segment::Literal(x), Segment::Literal(y)) => x == y,
        (Segment::Variable(x), Segment::Variable(y)) => x.pattern() == y.pattern(),
        _ => false,
    })
}

// ── Route table ───────────────────────────────────────────────────────────────

/// The outcome of matching a method and path.
#[derive(Debug)]
pub enum Dispatch {
    Found(RouteMatch),
    NotFound,
    /// The path exists under other methods, listed here.
    MethodNotAllowed(Vec<Method>),
}

/// A matched route and the variables extracted from the path.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    pub route: Arc<RouteEntry>,
    pub params: Params,
}

/// Routes of one method.
struct MethodTable {
    /// Indices into `RouteTable::entries`, in registration order.
    routes: Vec<usize>,
    /// Literal path → position in `routes`.
    statics: MatchitRouter<usize>,
    /// Position in `routes` of the first route with variables.
    first_dynamic: usize,
    dynamic: RegexSet,
    /// Set index → position in `routes`.
    dynamic_positions: Vec<usize>,
}

impl MethodTable {
    fn build(method: &Method, entries: &[Arc<RouteEntry>], routes: Vec<usize>) -> Result<Self, Error> {
        let table_error = |reason: String| Error::RouteTable { method: method.clone(), reason };

        let mut statics = MatchitRouter::new();
        let mut first_dynamic = usize::MAX;
        let mut sources = Vec::new();
        let mut dynamic_positions = Vec::new();

        for (pos, &idx) in routes.iter().enumerate() {
            let pattern = &entries[idx].pattern;
            match pattern.static_path() {
                Some(path) => statics
                    .insert(escape_matchit(&path), pos)
                    .map_err(|e| table_error(e.to_string()))?,
                None => {
                    first_dynamic = first_dynamic.min(pos);
                    sources.push(pattern.regex_source().to_owned());
                    dynamic_positions.push(pos);
                }
            }
        }

        let dynamic = RegexSet::new(&sources).map_err(|e| table_error(e.to_string()))?;
        Ok(Self { routes, statics, first_dynamic, dynamic, dynamic_positions })
    }

    /// Entry index and params of the first route matching `path`.
    fn find(&self, entries: &[Arc<RouteEntry>], path: &str) -> Option<(usize, Params)> {
        let static_hit = self.statics.at(path).ok().map(|m| *m.value);
        if let Some(pos) = static_hit {
            if pos < self.first_dynamic {
                return Some((self.routes[pos], Params::new()));
            }
        }

        // Set indices are yielded in ascending order, so the first is the
        // earliest registered dynamic route.
        let dynamic_hit = self.dynamic.matches(path).iter().next()
            .map(|i| self.dynamic_positions[i]);

        let pos = match (static_hit, dynamic_hit) {
            (Some(s), Some(d)) => s.min(d),
            (s, d) => s.or(d)?,
        };
        let idx = self.routes[pos];
        if Some(pos) == static_hit {
            return Some((idx, Params::new()));
        }
        let params = entries[idx].pattern.captures(path)?;
        Some((idx, params))
    }
}

/// matchit treats braces as parameter syntax; literal ones are doubled.
fn escape_matchit(path: &str) -> String {
    path.replace('{', "{{").replace('}', "}}")
}

/// Immutable routing table: dispatch and reverse URL building.
///
/// Safe to share between threads; nothing is written after construction.
pub struct RouteTable {
    entries: Vec<Arc<RouteEntry>>,
    /// Per method, in the order methods were first registered.
    methods: Vec<(Method, MethodTable)>,
    /// Route name → entries to try when building a URL.
    names: HashMap<Arc<str>, Vec<usize>>,
}

impl RouteTable {
    /// A table with no routes; every dispatch is `NotFound`.
    pub fn empty() -> Self {
        Self { entries: Vec::new(), methods: Vec::new(), names: HashMap::new() }
    }

    fn from_entries(entries: Vec<Arc<RouteEntry>>) -> Result<Self, Error> {
        let mut grouped: Vec<(Method, Vec<usize>)> = Vec::new();
        let mut names: HashMap<Arc<str>, Vec<usize>> = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            match grouped.iter_mut().find(|(m, _)| *m == entry.method) {
                Some((_, routes)) => routes.push(idx),
                None => grouped.push((entry.method.clone(), vec![idx])),
            }
        }

        // Variants of one declaration were added shortest first; URL
        // building tries the longest first so the most specific one that
        // the params satisfy wins.
        let mut start = 0;
        while start < entries.len() {
            let mut end = start + 1;
            while end < entries.len()
                && entries[end].method == entries[start].method
                && Arc::ptr_eq(&entries[end].declared, &entries[start].declared)
            {
                end += 1;
            }
            if let Some(name) = &entries[start].name {
                names.entry(Arc::clone(name)).or_default().extend((start..end).rev());
            }
            start = end;
        }

        let methods = grouped
            .into_iter()
            .map(|(method, routes)| {
                let table = MethodTable::build(&method, &entries, routes)?;
                Ok((method, table))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        debug!(routes = entries.len(), methods = methods.len(), "route table built");
        Ok(Self { entries, methods, names })
    }

    /// Every entry, in registration order.
    pub fn entries(&self) -> &[Arc<RouteEntry>] { &self.entries }

    fn find_in(&self, method: &Method, path: &str) -> Option<(usize, Params)> {
        let (_, table) = self.methods.iter().find(|(m, _)| m == method)?;
        table.find(&self.entries, path)
    }

    /// Matches `method` and `uri` (a path, or an absolute URI whose path is
    /// used). Query string and fragment are ignored.
    pub fn dispatch(&self, method: &Method, uri: &str) -> Dispatch {
        let path = request_path(uri);
        let path: &str = &path;

        let hit = self.find_in(method, path).or_else(|| {
            if *method == Method::HEAD { self.find_in(&Method::GET, path) } else { None }
        });
        if let Some((idx, params)) = hit {
            let route = Arc::clone(&self.entries[idx]);
            trace!(%method, path, route = %route.pattern.source(), "found");
            return Dispatch::Found(RouteMatch { route, params });
        }

        let allowed: Vec<Method> = self.methods.iter()
            .filter(|(m, table)| m != method && table.find(&self.entries, path).is_some())
            .map(|(m, _)| m.clone())
            .collect();

        if allowed.is_empty() {
            trace!(%method, path, "not found");
            Dispatch::NotFound
        } else {
            trace!(%method, path, ?allowed, "method not allowed");
            Dispatch::MethodNotAllowed(allowed)
        }
    }

    /// Builds a path for the route called `name` under `method`.
    ///
    /// Every variable must be present in `params` and satisfy its regex;
    /// params left over are appended as a query string. Candidates are tried
    /// in turn and `None` is returned when none of them can be satisfied.
    pub fn build_url(&self, name: &str, method: &Method, params: &[(&str, &str)]) -> Option<String> {
        let candidates = self.names.get(name)?;
        candidates.iter()
            .map(|&idx| &self.entries[idx])
            .filter(|e| e.method == *method)
            .find_map(|e| reverse(&e.pattern, params))
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.entries.len())
            .field("methods", &self.methods.iter().map(|(m, _)| m).collect::<Vec<_>>())
            .finish()
    }
}

fn reverse(pattern: &CompiledPattern, params: &[(&str, &str)]) -> Option<String> {
    let mut used = vec![false; params.len()];
    let mut uri = String::new();

    for segment in pattern.segments() {
        match segment {
            Segment::Literal(text) => uri.push_str(text),
            Segment::Variable(var) => {
                let (i, &(_, value)) = params.iter().enumerate()
                    .find(|(_, (k, _))| *k == var.name())?;
                if !var.accepts(value) {
                    return None;
                }
                uri.push_str(value);
                used[i] = true;
            }
        }
    }

    let mut rest = params.iter().zip(&used).filter(|(_, used)| !**used).map(|(p, _)| *p).peekable();
    if rest.peek().is_some() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(rest)
            .finish();
        uri.push('?');
        uri.push_str(&query);
    }
    Some(uri)
}

/// The path component of a path or absolute URI.
///
/// Input `http::Uri` rejects (raw spaces, non-ASCII) is treated as a bare
/// path: everything from the first `?` or `#` on is dropped.
fn request_path(uri: &str) -> Cow<'_, str> {
    match uri.parse::<Uri>() {
        Ok(parsed) => Cow::Owned(parsed.path().to_owned()),
        Err(_) => {
            let end = uri.find(['?', '#']).unwrap_or(uri.len());
            Cow::Borrowed(&uri[..end])
        }
    }
}

// ── Router handle ─────────────────────────────────────────────────────────────

/// Shared handle to the current route table.
///
/// Readers take a snapshot and keep it for the whole dispatch; [`replace`]
/// publishes a fully built table in one atomic store, so nobody ever sees a
/// half-built one.
///
/// [`replace`]: Router::replace
pub struct Router {
    table: ArcSwap<RouteTable>,
}

impl Router {
    /// A handle publishing `table`.
    pub fn new(table: RouteTable) -> Self {
        Self { table: ArcSwap::from_pointee(table) }
    }

    /// The table as of now.
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Publishes `table`. Dispatches already running finish against the
    /// table they loaded; later ones see the new one.
    pub fn replace(&self, table: RouteTable) {
        self.table.store(Arc::new(table));
        debug!("route table replaced");
    }

    /// [`RouteTable::dispatch`] against the current table.
    pub fn dispatch(&self, method: &Method, uri: &str) -> Dispatch {
        self.table.load().dispatch(method, uri)
    }

    /// [`RouteTable::build_url`] against the current table.
    pub fn build_url(&self, name: &str, method: &Method, params: &[(&str, &str)]) -> Option<String> {
        self.table.load().build_url(name, method, params)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new(RouteTable::empty()) }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Router").field(&*self.table.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    async fn ok(_req: Request) -> &'static str { "ok" }

    fn found(d: Dispatch) -> RouteMatch {
        match d {
            Dispatch::Found(m) => m,
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn regex_variable_guards_the_match() {
        let table = RouteCollector::new().get(r"/users/{id:\d+}", ok).unwrap().build().unwrap();
        assert!(matches!(table.dispatch(&Method::GET, "/users/abc"), Dispatch::NotFound));
        let m = found(table.dispatch(&Method::GET, "/users/42"));
        assert_eq!(m.params.get("id"), Some("42"));
    }

    #[test]
    fn params_keep_declaration_order() {
        let table = RouteCollector::new().get("/{org}/{repo}/issues/{n}", ok).unwrap().build().unwrap();
        let m = found(table.dispatch(&Method::GET, "/rust-lang/rust/issues/1"));
        let got: Vec<_> = m.params.iter().collect();
        assert_eq!(got, [("org", "rust-lang"), ("repo", "rust"), ("n", "1")]);
    }

    #[test]
    fn wrong_method_lists_allowed_methods() {
        let table = RouteCollector::new()
            .get("/items/{id}", ok).unwrap()
            .delete("/items/{id}", ok).unwrap()
            .post("/items", ok).unwrap()
            .build().unwrap();
        match table.dispatch(&Method::PUT, "/items/3") {
            Dispatch::MethodNotAllowed(allowed) => assert_eq!(allowed, [Method::GET, Method::DELETE]),
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
        match table.dispatch(&Method::POST, "/items/3") {
            Dispatch::MethodNotAllowed(allowed) => assert_eq!(allowed, [Method::GET, Method::DELETE]),
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn get_only_route_rejects_post() {
        let table = RouteCollector::new().get("/p", ok).unwrap().build().unwrap();
        assert!(matches!(
            table.dispatch(&Method::POST, "/p"),
            Dispatch::MethodNotAllowed(ref m) if m == &[Method::GET]
        ));
    }

    #[test]
    fn first_registered_route_wins() {
        let table = RouteCollector::new()
            .add(Route::new(Method::GET, "/posts/{slug}", ok).name("by-slug")).unwrap()
            .add(Route::new(Method::GET, "/posts/latest", ok).name("latest")).unwrap()
            .add(Route::new(Method::GET, r"/posts/{id:\d+}", ok).name("by-id")).unwrap()
            .build().unwrap();
        assert_eq!(found(table.dispatch(&Method::GET, "/posts/latest")).route.name(), Some("by-slug"));
        assert_eq!(found(table.dispatch(&Method::GET, "/posts/7")).route.name(), Some("by-slug"));
    }

    #[test]
    fn static_route_registered_first_beats_later_variable_route() {
        let table = RouteCollector::new()
            .add(Route::new(Method::GET, "/posts/latest", ok).name("latest")).unwrap()
            .add(Route::new(Method::GET, "/posts/{slug}", ok).name("by-slug")).unwrap()
            .build().unwrap();
        assert_eq!(found(table.dispatch(&Method::GET, "/posts/latest")).route.name(), Some("latest"));
        assert_eq!(found(table.dispatch(&Method::GET, "/posts/other")).route.name(), Some("by-slug"));
    }

    #[test]
    fn whole_path_must_be_consumed() {
        let table = RouteCollector::new().get("/a/{b}", ok).unwrap().build().unwrap();
        assert!(matches!(table.dispatch(&Method::GET, "/a/b/c"), Dispatch::NotFound));
        assert!(matches!(table.dispatch(&Method::GET, "/a"), Dispatch::NotFound));
        assert!(matches!(table.dispatch(&Method::GET, "/x/a/b"), Dispatch::NotFound));
    }

    #[test]
    fn head_falls_back_to_get() {
        let table = RouteCollector::new().get("/page", ok).unwrap().build().unwrap();
        assert!(matches!(table.dispatch(&Method::HEAD, "/page"), Dispatch::Found(_)));
    }

    #[test]
    fn absolute_uris_dispatch_on_their_path() {
        let table = RouteCollector::new().get("/users/{id}", ok).unwrap().build().unwrap();
        let m = found(table.dispatch(&Method::GET, "https://example.com/users/9?tab=posts#top"));
        assert_eq!(m.params.get("id"), Some("9"));
        assert!(matches!(table.dispatch(&Method::GET, "http://example.com"), Dispatch::NotFound));
    }

    #[test]
    fn optional_sections_match_every_variant() {
        let table = RouteCollector::new()
            .get(r"/archive[/{year:\d{4}}[/{month:\d{2}}]]", ok).unwrap()
            .build().unwrap();
        assert!(found(table.dispatch(&Method::GET, "/archive")).params.is_empty());
        assert_eq!(found(table.dispatch(&Method::GET, "/archive/2024")).params.len(), 1);
        assert_eq!(found(table.dispatch(&Method::GET, "/archive/2024/06")).params.get("month"), Some("06"));
        assert!(matches!(table.dispatch(&Method::GET, "/archive/24"), Dispatch::NotFound));
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let err = RouteCollector::new()
            .get("/users/{id}", ok).unwrap()
            .get("/users/{user}", ok)
            .err()
            .unwrap();
        assert!(matches!(err, Error::DuplicateRoute { ref method, .. } if method == Method::GET));

        assert!(RouteCollector::new()
            .get("/users/{id}", ok).unwrap()
            .post("/users/{id}", ok)
            .is_ok());
    }

    #[test]
    fn malformed_pattern_is_fatal() {
        let err = RouteCollector::new().get("/users/{id", ok).err().unwrap();
        assert!(matches!(err, Error::MalformedPattern(_)));
    }

    #[test]
    fn groups_prefix_their_routes() {
        let table = RouteCollector::new()
            .group("/api", |api| api.group("/v1", |v1| v1.get("/ping", ok)))
            .unwrap()
            .get("/health", ok).unwrap()
            .build().unwrap();
        assert!(matches!(table.dispatch(&Method::GET, "/api/v1/ping"), Dispatch::Found(_)));
        assert!(matches!(table.dispatch(&Method::GET, "/health"), Dispatch::Found(_)));
        assert!(matches!(table.dispatch(&Method::GET, "/api/v1/health"), Dispatch::NotFound));
    }

    #[test]
    fn multi_method_routes_register_each_method() {
        let table = RouteCollector::new()
            .add(Route::new(Method::GET, "/form", ok).method(Method::POST))
            .unwrap()
            .build().unwrap();
        assert!(matches!(table.dispatch(&Method::POST, "/form"), Dispatch::Found(_)));
        assert!(matches!(table.dispatch(&Method::GET, "/form"), Dispatch::Found(_)));
    }

    #[test]
    fn dispatch_paths_built_from_segments() {
        let patterns = ["/static/page", r"/u/{id:\d+}", "/{a}/x/{b:[a-z]+}", "/f/{name}.{ext}"];
        let mut collector = RouteCollector::new();
        for (i, p) in patterns.iter().enumerate() {
            collector = collector.add(Route::new(Method::GET, p, ok).name(&format!("r{i}"))).unwrap();
        }
        let table = collector.build().unwrap();

        let cases: [&[(&str, &str)]; 4] = [
            &[],
            &[("id", "77")],
            &[("a", "one"), ("b", "two")],
            &[("name", "report"), ("ext", "pdf")],
        ];
        for (i, values) in cases.iter().enumerate() {
            let path = table.build_url(&format!("r{i}"), &Method::GET, values).unwrap();
            let m = found(table.dispatch(&Method::GET, &path));
            assert_eq!(m.route.name(), Some(format!("r{i}").as_str()));
            let got: Vec<_> = m.params.iter().collect();
            assert_eq!(got, values.to_vec());
        }
    }

    #[test]
    fn build_url_validates_and_appends_query() {
        let table = RouteCollector::new()
            .add(Route::new(Method::GET, r"/users/{id:\d+}", ok).name("user")).unwrap()
            .build().unwrap();

        assert_eq!(
            table.build_url("user", &Method::GET, &[("id", "5"), ("tab", "a b")]).as_deref(),
            Some("/users/5?tab=a+b"),
        );
        assert_eq!(table.build_url("user", &Method::GET, &[("id", "x")]), None);
        assert_eq!(table.build_url("user", &Method::GET, &[]), None);
        assert_eq!(table.build_url("user", &Method::POST, &[("id", "5")]), None);
        assert_eq!(table.build_url("nobody", &Method::GET, &[]), None);
    }

    #[test]
    fn build_url_prefers_the_longest_satisfiable_variant() {
        let table = RouteCollector::new()
            .add(Route::new(Method::GET, r"/archive[/{year:\d{4}}[/{month:\d{2}}]]", ok).name("archive"))
            .unwrap()
            .build().unwrap();
        let url = |p: &[(&str, &str)]| table.build_url("archive", &Method::GET, p);
        assert_eq!(url(&[("year", "2024"), ("month", "05")]).as_deref(), Some("/archive/2024/05"));
        assert_eq!(url(&[("year", "2024")]).as_deref(), Some("/archive/2024"));
        assert_eq!(url(&[("year", "24")]).as_deref(), Some("/archive?year=24"));
    }

    #[test]
    fn shared_name_tries_declarations_in_order() {
        let table = RouteCollector::new()
            .add(Route::new(Method::GET, r"/p/{id:\d+}", ok).name("post")).unwrap()
            .add(Route::new(Method::GET, "/p/by-slug/{slug}", ok).name("post")).unwrap()
            .build().unwrap();
        assert_eq!(table.build_url("post", &Method::GET, &[("id", "3")]).as_deref(), Some("/p/3"));
        assert_eq!(table.build_url("post", &Method::GET, &[("slug", "hi")]).as_deref(), Some("/p/by-slug/hi"));
    }

    #[test]
    fn replace_swaps_the_whole_table() {
        let router = Router::new(RouteCollector::new().get("/old", ok).unwrap().build().unwrap());
        let before = router.table();
        router.replace(RouteCollector::new().get("/new", ok).unwrap().build().unwrap());

        assert!(matches!(router.dispatch(&Method::GET, "/old"), Dispatch::NotFound));
        assert!(matches!(router.dispatch(&Method::GET, "/new"), Dispatch::Found(_)));
        // A snapshot taken earlier is unaffected.
        assert!(matches!(before.dispatch(&Method::GET, "/old"), Dispatch::Found(_)));
    }

    #[test]
    fn request_path_strips_scheme_query_and_fragment() {
        assert_eq!(request_path("/a/b?c=d"), "/a/b");
        assert_eq!(request_path("http://h:80/a#x"), "/a");
        assert_eq!(request_path("https://h"), "/");
        assert_eq!(request_path("/café?x=1"), "/café");
    }

    #[test]
    fn scheme_inside_the_query_is_not_an_authority() {
        assert_eq!(request_path("/redirect?to=http://example.com/next"), "/redirect");
        assert_eq!(request_path("/r#http://example.com/x"), "/r");

        let table = RouteCollector::new()
            .get("/redirect", ok).unwrap()
            .get("/next", ok).unwrap()
            .build().unwrap();
        let m = found(table.dispatch(&Method::GET, "/redirect?to=http://example.com/next"));
        assert_eq!(m.route.declared(), "/redirect");
    }
}
