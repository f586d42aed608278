//! Service registry.
//!
//! The dispatch core only ever *reads* services, through [`ServiceLookup`].
//! [`Container`] is the process-wide implementation: built at startup, then
//! shared behind an `Arc` and never mutated again. Per-request values (the
//! route params, the matched route) go into a [`Scope`] layered in front of
//! it, so concurrent requests never see each other's overrides.
//!
//! Keys are either a Rust type or a free-form name:
//!
//! ```rust
//! use std::sync::Arc;
//! use kite::{Container, Key, ServiceLookup, ServiceLookupExt};
//!
//! struct Db { url: String }
//!
//! let mut services = Container::new();
//! services.singleton(|_| Db { url: "postgres://localhost/app".into() });
//! services.named("greeting", String::from("hello"));
//!
//! let db: Arc<Db> = services.resolve::<Db>().unwrap();
//! assert_eq!(db.url, "postgres://localhost/app");
//! assert!(services.has(&Key::name("greeting")));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::error::NotFound;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Middleware, SharedMiddleware};

/// A shared, type-erased service value.
pub type Service = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&dyn ServiceLookup) -> Service + Send + Sync>;

// ── Keys ──────────────────────────────────────────────────────────────────────

/// A Rust type used as a registry key. Compared by `TypeId`; the name is kept
/// for error messages.
#[derive(Clone, Copy, Debug)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        Self { id: TypeId::of::<T>(), name: std::any::type_name::<T>() }
    }

    pub fn id(&self) -> TypeId { self.id }

    pub fn name(&self) -> &'static str { self.name }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state) }
}

/// Registry key: a type identifier or an opaque string identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Type(TypeKey),
    Name(String),
}

impl Key {
    pub fn of<T: Any>() -> Self { Self::Type(TypeKey::of::<T>()) }

    pub fn name(name: impl Into<String>) -> Self { Self::Name(name.into()) }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(t) => write!(f, "type `{}`", t.name),
            Self::Name(n) => write!(f, "`{n}`"),
        }
    }
}

// ── Lookup contract ───────────────────────────────────────────────────────────

/// Read-only access to a service registry.
pub trait ServiceLookup: Send + Sync {
    fn has(&self, key: &Key) -> bool;

    /// Fetches the service, instantiating it first if it is lazy.
    fn get(&self, key: &Key) -> Result<Service, NotFound>;
}

/// Typed helpers over any [`ServiceLookup`].
pub trait ServiceLookupExt: ServiceLookup {
    /// Fetches the service registered under `T`'s type and downcasts it.
    ///
    /// A value of another type under that key counts as missing.
    fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, NotFound> {
        let key = Key::of::<T>();
        let service = self.get(&key)?;
        service.downcast::<T>().map_err(|_| NotFound { key })
    }

    /// Fetches and downcasts a named service.
    fn resolve_named<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, NotFound> {
        let key = Key::name(name);
        let service = self.get(&key)?;
        service.downcast::<T>().map_err(|_| NotFound { key })
    }
}

impl<L: ServiceLookup + ?Sized> ServiceLookupExt for L {}

// ── Container ─────────────────────────────────────────────────────────────────

enum Slot {
    Instance(Service),
    Singleton { factory: Factory, cell: OnceLock<Service> },
    Transient(Factory),
}

/// Key → instance/factory store with lazy instantiation.
///
/// Register everything before the container is shared; lookups take `&self`.
#[derive(Default)]
pub struct Container {
    slots: HashMap<Key, Slot>,
}

impl Container {
    pub fn new() -> Self { Self::default() }

    /// Registers a ready value under its own type.
    pub fn instance<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.insert(Key::of::<T>(), Slot::Instance(Arc::new(value)))
    }

    /// Registers a lazily built value under its type. The factory runs on the
    /// first lookup; every later lookup returns the same instance.
    pub fn singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn ServiceLookup) -> T + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |services: &dyn ServiceLookup| -> Service {
            Arc::new(factory(services))
        });
        self.insert(Key::of::<T>(), Slot::Singleton { factory, cell: OnceLock::new() })
    }

    /// Registers a factory that builds a fresh value on every lookup.
    pub fn factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn ServiceLookup) -> T + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |services: &dyn ServiceLookup| -> Service {
            Arc::new(factory(services))
        });
        self.insert(Key::of::<T>(), Slot::Transient(factory))
    }

    /// Registers a value under a string identifier.
    pub fn named<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        self.insert(Key::name(name), Slot::Instance(Arc::new(value)))
    }

    /// Registers an arbitrary service under an arbitrary key.
    pub fn service(&mut self, key: Key, service: Service) -> &mut Self {
        self.insert(key, Slot::Instance(service))
    }

    /// Registers a route handler that routes can reference by name.
    pub fn handler(&mut self, name: impl Into<String>, handler: impl Handler) -> &mut Self {
        let boxed: BoxedHandler = handler.into_boxed_handler();
        self.named(name, boxed)
    }

    /// Registers a middleware that pipelines can reference by name.
    pub fn middleware(&mut self, name: impl Into<String>, middleware: impl Middleware) -> &mut Self {
        let shared: SharedMiddleware = Arc::new(middleware);
        self.named(name, shared)
    }

    fn insert(&mut self, key: Key, slot: Slot) -> &mut Self {
        self.slots.insert(key, slot);
        self
    }

    pub fn len(&self) -> usize { self.slots.len() }

    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
}

impl ServiceLookup for Container {
    fn has(&self, key: &Key) -> bool {
        self.slots.contains_key(key)
    }

    fn get(&self, key: &Key) -> Result<Service, NotFound> {
        match self.slots.get(key) {
            Some(Slot::Instance(service)) => Ok(Arc::clone(service)),
            // A singleton factory must not look up its own key.
            Some(Slot::Singleton { factory, cell }) => {
                Ok(Arc::clone(cell.get_or_init(|| factory(self))))
            }
            Some(Slot::Transient(factory)) => Ok(factory(self)),
            None => Err(NotFound { key: key.clone() }),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container").field("services", &self.slots.len()).finish()
    }
}

// ── Scope ─────────────────────────────────────────────────────────────────────

/// Request-scoped overrides in front of a shared registry.
pub struct Scope {
    parent: Arc<dyn ServiceLookup>,
    local: HashMap<Key, Service>,
}

impl Scope {
    pub fn new(parent: Arc<dyn ServiceLookup>) -> Self {
        Self { parent, local: HashMap::new() }
    }

    /// Shadows whatever the parent holds under `T` for this scope only.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.local.insert(Key::of::<T>(), Arc::new(value));
        self
    }

    pub fn insert_service(&mut self, key: Key, service: Service) -> &mut Self {
        self.local.insert(key, service);
        self
    }
}

impl ServiceLookup for Scope {
    fn has(&self, key: &Key) -> bool {
        self.local.contains_key(key) || self.parent.has(key)
    }

    fn get(&self, key: &Key) -> Result<Service, NotFound> {
        match self.local.get(key) {
            Some(service) => Ok(Arc::clone(service)),
            None => self.parent.get(key),
        }
    }
}
