//! Handler argument resolution.
//!
//! A handler declares its parameters up front (there is no runtime
//! reflection to lean on), and every request the resolver turns that list
//! into concrete values. For each parameter, first match wins:
//!
//! 1. an explicit value with the parameter's exact name, used verbatim;
//! 2. for a non-primitive declared type, the registry entry for that type,
//!    provided the stored value really is of that type;
//! 3. the parameter's default value;
//! 4. nothing at all, if the parameter is optional (it is left out);
//! 5. otherwise [`UnresolvedParameter`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::container::{Key, Service, ServiceLookup, TypeKey};
use crate::error::{NotFound, UnresolvedParameter};
use crate::pattern::Params;

// ── Parameter descriptors ─────────────────────────────────────────────────────

/// The declared type of a parameter.
#[derive(Clone, Copy, Debug)]
pub struct TypeSpec {
    key: TypeKey,
    primitive: bool,
}

impl TypeSpec {
    pub fn name(&self) -> &'static str { self.key.name() }

    /// Primitive types are never looked up in the registry.
    pub fn is_primitive(&self) -> bool { self.primitive }
}

/// One declared handler parameter.
#[derive(Clone)]
pub struct Parameter {
    name: String,
    ty: Option<TypeSpec>,
    default: Option<Service>,
    optional: bool,
}

impl Parameter {
    /// An untyped parameter; only explicit values, defaults or optionality
    /// can satisfy it.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ty: None, default: None, optional: false }
    }

    /// A parameter whose declared type is a service in the registry.
    pub fn of<T: Any>(name: impl Into<String>) -> Self {
        Self {
            ty: Some(TypeSpec { key: TypeKey::of::<T>(), primitive: false }),
            ..Self::new(name)
        }
    }

    /// A parameter of a plain value type (numbers, strings, ...).
    pub fn primitive<T: Any>(name: impl Into<String>) -> Self {
        Self {
            ty: Some(TypeSpec { key: TypeKey::of::<T>(), primitive: true }),
            ..Self::new(name)
        }
    }

    pub fn default<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.default = Some(Arc::new(value));
        self
    }

    /// Marks the parameter as omittable when nothing else supplies it.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn declared_type(&self) -> Option<&TypeSpec> { self.ty.as_ref() }

    pub fn has_default(&self) -> bool { self.default.is_some() }

    pub fn is_optional(&self) -> bool { self.optional }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("ty", &self.ty.map(|t| t.name()))
            .field("has_default", &self.default.is_some())
            .field("optional", &self.optional)
            .finish()
    }
}

// ── Explicit values ───────────────────────────────────────────────────────────

/// Caller-supplied values by parameter name. Always consulted before the
/// registry.
#[derive(Clone, Default)]
pub struct ResolutionContext {
    values: HashMap<String, Service>,
}

impl ResolutionContext {
    pub fn new() -> Self { Self::default() }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        self.values.insert(name.into(), Arc::new(value));
        self
    }

    pub fn insert_service(&mut self, name: impl Into<String>, value: Service) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Service> { self.values.get(name) }

    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

/// Route variables become explicit `String` values.
impl From<&Params> for ResolutionContext {
    fn from(params: &Params) -> Self {
        let mut ctx = Self::new();
        for (name, value) in params.iter() {
            ctx.insert(name, value.to_owned());
        }
        ctx
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

// ── Arguments ─────────────────────────────────────────────────────────────────

/// Resolved handler arguments, in parameter order. Omitted optional
/// parameters leave no entry behind.
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<(String, Service)>,
}

impl Arguments {
    /// The argument for `name`, downcast to `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let (_, value) = self.values.iter().find(|(n, _)| n == name)?;
        Arc::clone(value).downcast::<T>().ok()
    }

    /// Shorthand for string arguments such as route variables.
    pub fn str(&self, name: &str) -> Option<&str> {
        let (_, value) = self.values.iter().find(|(n, _)| n == name)?;
        value.downcast_ref::<String>().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(n, _)| n == name)
    }

    /// The raw value at `index` in the argument list.
    pub fn at(&self, index: usize) -> Option<&Service> {
        self.values.get(index).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Binds declared parameters against explicit values and a registry.
///
/// Holds nothing but a borrowed registry, so it can be created per call and
/// used from any number of requests at once.
pub struct Resolver<'a> {
    services: &'a dyn ServiceLookup,
}

impl<'a> Resolver<'a> {
    pub fn new(services: &'a dyn ServiceLookup) -> Self {
        Self { services }
    }

    /// Resolves `parameters` for the callable called `target`.
    pub fn resolve(
        &self,
        target: &str,
        parameters: &[Parameter],
        explicit: &ResolutionContext,
    ) -> Result<Arguments, UnresolvedParameter> {
        let mut values = Vec::with_capacity(parameters.len());

        for param in parameters {
            if let Some(value) = explicit.get(&param.name) {
                trace!(target_fn = target, param = %param.name, "explicit");
                values.push((param.name.clone(), Arc::clone(value)));
                continue;
            }

            let mut cause = None;
            if let Some(ty) = param.ty.filter(|t| !t.primitive) {
                match self.from_registry(ty) {
                    Ok(Some(service)) => {
                        trace!(target_fn = target, param = %param.name, ty = ty.name(), "registry");
                        values.push((param.name.clone(), service));
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => cause = Some(e),
                }
            }

            if let Some(default) = &param.default {
                values.push((param.name.clone(), Arc::clone(default)));
                continue;
            }

            if param.optional {
                trace!(target_fn = target, param = %param.name, "omitted");
                continue;
            }

            return Err(UnresolvedParameter {
                parameter: param.name.clone(),
                declared_type: param.ty.map(|t| t.name()),
                target: target.to_owned(),
                cause,
            });
        }

        Ok(Arguments { values })
    }

    /// `NotFound` when the registry has no entry for the type, `Ok(None)`
    /// when it holds a value of some other type under it.
    fn from_registry(&self, ty: TypeSpec) -> Result<Option<Service>, NotFound> {
        let key = Key::Type(ty.key);
        if !self.services.has(&key) {
            return Err(NotFound { key });
        }
        let service = self.services.get(&key)?;
        if (*service).type_id() == ty.key.id() {
            Ok(Some(service))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    struct Db(&'static str);
    struct Cache;

    fn resolve(
        services: &Container,
        params: &[Parameter],
        explicit: &ResolutionContext,
    ) -> Result<Arguments, UnresolvedParameter> {
        Resolver::new(services).resolve("handlers::show", params, explicit)
    }

    #[test]
    fn explicit_value_wins_verbatim() {
        let mut services = Container::new();
        services.instance(Db("primary"));
        let mut explicit = ResolutionContext::new();
        explicit.insert("name", String::from("x"));

        let args = resolve(&services, &[Parameter::of::<Db>("name")], &explicit).unwrap();
        assert_eq!(args.str("name"), Some("x"));
        assert!(args.get::<Db>("name").is_none());
    }

    #[test]
    fn typed_parameter_comes_from_registry() {
        let mut services = Container::new();
        services.instance(Db("primary"));

        let args = resolve(&services, &[Parameter::of::<Db>("db")], &ResolutionContext::new()).unwrap();
        assert_eq!(args.get::<Db>("db").unwrap().0, "primary");
    }

    #[test]
    fn incompatible_registry_value_falls_through_to_default() {
        let mut services = Container::new();
        services.service(Key::of::<Db>(), Arc::new(Cache));

        let params = [Parameter::of::<Db>("db").default(Db("fallback"))];
        let args = resolve(&services, &params, &ResolutionContext::new()).unwrap();
        assert_eq!(args.get::<Db>("db").unwrap().0, "fallback");
    }

    #[test]
    fn primitive_types_skip_the_registry() {
        let mut services = Container::new();
        services.instance(5u32);

        let params = [Parameter::primitive::<u32>("page").default(1u32)];
        let args = resolve(&services, &params, &ResolutionContext::new()).unwrap();
        assert_eq!(*args.get::<u32>("page").unwrap(), 1);
    }

    #[test]
    fn optional_parameter_is_omitted() {
        let services = Container::new();
        let params = [
            Parameter::new("first").default(String::from("a")),
            Parameter::of::<Cache>("cache").optional(),
            Parameter::new("last").default(String::from("z")),
        ];
        let args = resolve(&services, &params, &ResolutionContext::new()).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args.names().collect::<Vec<_>>(), ["first", "last"]);
        assert_eq!(args.at(1).and_then(|v| v.downcast_ref::<String>()).map(String::as_str), Some("z"));
    }

    #[test]
    fn missing_service_without_fallback_is_an_error() {
        let services = Container::new();
        let err = resolve(&services, &[Parameter::of::<Db>("db")], &ResolutionContext::new())
            .unwrap_err();
        assert_eq!(err.parameter, "db");
        assert_eq!(err.target, "handlers::show");
        assert!(err.declared_type.unwrap().ends_with("Db"));
        assert!(err.to_string().contains("$db"));
        let cause = err.cause.as_ref().unwrap();
        assert_eq!(cause.key, Key::of::<Db>());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn resolution_is_repeatable() {
        let mut services = Container::new();
        services.singleton(|_| Db("shared"));
        let params = [Parameter::of::<Db>("db")];
        let explicit = ResolutionContext::new();

        let a = resolve(&services, &params, &explicit).unwrap();
        let b = resolve(&services, &params, &explicit).unwrap();
        assert!(Arc::ptr_eq(&a.get::<Db>("db").unwrap(), &b.get::<Db>("db").unwrap()));
    }

    #[test]
    fn route_params_become_string_values() {
        let params: Params = [("id", "42")].into_iter().collect();
        let explicit = ResolutionContext::from(&params);
        let args = resolve(&Container::new(), &[Parameter::new("id")], &explicit).unwrap();
        assert_eq!(args.str("id"), Some("42"));
    }
}
