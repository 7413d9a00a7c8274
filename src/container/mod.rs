//! Service container with explicit providers and per-request singletons.
//!
//! Services are described once at startup in a [`Providers`] table: each entry
//! maps a type to the factory that builds it. A factory receives the
//! [`Container`] and resolves whatever it depends on, so a whole object graph is
//! assembled on demand from the first [`Container::resolve`] call.
//!
//! A `Container` is created for every request and caches one instance per type
//! for its lifetime. Nothing is shared between requests except the immutable
//! provider table, so services do not need to be `Send` or `Sync`.
//!
//! ```
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use sprig::container::{Container, Providers};
//!
//! struct Clock;
//! struct Greeter { clock: Rc<Clock> }
//!
//! let mut providers = Providers::new();
//! providers
//!     .register(|_| Ok(Clock))
//!     .register(|c| Ok(Greeter { clock: c.resolve::<Clock>()? }));
//!
//! let container = Container::new(Arc::new(providers));
//! let greeter = container.resolve::<Greeter>().unwrap();
//! assert!(Rc::ptr_eq(&greeter.clock, &container.resolve::<Clock>().unwrap()));
//! ```

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors produced while resolving a service.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("service not found: {service}")]
    ServiceNotFound { service: &'static str },

    #[error("circular dependency detected: {chain}")]
    CircularDependency { chain: String },

    #[error("provider for {service} produced a different type")]
    TypeMismatch { service: &'static str },

    #[error("failed to construct {service}: {source}")]
    Factory {
        service: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ContainerError {
    /// Wraps a factory's own failure, naming the service being built.
    pub fn construction<T: 'static>(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        ContainerError::Factory {
            service: type_name::<T>(),
            source: source.into(),
        }
    }
}

type Factory = Arc<dyn Fn(&Container) -> Result<Rc<dyn Any>, ContainerError> + Send + Sync>;

struct Provider {
    name: &'static str,
    factory: Factory,
}

/// The startup-built table of service factories.
///
/// Registering the same type twice replaces the earlier factory.
#[derive(Default)]
pub struct Providers {
    entries: HashMap<TypeId, Provider>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory that builds `T`.
    pub fn register<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: 'static,
        F: Fn(&Container) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        let name = type_name::<T>();
        let factory: Factory = Arc::new(move |container| {
            factory(container).map(|value| Rc::new(value) as Rc<dyn Any>)
        });
        if self
            .entries
            .insert(TypeId::of::<T>(), Provider { name, factory })
            .is_some()
        {
            debug!(service = name, "provider replaced");
        }
        self
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-request service registry.
pub struct Container {
    providers: Arc<Providers>,
    instances: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    resolving: RefCell<Vec<(TypeId, &'static str)>>,
}

impl Container {
    pub fn new(providers: Arc<Providers>) -> Self {
        Self {
            providers,
            instances: RefCell::new(HashMap::new()),
            resolving: RefCell::new(Vec::new()),
        }
    }

    /// Returns the cached `T`, building it (and its dependencies) on first use.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::ServiceNotFound`] when no provider is registered for `T`.
    /// - [`ContainerError::CircularDependency`] when `T` is already being built
    ///   further up the current resolution.
    /// - Whatever the factory, or a dependency's factory, returned.
    pub fn resolve<T: 'static>(&self) -> Result<Rc<T>, ContainerError> {
        let id = TypeId::of::<T>();
        let name = type_name::<T>();

        let cached = self.instances.borrow().get(&id).cloned();
        if let Some(instance) = cached {
            trace!(service = name, "service cache hit");
            return downcast(instance, name);
        }

        let provider = self
            .providers
            .entries
            .get(&id)
            .ok_or(ContainerError::ServiceNotFound { service: name })?;

        if self.resolving.borrow().iter().any(|(seen, _)| *seen == id) {
            let chain = self.chain_to(provider.name);
            warn!(%chain, "circular dependency");
            return Err(ContainerError::CircularDependency { chain });
        }

        let instance = {
            let _frame = ResolutionFrame::enter(&self.resolving, id, provider.name);
            debug!(service = provider.name, "constructing service");
            (provider.factory)(self)?
        };

        self.instances.borrow_mut().insert(id, Rc::clone(&instance));
        downcast(instance, name)
    }

    /// Seeds the registry with a ready-made value, replacing any cached one.
    pub fn instance<T: 'static>(&self, value: T) -> Rc<T> {
        let value = Rc::new(value);
        self.instances
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::clone(&value) as Rc<dyn Any>);
        value
    }

    /// `true` once `T` has been built or seeded in this container.
    pub fn contains<T: 'static>(&self) -> bool {
        self.instances.borrow().contains_key(&TypeId::of::<T>())
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    fn chain_to(&self, repeated: &'static str) -> String {
        self.resolving
            .borrow()
            .iter()
            .map(|(_, name)| *name)
            .chain(std::iter::once(repeated))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

fn downcast<T: 'static>(instance: Rc<dyn Any>, name: &'static str) -> Result<Rc<T>, ContainerError> {
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch { service: name })
}

// Keeps a type on the resolution stack for exactly as long as its factory runs.
struct ResolutionFrame<'a> {
    stack: &'a RefCell<Vec<(TypeId, &'static str)>>,
}

impl<'a> ResolutionFrame<'a> {
    fn enter(
        stack: &'a RefCell<Vec<(TypeId, &'static str)>>,
        id: TypeId,
        name: &'static str,
    ) -> Self {
        stack.borrow_mut().push((id, name));
        Self { stack }
    }
}

impl Drop for ResolutionFrame<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Config {
        name: &'static str,
    }

    struct Repo {
        config: Rc<Config>,
    }

    struct Service {
        repo: Rc<Repo>,
        config: Rc<Config>,
    }

    fn graph() -> Providers {
        let mut providers = Providers::new();
        providers
            .register(|_| Ok(Config { name: "test" }))
            .register(|c| Ok(Repo { config: c.resolve()? }))
            .register(|c| {
                Ok(Service {
                    repo: c.resolve()?,
                    config: c.resolve()?,
                })
            });
        providers
    }

    #[test]
    fn resolving_twice_returns_the_same_instance() {
        let container = Container::new(Arc::new(graph()));
        let first = container.resolve::<Service>().unwrap();
        let second = container.resolve::<Service>().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn shared_dependencies_are_built_once() {
        let container = Container::new(Arc::new(graph()));
        let service = container.resolve::<Service>().unwrap();
        assert!(Rc::ptr_eq(&service.config, &service.repo.config));
        assert_eq!(service.config.name, "test");
    }

    #[test]
    fn separate_containers_do_not_share_instances() {
        let providers = Arc::new(graph());
        let a = Container::new(Arc::clone(&providers)).resolve::<Config>().unwrap();
        let b = Container::new(providers).resolve::<Config>().unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_service_is_reported() {
        let container = Container::new(Arc::new(Providers::new()));
        let err = container.resolve::<Config>().err().unwrap();
        assert!(matches!(err, ContainerError::ServiceNotFound { service } if service.ends_with("Config")));
    }

    struct Narcissus;

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut providers = Providers::new();
        providers.register(|c| {
            c.resolve::<Narcissus>()?;
            Ok(Narcissus)
        });
        let container = Container::new(Arc::new(providers));
        let err = container.resolve::<Narcissus>().err().unwrap();
        assert!(matches!(err, ContainerError::CircularDependency { .. }));
        assert!(!container.contains::<Narcissus>());
    }

    struct Ping;
    struct Pong;

    #[test]
    fn mutual_dependency_fails_before_construction() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut providers = Providers::new();
        let counter = Arc::clone(&built);
        providers.register(move |c| {
            c.resolve::<Pong>()?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Ping)
        });
        let counter = Arc::clone(&built);
        providers.register(move |c| {
            c.resolve::<Ping>()?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Pong)
        });

        let container = Container::new(Arc::new(providers));
        match container.resolve::<Ping>() {
            Err(ContainerError::CircularDependency { chain }) => {
                assert!(chain.contains("Ping -> "));
                assert!(chain.contains("Pong"));
                assert_eq!(chain.matches("Ping").count(), 2);
            }
            other => panic!("expected a cycle, got {:?}", other.err()),
        }
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(!container.contains::<Ping>());
        assert!(!container.contains::<Pong>());
    }

    #[test]
    fn stack_unwinds_after_a_failure() {
        let mut providers = graph();
        providers.register(|c| {
            c.resolve::<Narcissus>()?;
            Ok(Narcissus)
        });
        let container = Container::new(Arc::new(providers));
        assert!(container.resolve::<Narcissus>().is_err());
        assert!(container.resolving.borrow().is_empty());
        assert!(container.resolve::<Service>().is_ok());
    }

    #[test]
    fn seeded_instances_win_over_providers() {
        let container = Container::new(Arc::new(graph()));
        let seeded = container.instance(Config { name: "seeded" });
        let resolved = container.resolve::<Repo>().unwrap();
        assert!(Rc::ptr_eq(&seeded, &resolved.config));
    }

    #[test]
    fn factory_failures_name_the_service() {
        let mut providers = Providers::new();
        providers.register(|_| -> Result<Config, ContainerError> {
            Err(ContainerError::construction::<Config>("disk on fire"))
        });
        let container = Container::new(Arc::new(providers));
        let err = container.resolve::<Config>().err().unwrap();
        assert!(err.to_string().contains("disk on fire"));
        assert!(err.to_string().contains("Config"));
    }
}
