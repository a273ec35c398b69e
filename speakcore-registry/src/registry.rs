use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

type AnyArc = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceRegistry) -> AnyArc + Send + Sync>;
type Decorator = Arc<dyn Fn(AnyArc) -> AnyArc + Send + Sync>;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// A fresh instance is built on every `resolve`.
    Transient,
    /// One instance per `ServiceRegistry`, built lazily on first resolve.
    Singleton,
    /// One instance per [`Scope`], built lazily on first resolve within that scope.
    Scoped,
}

/// Implemented by services that need to release a resource (a handle, a
/// background task) when a RECREATE hot-reload swaps them out for a fresh
/// instance. Not every service needs this; `replace_with_release` only calls
/// it on the instance being replaced, never on the new one.
pub trait ReleaseHook: Send + Sync {
    fn release(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no service registered for type {0}")]
    NotRegistered(&'static str),
    #[error("dependency cycle detected while resolving {0}")]
    CycleDetected(&'static str),
    #[error("scoped service {0} resolved outside of a scope")]
    ScopeRequired(&'static str),
    #[error("registered factory for {0} returned the wrong concrete type")]
    TypeMismatch(&'static str),
}

struct ServiceDescriptor {
    factory: Factory,
    lifetime: ServiceLifetime,
    decorators: Vec<Decorator>,
    is_test_double: bool,
    singleton: Mutex<Option<AnyArc>>,
    type_name: &'static str,
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Typed dependency-injection container keyed by `TypeId`.
///
/// Services are registered with a factory closure that receives the registry
/// itself (so factories can resolve their own dependencies) and are looked up
/// by the concrete type `T` requested at `resolve::<T>()`.
#[derive(Default)]
pub struct ServiceRegistry {
    descriptors: Mutex<HashMap<TypeId, ServiceDescriptor>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let descriptors = self.descriptors.lock().expect("registry mutex poisoned");
        f.debug_struct("ServiceRegistry")
            .field("registered", &descriptors.len())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` with the given lifetime and factory.
    pub fn register<T, F>(&self, lifetime: ServiceLifetime, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceRegistry) -> T + Send + Sync + 'static,
    {
        self.register_inner::<T, F>(lifetime, factory, false);
    }

    /// Like [`register`](Self::register), but marks the registration as a test
    /// double: decorators added with [`decorate`](Self::decorate) are skipped for
    /// this type. Stable Rust has no specialization to detect test doubles
    /// automatically, so callers opt in explicitly at registration time.
    pub fn register_test_double<T, F>(&self, lifetime: ServiceLifetime, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceRegistry) -> T + Send + Sync + 'static,
    {
        self.register_inner::<T, F>(lifetime, factory, true);
    }

    fn register_inner<T, F>(&self, lifetime: ServiceLifetime, factory: F, is_test_double: bool)
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceRegistry) -> T + Send + Sync + 'static,
    {
        let wrapped: Factory = Arc::new(move |registry| {
            let value = factory(registry);
            Arc::new(value) as AnyArc
        });
        let descriptor = ServiceDescriptor {
            factory: wrapped,
            lifetime,
            decorators: Vec::new(),
            is_test_double,
            singleton: Mutex::new(None),
            type_name: std::any::type_name::<T>(),
        };
        let mut descriptors = self.descriptors.lock().expect("registry mutex poisoned");
        descriptors.insert(TypeId::of::<T>(), descriptor);
    }

    /// Appends a decorator that wraps every resolved instance of `T`, in
    /// registration order, unless `T` was registered with
    /// [`register_test_double`](Self::register_test_double).
    pub fn decorate<T, D>(&self, decorator: D) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
        D: Fn(Arc<T>) -> Arc<T> + Send + Sync + 'static,
    {
        let mut descriptors = self.descriptors.lock().expect("registry mutex poisoned");
        let descriptor = descriptors
            .get_mut(&TypeId::of::<T>())
            .ok_or(RegistryError::NotRegistered(std::any::type_name::<T>()))?;
        let wrapped: Decorator = Arc::new(move |any| {
            let typed = any
                .downcast::<T>()
                .unwrap_or_else(|_| panic!("decorator type mismatch"));
            decorator(typed) as AnyArc
        });
        descriptor.decorators.push(wrapped);
        Ok(())
    }

    /// Replaces the factory for an already-registered `T` and clears any cached
    /// singleton instance, so the next resolve rebuilds from scratch. This backs
    /// the RECREATE hot-reload strategy: existing holders of the old `Arc<T>` keep
    /// using it, new resolves see the replacement.
    pub fn replace<T, F>(&self, factory: F) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceRegistry) -> T + Send + Sync + 'static,
    {
        let mut descriptors = self.descriptors.lock().expect("registry mutex poisoned");
        let descriptor = descriptors
            .get_mut(&TypeId::of::<T>())
            .ok_or(RegistryError::NotRegistered(std::any::type_name::<T>()))?;
        descriptor.factory = Arc::new(move |registry| {
            let value = factory(registry);
            Arc::new(value) as AnyArc
        });
        *descriptor.singleton.lock().expect("singleton mutex poisoned") = None;
        Ok(())
    }

    /// Like [`replace`](Self::replace), but resolves whatever instance of `T`
    /// is currently live first and calls its [`ReleaseHook::release`] after
    /// the swap. This is the RECREATE hot-reload strategy's "construct new,
    /// install, release old" step: existing holders of the old `Arc<T>` keep
    /// it (and can keep using it until they drop it), but the old instance is
    /// told to clean up immediately rather than on its own `Drop`.
    pub fn replace_with_release<T, F>(&self, factory: F) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync + ReleaseHook,
        F: Fn(&ServiceRegistry) -> T + Send + Sync + 'static,
    {
        let old = self.resolve::<T>().ok();
        self.replace::<T, F>(factory)?;
        if let Some(old) = old {
            old.release();
        }
        Ok(())
    }

    /// Resolves `T`, building it (and caching it per its lifetime) if necessary.
    ///
    /// Scoped services must be resolved via [`Scope::resolve`] instead; calling
    /// this directly for a `Scoped` registration returns
    /// [`RegistryError::ScopeRequired`].
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, RegistryError> {
        self.resolve_with_scope::<T>(None)
    }

    fn resolve_with_scope<T: Any + Send + Sync>(
        &self,
        scope: Option<&Scope>,
    ) -> Result<Arc<T>, RegistryError> {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        let already_resolving = RESOLUTION_STACK.with(|stack| stack.borrow().contains(&type_id));
        if already_resolving {
            return Err(RegistryError::CycleDetected(type_name));
        }

        RESOLUTION_STACK.with(|stack| stack.borrow_mut().push(type_id));
        let result = self.resolve_inner::<T>(type_id, type_name, scope);
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        result
    }

    fn resolve_inner<T: Any + Send + Sync>(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        scope: Option<&Scope>,
    ) -> Result<Arc<T>, RegistryError> {
        let (lifetime, is_test_double) = {
            let descriptors = self.descriptors.lock().expect("registry mutex poisoned");
            let descriptor = descriptors
                .get(&type_id)
                .ok_or(RegistryError::NotRegistered(type_name))?;
            (descriptor.lifetime, descriptor.is_test_double)
        };

        match lifetime {
            ServiceLifetime::Singleton => {
                if let Some(cached) = self.cached_singleton(type_id) {
                    return downcast(cached, type_name);
                }
                let built = self.build(type_id, type_name, is_test_double)?;
                let descriptors = self.descriptors.lock().expect("registry mutex poisoned");
                let descriptor = descriptors
                    .get(&type_id)
                    .ok_or(RegistryError::NotRegistered(type_name))?;
                let mut cell = descriptor.singleton.lock().expect("singleton mutex poisoned");
                let value = cell.get_or_insert_with(|| built.clone()).clone();
                downcast(value, type_name)
            }
            ServiceLifetime::Transient => {
                let built = self.build(type_id, type_name, is_test_double)?;
                downcast(built, type_name)
            }
            ServiceLifetime::Scoped => {
                let scope = scope.ok_or(RegistryError::ScopeRequired(type_name))?;
                if let Some(cached) = scope.cached(type_id) {
                    return downcast(cached, type_name);
                }
                let built = self.build(type_id, type_name, is_test_double)?;
                let value = scope.cache(type_id, built);
                downcast(value, type_name)
            }
        }
    }

    fn cached_singleton(&self, type_id: TypeId) -> Option<AnyArc> {
        let descriptors = self.descriptors.lock().expect("registry mutex poisoned");
        let descriptor = descriptors.get(&type_id)?;
        descriptor
            .singleton
            .lock()
            .expect("singleton mutex poisoned")
            .clone()
    }

    fn build(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        is_test_double: bool,
    ) -> Result<AnyArc, RegistryError> {
        let factory = {
            let descriptors = self.descriptors.lock().expect("registry mutex poisoned");
            let descriptor = descriptors
                .get(&type_id)
                .ok_or(RegistryError::NotRegistered(type_name))?;
            descriptor.factory.clone()
        };
        let mut value = factory(self);
        if !is_test_double {
            let decorators = {
                let descriptors = self.descriptors.lock().expect("registry mutex poisoned");
                descriptors
                    .get(&type_id)
                    .map(|d| d.decorators.clone())
                    .unwrap_or_default()
            };
            for decorator in decorators {
                value = decorator(value);
            }
        }
        Ok(value)
    }

    /// Opens a new resolution scope for `Scoped` services.
    pub fn open_scope<'a>(&'a self) -> Scope<'a> {
        Scope {
            registry: self,
            instances: Mutex::new(HashMap::new()),
            release_hooks: Mutex::new(Vec::new()),
        }
    }
}

fn downcast<T: Any + Send + Sync>(value: AnyArc, type_name: &'static str) -> Result<Arc<T>, RegistryError> {
    value
        .downcast::<T>()
        .map_err(|_| RegistryError::TypeMismatch(type_name))
}

/// A resolution scope for `Scoped` services, e.g. one per recording session.
///
/// Dropping the scope runs every release hook registered with
/// [`Scope::on_release`], in reverse registration order.
pub struct Scope<'a> {
    registry: &'a ServiceRegistry,
    instances: Mutex<HashMap<TypeId, AnyArc>>,
    release_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl<'a> Scope<'a> {
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, RegistryError> {
        self.registry.resolve_with_scope::<T>(Some(self))
    }

    fn cached(&self, type_id: TypeId) -> Option<AnyArc> {
        self.instances
            .lock()
            .expect("scope mutex poisoned")
            .get(&type_id)
            .cloned()
    }

    fn cache(&self, type_id: TypeId, value: AnyArc) -> AnyArc {
        let mut instances = self.instances.lock().expect("scope mutex poisoned");
        instances.entry(type_id).or_insert(value).clone()
    }

    /// Registers a hook to run when the scope is dropped.
    pub fn on_release<F: FnOnce() + Send + 'static>(&self, hook: F) {
        self.release_hooks
            .lock()
            .expect("scope mutex poisoned")
            .push(Box::new(hook));
    }
}

impl<'a> Drop for Scope<'a> {
    fn drop(&mut self) {
        let hooks = std::mem::take(
            &mut *self.release_hooks.lock().expect("scope mutex poisoned"),
        );
        for hook in hooks.into_iter().rev() {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    struct Widget(u32);

    #[test]
    fn transient_builds_fresh_each_time() {
        let registry = ServiceRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        registry.register::<Widget, _>(ServiceLifetime::Transient, move |_| {
            Widget(c.fetch_add(1, Ordering::SeqCst) as u32)
        });

        let a = registry.resolve::<Widget>().unwrap();
        let b = registry.resolve::<Widget>().unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn singleton_is_cached() {
        let registry = ServiceRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        registry.register::<Widget, _>(ServiceLifetime::Singleton, move |_| {
            Widget(c.fetch_add(1, Ordering::SeqCst) as u32)
        });

        let a = registry.resolve::<Widget>().unwrap();
        let b = registry.resolve::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scoped_requires_a_scope() {
        let registry = ServiceRegistry::new();
        registry.register::<Widget, _>(ServiceLifetime::Scoped, |_| Widget(1));
        assert!(matches!(
            registry.resolve::<Widget>(),
            Err(RegistryError::ScopeRequired(_))
        ));
    }

    #[test]
    fn scoped_instances_differ_across_scopes_but_not_within() {
        let registry = ServiceRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        registry.register::<Widget, _>(ServiceLifetime::Scoped, move |_| {
            Widget(c.fetch_add(1, Ordering::SeqCst) as u32)
        });

        let scope1 = registry.open_scope();
        let a1 = scope1.resolve::<Widget>().unwrap();
        let a2 = scope1.resolve::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));

        let scope2 = registry.open_scope();
        let b1 = scope2.resolve::<Widget>().unwrap();
        assert!(!Arc::ptr_eq(&a1, &b1));
    }

    #[test]
    fn scope_drop_runs_release_hooks_in_reverse_order() {
        let registry = ServiceRegistry::new();
        registry.register::<Widget, _>(ServiceLifetime::Scoped, |_| Widget(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let scope = registry.open_scope();
            let _ = scope.resolve::<Widget>().unwrap();
            let o1 = order.clone();
            scope.on_release(move || o1.lock().unwrap().push(1));
            let o2 = order.clone();
            scope.on_release(move || o2.lock().unwrap().push(2));
        }

        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn detects_direct_cycle() {
        #[derive(Debug)]
        struct Cyclic;

        let registry = ServiceRegistry::new();
        registry.register::<Cyclic, _>(ServiceLifetime::Transient, |registry| {
            let _ = registry.resolve::<Cyclic>();
            Cyclic
        });

        assert!(matches!(
            registry.resolve::<Cyclic>(),
            Err(RegistryError::CycleDetected(_))
        ));
    }

    #[test]
    fn decorator_wraps_resolved_instance() {
        let registry = ServiceRegistry::new();
        registry.register::<Widget, _>(ServiceLifetime::Transient, |_| Widget(1));
        registry
            .decorate::<Widget, _>(|w| Arc::new(Widget(w.0 + 100)))
            .unwrap();

        let resolved = registry.resolve::<Widget>().unwrap();
        assert_eq!(resolved.0, 101);
    }

    #[test]
    fn test_double_skips_decorators() {
        let registry = ServiceRegistry::new();
        registry.register_test_double::<Widget, _>(ServiceLifetime::Transient, |_| Widget(1));
        registry
            .decorate::<Widget, _>(|w| Arc::new(Widget(w.0 + 100)))
            .unwrap();

        let resolved = registry.resolve::<Widget>().unwrap();
        assert_eq!(resolved.0, 1);
    }

    #[test]
    fn replace_clears_cached_singleton() {
        let registry = ServiceRegistry::new();
        registry.register::<Widget, _>(ServiceLifetime::Singleton, |_| Widget(1));
        let first = registry.resolve::<Widget>().unwrap();
        assert_eq!(first.0, 1);

        registry.replace::<Widget, _>(|_| Widget(2)).unwrap();
        let second = registry.resolve::<Widget>().unwrap();
        assert_eq!(second.0, 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn replace_with_release_calls_release_on_old_instance_only() {
        struct Released(Arc<AtomicUsize>);
        impl ReleaseHook for Released {
            fn release(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = ServiceRegistry::new();
        let old_releases = Arc::new(AtomicUsize::new(0));
        let new_releases = Arc::new(AtomicUsize::new(0));
        let old_releases_for_factory = old_releases.clone();
        registry.register::<Released, _>(ServiceLifetime::Singleton, move |_| {
            Released(old_releases_for_factory.clone())
        });

        let first = registry.resolve::<Released>().unwrap();
        assert_eq!(old_releases.load(Ordering::SeqCst), 0);

        let new_releases_for_factory = new_releases.clone();
        registry
            .replace_with_release::<Released, _>(move |_| Released(new_releases_for_factory.clone()))
            .unwrap();

        assert_eq!(old_releases.load(Ordering::SeqCst), 1);
        assert_eq!(new_releases.load(Ordering::SeqCst), 0);

        let second = registry.resolve::<Released>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
