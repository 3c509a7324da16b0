//! Dependency injection container
//!
//! The `Container` owns the registration map and the behavior list and runs
//! the resolution algorithm: look up the binding, extend the resolution path
//! (failing on a cycle), let the registration produce or reuse a value, then
//! notify behaviors.

use crate::context::TreeScope;
use crate::registration::{Registrable, Registration};
use crate::storage::{Binding, RegistrationStorage};
use crate::{
    AnyArc, ArgumentFactory, Assembly, Behavior, BoxError, BoxFuture, DiError, Factory,
    FactoryKind, Injectable, RegistrationInfo, RegistrationKey, ResolutionContext, Result,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Per-registration options.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{Container, Factory, RegisterOptions, Resolver};
///
/// let container = Container::new();
/// container
///     .register_factory(
///         RegisterOptions::named("port").overridable(false),
///         Factory::new(|_: &Resolver| Ok(8080u16)),
///     )
///     .unwrap();
///
/// assert!(container.register_named("port", |_| Ok(9090u16)).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    name: Option<String>,
    overridable: bool,
}

impl RegisterOptions {
    /// Unnamed and overridable.
    pub fn new() -> Self {
        Self {
            name: None,
            overridable: true,
        }
    }

    /// Named and overridable.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            overridable: true,
        }
    }

    /// Whether a later registration may replace this one, and whether this
    /// one may replace an earlier one.
    pub fn overridable(mut self, overridable: bool) -> Self {
        self.overridable = overridable;
        self
    }
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RegisterOptions {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Dependency injection container.
///
/// Cloning is cheap; clones share registrations and behaviors.
///
/// # Examples
///
/// ```rust
/// use graph_injector::Container;
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct UserService { db: Arc<Database> }
///
/// let container = Container::new();
/// container.register(|_| Ok(Database { url: "postgres://localhost".into() })).unwrap();
/// container.register(|r| Ok(UserService { db: r.resolve()? })).unwrap();
///
/// let users = container.resolve::<UserService>().unwrap();
/// assert_eq!(users.db.url, "postgres://localhost");
/// ```
#[derive(Clone)]
pub struct Container {
    storage: Arc<RegistrationStorage>,
    behaviors: Arc<RwLock<Vec<Arc<dyn Behavior>>>>,
}

impl Container {
    /// Create a new, empty container.
    #[inline]
    pub fn new() -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "graph_injector", "Creating new container");

        Self::with_storage(RegistrationStorage::new())
    }

    /// Create a container with pre-allocated capacity.
    ///
    /// Use this when you know approximately how many registrations will be made.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            capacity = capacity,
            "Creating new container with capacity"
        );

        Self::with_storage(RegistrationStorage::with_capacity(capacity))
    }

    fn with_storage(storage: RegistrationStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            behaviors: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// The process-wide application container.
    pub fn main() -> &'static Container {
        static MAIN: Lazy<Container> = Lazy::new(Container::new);
        &MAIN
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Register a synchronous factory for `T`.
    ///
    /// The default scope is [`Scope::Graph`](crate::Scope::Graph).
    #[inline]
    pub fn register<T, F>(&self, factory: F) -> Result<Registrable<T>>
    where
        T: Injectable,
        F: Fn(&Resolver) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register_factory(RegisterOptions::new(), Factory::new(factory))
    }

    /// Register a synchronous factory for `T` under `name`.
    #[inline]
    pub fn register_named<T, F>(&self, name: &str, factory: F) -> Result<Registrable<T>>
    where
        T: Injectable,
        F: Fn(&Resolver) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register_factory(RegisterOptions::named(name), Factory::new(factory))
    }

    /// Register a suspending factory for `T`.
    ///
    /// Only the async resolve methods can use it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use graph_injector::{Container, Resolver};
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let container = Container::new();
    /// container.register_async(|_: Resolver| async { Ok(String::from("remote")) }).unwrap();
    ///
    /// assert!(container.resolve::<String>().is_err());
    /// assert_eq!(*container.resolve_async::<String>().await.unwrap(), "remote");
    /// # });
    /// ```
    #[inline]
    pub fn register_async<T, F, Fut>(&self, factory: F) -> Result<Registrable<T>>
    where
        T: Injectable,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        self.register_factory(RegisterOptions::new(), Factory::from_async(factory))
    }

    /// Register a prepared [`Factory`].
    pub fn register_factory<T: Injectable>(
        &self,
        options: impl Into<RegisterOptions>,
        factory: Factory<T>,
    ) -> Result<Registrable<T>> {
        let options = options.into();
        let key = RegistrationKey::of::<T>()
            .with_name(options.name.as_deref())
            .with_kind(factory.kind());

        let registration = Arc::new(Registration::new(
            key.clone(),
            factory.into_erased(),
            options.overridable,
        ));
        self.insert_binding(key, Binding::direct(Arc::clone(&registration)))?;
        Ok(Registrable::new(registration, self.clone()))
    }

    /// Register a synchronous factory for `T` taking an argument of type `A`.
    ///
    /// Each distinct argument value gets its own cache slot.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use graph_injector::Container;
    ///
    /// let container = Container::new();
    /// container
    ///     .register_with_argument(|_, greeting: String| Ok(format!("{greeting}!")))
    ///     .unwrap();
    ///
    /// let hi = container.resolve_with::<String, _>(None, String::from("hi")).unwrap();
    /// assert_eq!(*hi, "hi!");
    /// ```
    #[inline]
    pub fn register_with_argument<T, A, F>(&self, factory: F) -> Result<Registrable<T>>
    where
        T: Injectable,
        A: Hash + Eq + Clone + Send + Sync + 'static,
        F: Fn(&Resolver, A) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register_argument_factory(RegisterOptions::new(), ArgumentFactory::new(factory))
    }

    /// Register a prepared [`ArgumentFactory`].
    pub fn register_argument_factory<T, A>(
        &self,
        options: impl Into<RegisterOptions>,
        factory: ArgumentFactory<T, A>,
    ) -> Result<Registrable<T>>
    where
        T: Injectable,
        A: Hash + Eq + Clone + Send + Sync + 'static,
    {
        let options = options.into();
        let key = RegistrationKey::of::<T>()
            .with_name(options.name.as_deref())
            .with_argument::<A>()
            .with_kind(factory.kind());

        let registration = Arc::new(Registration::with_argument::<A>(
            key.clone(),
            factory.into_erased(),
            options.overridable,
        ));
        self.insert_binding(key, Binding::direct(Arc::clone(&registration)))?;
        Ok(Registrable::new(registration, self.clone()))
    }

    /// Insert a binding, enforce the override guard and notify behaviors.
    pub(crate) fn insert_binding(&self, key: RegistrationKey, binding: Binding) -> Result<()> {
        #[cfg(feature = "logging")]
        let forwarded = binding.is_forwarded();
        let info = RegistrationInfo::of(&key, &binding);

        let replaced = self.storage.insert(key.clone(), binding).inspect_err(|_error| {
            #[cfg(feature = "logging")]
            debug!(
                target: "graph_injector",
                service = %key,
                "Registration rejected: slot is not overridable"
            );
        })?;

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            service = %key,
            replaced = replaced,
            forwarded = forwarded,
            registration_count = self.storage.len(),
            "Registered service"
        );
        #[cfg(not(feature = "logging"))]
        let _ = replaced;

        self.notify(|behavior| behavior.did_register(self, &info));
        Ok(())
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// Resolve the unnamed registration of `T`.
    #[inline]
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>> {
        self.resolve_in(&RegistrationKey::of::<T>(), &ResolutionContext::root(), None)
    }

    /// Resolve the registration of `T` named `name`.
    #[inline]
    pub fn resolve_named<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve_in(&RegistrationKey::named::<T>(name), &ResolutionContext::root(), None)
    }

    /// Resolve an argument registration of `T`.
    #[inline]
    pub fn resolve_with<T: Injectable, A: Injectable>(
        &self,
        name: Option<&str>,
        argument: A,
    ) -> Result<Arc<T>> {
        let key = argument_key::<T, A>(name);
        self.resolve_in(&key, &ResolutionContext::root(), Some(Arc::new(argument)))
    }

    /// Resolve, returning `None` on any failure.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use graph_injector::Container;
    ///
    /// struct OptionalService;
    ///
    /// let container = Container::new();
    /// assert!(container.try_resolve::<OptionalService>().is_none());
    /// ```
    #[inline]
    pub fn try_resolve<T: Injectable>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    /// Resolve the unnamed registration of `T`, allowing suspending factories.
    pub async fn resolve_async<T: Injectable>(&self) -> Result<Arc<T>> {
        self.resolve_in_async(RegistrationKey::of::<T>(), ResolutionContext::root(), None)
            .await
    }

    /// Resolve the registration of `T` named `name`, allowing suspending factories.
    pub async fn resolve_named_async<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve_in_async(RegistrationKey::named::<T>(name), ResolutionContext::root(), None)
            .await
    }

    /// Resolve an argument registration of `T`, allowing suspending factories.
    pub async fn resolve_with_async<T: Injectable, A: Injectable>(
        &self,
        name: Option<&str>,
        argument: A,
    ) -> Result<Arc<T>> {
        let key = argument_key::<T, A>(name);
        self.resolve_in_async(key, ResolutionContext::root(), Some(Arc::new(argument)))
            .await
    }

    pub(crate) fn resolve_in<T: Injectable>(
        &self,
        key: &RegistrationKey,
        outer: &ResolutionContext,
        argument: Option<AnyArc>,
    ) -> Result<Arc<T>> {
        self.resolve_erased(key, outer, argument)?
            .downcast::<T>()
            .map_err(|_| DiError::not_found(key))
    }

    pub(crate) async fn resolve_in_async<T: Injectable>(
        &self,
        key: RegistrationKey,
        outer: ResolutionContext,
        argument: Option<AnyArc>,
    ) -> Result<Arc<T>> {
        let product = self
            .resolve_erased_async(key.clone(), outer, argument)
            .await?;
        product.downcast::<T>().map_err(|_| DiError::not_found(&key))
    }

    fn resolve_erased(
        &self,
        key: &RegistrationKey,
        outer: &ResolutionContext,
        argument: Option<AnyArc>,
    ) -> Result<AnyArc> {
        let binding = self.lookup(key)?;
        let context = outer.advance();
        let _tree = TreeScope::new(outer, &context);
        let context = context.enter(binding.registration().key())?;

        #[cfg(feature = "logging")]
        trace!(
            target: "graph_injector",
            service = %key,
            depth = context.depth(),
            "Resolving service"
        );

        let resolver = Resolver::with_context(self.clone(), context);
        let product = binding
            .registration()
            .resolve(&resolver, argument, binding.forward())?;

        self.notify_resolved(key, &binding);
        Ok(product)
    }

    fn resolve_erased_async(
        &self,
        key: RegistrationKey,
        outer: ResolutionContext,
        argument: Option<AnyArc>,
    ) -> BoxFuture<'static, Result<AnyArc>> {
        Box::pin(self.clone().resolve_owned(key, outer, argument))
    }

    async fn resolve_owned(
        self,
        key: RegistrationKey,
        outer: ResolutionContext,
        argument: Option<AnyArc>,
    ) -> Result<AnyArc> {
        let binding = self.lookup_async(&key)?;
        let context = outer.advance();
        let _tree = TreeScope::new(&outer, &context);
        let context = context.enter(binding.registration().key())?;

        #[cfg(feature = "logging")]
        trace!(
            target: "graph_injector",
            service = %key,
            depth = context.depth(),
            "Resolving service (async)"
        );

        let resolver = Resolver::with_context(self.clone(), context);
        let product = binding
            .registration()
            .resolve_async(resolver, argument, binding.forward())
            .await?;

        self.notify_resolved(&key, &binding);
        Ok(product)
    }

    /// Synchronous lookup: only synchronous registrations qualify.
    fn lookup(&self, key: &RegistrationKey) -> Result<Binding> {
        if let Some(binding) = self.storage.get(key) {
            return Ok(binding);
        }

        let suspending = key.clone().with_kind(FactoryKind::Async);
        if self.storage.contains(&suspending) {
            return Err(DiError::InvalidFactory { key: suspending });
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            service = %key,
            "Service not found"
        );

        Err(DiError::not_found(key))
    }

    /// Asynchronous lookup: prefers the suspending registration.
    fn lookup_async(&self, key: &RegistrationKey) -> Result<Binding> {
        let suspending = key.clone().with_kind(FactoryKind::Async);
        if let Some(binding) = self.storage.get(&suspending) {
            return Ok(binding);
        }
        self.lookup(key)
    }

    fn notify(&self, event: impl Fn(&dyn Behavior)) {
        let behaviors = self.behaviors.read().clone();
        for behavior in &behaviors {
            event(behavior.as_ref());
        }
    }

    fn notify_resolved(&self, key: &RegistrationKey, binding: &Binding) {
        if self.behaviors.read().is_empty() {
            return;
        }
        let info = RegistrationInfo::of(key, binding);
        self.notify(|behavior| behavior.did_resolve(self, &info));
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Whether `T` (optionally named) has a registration of either kind.
    pub fn is_registered<T: Injectable>(&self, name: Option<&str>) -> bool {
        let key = RegistrationKey::of::<T>().with_name(name);
        self.storage.contains(&key) || self.storage.contains(&key.with_kind(FactoryKind::Async))
    }

    /// Whether exactly `key` is registered.
    #[inline]
    pub fn contains(&self, key: &RegistrationKey) -> bool {
        self.storage.contains(key)
    }

    /// Number of keys, forwarded keys included.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the container is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// All registered keys.
    pub fn registered_keys(&self) -> Vec<RegistrationKey> {
        self.storage.keys()
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Remove every registration. Behaviors stay.
    pub fn clear(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            registration_count = self.storage.len(),
            "Clearing container"
        );

        self.storage.clear();
    }

    /// Add an observer. Observers are notified in the order they were added.
    pub fn add_behavior<B: Behavior + 'static>(&self, behavior: Arc<B>) {
        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            behavior = std::any::type_name::<B>(),
            "Adding behavior"
        );

        self.behaviors.write().push(behavior);
    }

    /// Run every assembly's `assemble`, then every assembly's `loaded`.
    pub fn assemble(&self, assemblies: &[&dyn Assembly]) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            assembly_count = assemblies.len(),
            "Assembling container"
        );

        for assembly in assemblies {
            assembly.assemble(self)?;
        }

        let resolver = Resolver::new(self.clone());
        for assembly in assemblies {
            assembly.loaded(&resolver)?;
        }
        Ok(())
    }
}

fn argument_key<T: 'static, A: 'static>(name: Option<&str>) -> RegistrationKey {
    RegistrationKey::of::<T>()
        .with_name(name)
        .with_argument::<A>()
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("registration_count", &self.len())
            .field("behavior_count", &self.behaviors.read().len())
            .finish()
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolution handle passed to factories and hooks.
///
/// Carries the in-flight [`ResolutionContext`], so resolves made through it
/// join the current resolution tree: they share its graph cache and are
/// checked against its path for cycles.
#[derive(Clone)]
pub struct Resolver {
    container: Container,
    context: ResolutionContext,
}

impl Resolver {
    /// A resolver outside any resolution.
    pub fn new(container: Container) -> Self {
        Self::with_context(container, ResolutionContext::root())
    }

    pub(crate) fn with_context(container: Container, context: ResolutionContext) -> Self {
        Self { container, context }
    }

    #[inline]
    pub fn container(&self) -> &Container {
        &self.container
    }

    #[inline]
    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    #[inline]
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>> {
        self.container
            .resolve_in(&RegistrationKey::of::<T>(), &self.context, None)
    }

    #[inline]
    pub fn resolve_named<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        self.container
            .resolve_in(&RegistrationKey::named::<T>(name), &self.context, None)
    }

    #[inline]
    pub fn resolve_with<T: Injectable, A: Injectable>(
        &self,
        name: Option<&str>,
        argument: A,
    ) -> Result<Arc<T>> {
        let key = argument_key::<T, A>(name);
        self.container
            .resolve_in(&key, &self.context, Some(Arc::new(argument)))
    }

    #[inline]
    pub fn try_resolve<T: Injectable>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    pub async fn resolve_async<T: Injectable>(&self) -> Result<Arc<T>> {
        self.container
            .resolve_in_async(RegistrationKey::of::<T>(), self.context.clone(), None)
            .await
    }

    pub async fn resolve_named_async<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        self.container
            .resolve_in_async(RegistrationKey::named::<T>(name), self.context.clone(), None)
            .await
    }

    pub async fn resolve_with_async<T: Injectable, A: Injectable>(
        &self,
        name: Option<&str>,
        argument: A,
    ) -> Result<Arc<T>> {
        let key = argument_key::<T, A>(name);
        self.container
            .resolve_in_async(key, self.context.clone(), Some(Arc::new(argument)))
            .await
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("container", &self.container)
            .field("depth", &self.context.depth())
            .field("path", &self.context.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scope;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Counted(u32);

    fn counting(container: &Container, scope: Scope) -> Arc<AtomicU32> {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&counter);
        container
            .register(move |_| Ok(Counted(calls.fetch_add(1, Ordering::SeqCst))))
            .unwrap()
            .scope(scope);
        counter
    }

    #[test]
    fn test_register_and_resolve() {
        let container = Container::new();
        container.register(|_| Ok(42i64)).unwrap();

        assert_eq!(*container.resolve::<i64>().unwrap(), 42);
        assert!(container.is_registered::<i64>(None));
        assert!(!container.is_registered::<i64>(Some("other")));
    }

    #[test]
    fn test_not_found() {
        let container = Container::new();
        let err = container.resolve::<String>().unwrap_err();
        assert!(matches!(err, DiError::NoRegistrationFound { .. }));
        assert_eq!(err.key(), &RegistrationKey::of::<String>());
        assert!(container.try_resolve::<String>().is_none());
    }

    #[test]
    fn test_override_replaces_factory() {
        let container = Container::new();
        container.register(|_| Ok(1u8)).unwrap();
        container.register(|_| Ok(2u8)).unwrap();

        assert_eq!(*container.resolve::<u8>().unwrap(), 2);
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_override_guard() {
        let locked = RegisterOptions::new().overridable(false);

        let container = Container::new();
        container
            .register_factory(locked.clone(), Factory::new(|_: &Resolver| Ok(1u8)))
            .unwrap();
        assert!(matches!(
            container.register(|_| Ok(2u8)),
            Err(DiError::AlreadyRegistered { .. })
        ));
        assert_eq!(*container.resolve::<u8>().unwrap(), 1);

        let container = Container::new();
        container.register(|_| Ok(1u8)).unwrap();
        assert!(matches!(
            container.register_factory(locked, Factory::new(|_: &Resolver| Ok(2u8))),
            Err(DiError::AlreadyRegistered { .. })
        ));
        assert_eq!(*container.resolve::<u8>().unwrap(), 1);
    }

    #[test]
    fn test_named_registrations() {
        let container = Container::new();
        container.register_named("http", |_| Ok(80u16)).unwrap();
        container.register_named("https", |_| Ok(443u16)).unwrap();

        assert_eq!(*container.resolve_named::<u16>("http").unwrap(), 80);
        assert_eq!(*container.resolve_named::<u16>("https").unwrap(), 443);
        assert!(container.resolve::<u16>().is_err());
    }

    #[test]
    fn test_transient_scope() {
        let container = Container::new();
        let counter = counting(&container, Scope::Transient);

        let a = container.resolve::<Counted>().unwrap();
        let b = container.resolve::<Counted>().unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_singleton_scope() {
        let container = Container::new();
        let counter = counting(&container, Scope::Singleton);

        let a = container.resolve::<Counted>().unwrap();
        let b = container.resolve::<Counted>().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_weak_scope() {
        let container = Container::new();
        let counter = counting(&container, Scope::Weak);

        let a = container.resolve::<Counted>().unwrap();
        let b = container.resolve::<Counted>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.0, 0);

        drop(a);
        drop(b);

        let c = container.resolve::<Counted>().unwrap();
        assert_eq!(c.0, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_graph_scope_shares_within_one_resolve() {
        struct Leaf;
        struct Left(Arc<Leaf>);
        struct Right(Arc<Leaf>);
        struct Root {
            left: Arc<Left>,
            right: Arc<Right>,
        }

        let container = Container::new();
        container.register(|_| Ok(Leaf)).unwrap();
        container.register(|r| Ok(Left(r.resolve()?))).unwrap();
        container.register(|r| Ok(Right(r.resolve()?))).unwrap();
        container
            .register(|r| {
                Ok(Root {
                    left: r.resolve()?,
                    right: r.resolve()?,
                })
            })
            .unwrap();

        let first = container.resolve::<Root>().unwrap();
        assert!(Arc::ptr_eq(&first.left.0, &first.right.0));

        let second = container.resolve::<Root>().unwrap();
        assert!(!Arc::ptr_eq(&first.left.0, &second.left.0));
    }

    #[test]
    fn test_graph_value_dropped_after_tree_ends() {
        struct Conn;

        let container = Container::new();
        container.register(|_| Ok(Conn)).unwrap();

        let conn = container.resolve::<Conn>().unwrap();
        let weak = Arc::downgrade(&conn);
        drop(conn);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_graph_value_holding_resolver_is_released() {
        struct Leaf;
        struct LazyProvider {
            resolver: Resolver,
        }

        let container = Container::new();
        container.register(|_| Ok(Leaf)).unwrap();
        container
            .register(|r| {
                Ok(LazyProvider {
                    resolver: r.clone(),
                })
            })
            .unwrap();

        let mut weaks = Vec::new();
        for _ in 0..200 {
            let provider = container.resolve::<LazyProvider>().unwrap();
            weaks.push(Arc::downgrade(&provider));
        }
        assert!(weaks.iter().all(|weak| weak.upgrade().is_none()));

        // a resolver kept past its tree still resolves, without caching
        let provider = container.resolve::<LazyProvider>().unwrap();
        assert!(provider.resolver.context().tree().unwrap().is_finished());
        let a = provider.resolver.resolve::<Leaf>().unwrap();
        let b = provider.resolver.resolve::<Leaf>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_async_graph_value_dropped_after_tree_ends() {
        struct Conn;

        let container = Container::new();
        container
            .register_async(|_: Resolver| async { Ok(Conn) })
            .unwrap();

        let conn = container.resolve_async::<Conn>().await.unwrap();
        let weak = Arc::downgrade(&conn);
        drop(conn);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_cycle_detection() {
        struct A;
        struct B;
        struct C;

        let container = Container::new();
        container
            .register(|r| {
                r.resolve::<B>()?;
                Ok(A)
            })
            .unwrap();
        container
            .register(|r| {
                r.resolve::<A>()?;
                Ok(B)
            })
            .unwrap();
        container.register(|_| Ok(C)).unwrap();

        match container.resolve::<A>() {
            Err(DiError::CircularDependency { key, path }) => {
                assert_eq!(key, RegistrationKey::of::<A>());
                assert!(path.contains(&RegistrationKey::of::<A>()));
                assert!(path.contains(&RegistrationKey::of::<B>()));
            }
            other => panic!("expected a cycle, got {:?}", other.map(|_| ())),
        }

        assert!(container.resolve::<C>().is_ok());
    }

    #[test]
    fn test_factory_error_is_wrapped() {
        #[derive(Debug, thiserror::Error)]
        #[error("disk full")]
        struct DiskFull;

        let container = Container::new();
        container.register::<u8, _>(|_| Err(DiskFull.into())).unwrap();

        match container.resolve::<u8>() {
            Err(DiError::Underlying { key, source }) => {
                assert_eq!(key, RegistrationKey::of::<u8>());
                assert!(source.downcast_ref::<DiskFull>().is_some());
            }
            other => panic!("expected an underlying error, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_factory_is_retried() {
        let container = Container::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&attempts);
        container
            .register(move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("not yet".into())
                } else {
                    Ok(5u8)
                }
            })
            .unwrap()
            .scope(Scope::Singleton);

        assert!(container.resolve::<u8>().is_err());
        assert_eq!(*container.resolve::<u8>().unwrap(), 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_argument_slots() {
        let container = Container::new();
        container.register(|_| Ok(42i32)).unwrap();
        let registration = container
            .register_with_argument(|_, greeting: String| Ok(format!("{greeting}!")))
            .unwrap()
            .scope(Scope::Singleton);

        assert_eq!(*container.resolve::<i32>().unwrap(), 42);

        let hi = container.resolve_with::<String, _>(None, String::from("hi")).unwrap();
        let bye = container.resolve_with::<String, _>(None, String::from("bye")).unwrap();
        let hi_again = container.resolve_with::<String, _>(None, String::from("hi")).unwrap();

        assert_eq!(*hi, "hi!");
        assert_eq!(*bye, "bye!");
        assert!(Arc::ptr_eq(&hi, &hi_again));
        assert_eq!(registration.cached_arguments(), 2);
    }

    #[test]
    fn test_argument_type_is_part_of_key() {
        let container = Container::new();
        container
            .register_with_argument(|_, n: u8| Ok(u32::from(n) * 2))
            .unwrap();

        assert_eq!(*container.resolve_with::<u32, u8>(None, 4).unwrap(), 8);
        assert!(matches!(
            container.resolve_with::<u32, u16>(None, 4),
            Err(DiError::NoRegistrationFound { .. })
        ));
        assert!(container.resolve::<u32>().is_err());
    }

    #[test]
    fn test_concurrent_registration() {
        let container = Container::new();

        std::thread::scope(|s| {
            for i in 0..500i64 {
                let container = &container;
                s.spawn(move || {
                    container
                        .register_named(&i.to_string(), move |_| Ok(i))
                        .unwrap();
                });
            }
        });

        assert_eq!(container.len(), 500);
        for i in 0..500i64 {
            assert_eq!(*container.resolve_named::<i64>(&i.to_string()).unwrap(), i);
        }
    }

    #[test]
    fn test_concurrent_singleton_resolvers_agree() {
        let container = Container::new();
        counting(&container, Scope::Singleton);

        let results: Vec<Arc<Counted>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| container.resolve::<Counted>().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
    }

    #[test]
    fn test_after_init_runs_once_per_construction() {
        let container = Container::new();
        let runs = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&runs);
        container
            .register(|_| Ok(Counted(7)))
            .unwrap()
            .scope(Scope::Singleton)
            .after_init(move |_, product| {
                assert_eq!(product.0, 7);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        container.resolve::<Counted>().unwrap();
        container.resolve::<Counted>().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_after_init_failure() {
        let container = Container::new();
        container
            .register(|_| Ok(1u8))
            .unwrap()
            .after_init(|_, _| Err("validation failed".into()));

        assert!(matches!(
            container.resolve::<u8>(),
            Err(DiError::RegistrationAction { .. })
        ));
    }

    #[test]
    fn test_implements_shares_cache() {
        struct English;
        struct Greeting(Arc<English>);

        let container = Container::new();
        container
            .register(|_| Ok(English))
            .unwrap()
            .scope(Scope::Singleton)
            .implements(|english: Arc<English>| Arc::new(Greeting(english)))
            .unwrap();

        let english = container.resolve::<English>().unwrap();
        let greeting = container.resolve::<Greeting>().unwrap();
        assert!(Arc::ptr_eq(&english, &greeting.0));
        assert_eq!(container.len(), 2);
    }

    #[test]
    fn test_forwarded_singleton_keeps_identity() {
        struct English;
        struct Greeting(#[allow(dead_code)] Arc<English>);

        let container = Container::new();
        let casts = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&casts);
        container
            .register(|_| Ok(English))
            .unwrap()
            .scope(Scope::Singleton)
            .implements(move |english: Arc<English>| {
                counted.fetch_add(1, Ordering::SeqCst);
                Arc::new(Greeting(english))
            })
            .unwrap();

        let first = container.resolve::<Greeting>().unwrap();
        drop(first);
        let first = container.resolve::<Greeting>().unwrap();
        let second = container.resolve::<Greeting>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(casts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forwarded_graph_is_per_tree() {
        struct Connection;
        struct Handle(#[allow(dead_code)] Arc<Connection>);
        struct Pair(Arc<Handle>, Arc<Handle>);

        let container = Container::new();
        container
            .register(|_| Ok(Connection))
            .unwrap()
            .implements(|connection: Arc<Connection>| Arc::new(Handle(connection)))
            .unwrap();
        container
            .register(|r| Ok(Pair(r.resolve()?, r.resolve()?)))
            .unwrap();

        let a = container.resolve::<Pair>().unwrap();
        let b = container.resolve::<Pair>().unwrap();
        assert!(Arc::ptr_eq(&a.0, &a.1));
        assert!(!Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_scope_change_resets_forwarded_cache() {
        struct English;
        struct Greeting(#[allow(dead_code)] Arc<English>);

        let container = Container::new();
        let registration = container
            .register(|_| Ok(English))
            .unwrap()
            .scope(Scope::Singleton)
            .implements(|english: Arc<English>| Arc::new(Greeting(english)))
            .unwrap();

        let before = container.resolve::<Greeting>().unwrap();
        registration.release_all();
        let after = container.resolve::<Greeting>().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));

        let _ = registration.scope(Scope::Transient);
        let a = container.resolve::<Greeting>().unwrap();
        let b = container.resolve::<Greeting>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_sync_resolve_of_async_factory() {
        let container = Container::new();
        container
            .register_async(|_: Resolver| async { Ok(1u8) })
            .unwrap();

        assert!(container.is_registered::<u8>(None));
        assert!(matches!(
            container.resolve::<u8>(),
            Err(DiError::InvalidFactory { .. })
        ));
    }

    #[tokio::test]
    async fn test_async_resolve_falls_back_to_sync() {
        let container = Container::new();
        container.register(|_| Ok(3u8)).unwrap();

        assert_eq!(*container.resolve_async::<u8>().await.unwrap(), 3);
        assert!(container.resolve_named_async::<u8>("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_async_prefers_suspending_registration() {
        let container = Container::new();
        container.register(|_| Ok(1u8)).unwrap();
        container
            .register_async(|_: Resolver| async { Ok(2u8) })
            .unwrap();

        assert_eq!(*container.resolve::<u8>().unwrap(), 1);
        assert_eq!(*container.resolve_async::<u8>().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_nesting_across_threads() {
        struct Config(u16);
        struct Client {
            config: Arc<Config>,
            again: Arc<Config>,
        }

        let container = Container::new();
        container
            .register_async(|_: Resolver| async {
                tokio::task::yield_now().await;
                Ok(Config(8080))
            })
            .unwrap();
        container
            .register_async(|r: Resolver| async move {
                let nested = r.clone();
                let config = tokio::spawn(async move { nested.resolve_async::<Config>().await })
                    .await??;
                tokio::task::yield_now().await;
                let again = r.resolve_async::<Config>().await?;
                Ok::<_, BoxError>(Client { config, again })
            })
            .unwrap();

        let client = container.resolve_async::<Client>().await.unwrap();
        assert_eq!(client.config.0, 8080);
        assert!(Arc::ptr_eq(&client.config, &client.again));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_cycle_detection() {
        struct Ping;
        struct Pong;

        let container = Container::new();
        container
            .register_async(|r: Resolver| async move {
                tokio::task::yield_now().await;
                r.resolve_async::<Pong>().await?;
                Ok::<_, BoxError>(Ping)
            })
            .unwrap();
        container
            .register_async(|r: Resolver| async move {
                r.resolve_async::<Ping>().await?;
                Ok::<_, BoxError>(Pong)
            })
            .unwrap();

        let err = container.resolve_async::<Ping>().await.err().unwrap();
        assert!(matches!(err, DiError::CircularDependency { .. }));
    }

    #[tokio::test]
    async fn test_async_argument_resolution() {
        let container = Container::new();
        container
            .register_argument_factory(
                RegisterOptions::new(),
                ArgumentFactory::from_async(|_: Resolver, id: u32| async move {
                    Ok(format!("user-{id}"))
                }),
            )
            .unwrap();

        let user = container
            .resolve_with_async::<String, u32>(None, 7)
            .await
            .unwrap();
        assert_eq!(*user, "user-7");
    }

    struct Recorder {
        tag: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Behavior for Recorder {
        fn did_register(&self, _container: &Container, info: &RegistrationInfo) {
            self.events
                .lock()
                .push(format!("{}:register:{}", self.tag, info.key().product_name()));
        }

        fn did_resolve(&self, _container: &Container, info: &RegistrationInfo) {
            self.events.lock().push(format!(
                "{}:resolve:{}:{}",
                self.tag,
                info.key().product_name(),
                info.scope()
            ));
        }
    }

    #[test]
    fn test_behaviors_notified_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let container = Container::new();
        container.add_behavior(Arc::new(Recorder {
            tag: "first",
            events: Arc::clone(&events),
        }));
        container.add_behavior(Arc::new(Recorder {
            tag: "second",
            events: Arc::clone(&events),
        }));

        container.register(|_| Ok(1u8)).unwrap();
        container.resolve::<u8>().unwrap();
        let _ = container.resolve::<u16>();

        assert_eq!(
            *events.lock(),
            vec![
                "first:register:u8",
                "second:register:u8",
                "first:resolve:u8:graph",
                "second:resolve:u8:graph",
            ]
        );
    }

    #[test]
    fn test_behaviors_see_registration_details() {
        #[derive(Default)]
        struct Snapshot(Mutex<Vec<RegistrationInfo>>);

        impl Behavior for Snapshot {
            fn did_resolve(&self, _container: &Container, info: &RegistrationInfo) {
                self.0.lock().push(info.clone());
            }
        }

        struct Port(#[allow(dead_code)] u16);

        let snapshot = Arc::new(Snapshot::default());
        let container = Container::new();
        container.add_behavior(Arc::clone(&snapshot));
        container
            .register_factory(
                RegisterOptions::named("http").overridable(false),
                Factory::new(|_: &Resolver| Ok(80u16)),
            )
            .unwrap()
            .scope(Scope::Singleton)
            .implements(|port: Arc<u16>| Arc::new(Port(*port)))
            .unwrap();

        container.resolve_named::<u16>("http").unwrap();
        container.resolve_named::<Port>("http").unwrap();

        let seen = snapshot.0.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name(), Some("http"));
        assert_eq!(seen[0].scope().name(), "singleton");
        assert!(!seen[0].is_overridable());
        assert!(!seen[0].is_forwarded());
        assert!(seen[1].is_forwarded());
        assert_eq!(seen[1].source(), seen[0].key());
    }

    #[test]
    fn test_assemble_then_loaded() {
        struct Storage {
            loaded: Arc<AtomicU32>,
        }

        impl Assembly for Storage {
            fn assemble(&self, container: &Container) -> Result<()> {
                container.register(|_| Ok(String::from("sqlite::memory:")))?;
                Ok(())
            }

            fn loaded(&self, resolver: &Resolver) -> Result<()> {
                let url = resolver.resolve::<String>()?;
                assert_eq!(*url, "sqlite::memory:");
                self.loaded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let loaded = Arc::new(AtomicU32::new(0));
        let container = Container::new();
        container
            .assemble(&[&Storage {
                loaded: Arc::clone(&loaded),
            }])
            .unwrap();

        assert_eq!(loaded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let container = Container::new();
        container.register(|_| Ok(1u8)).unwrap();
        container.register_named("x", |_| Ok(1u8)).unwrap();
        assert_eq!(container.registered_keys().len(), 2);
        assert!(container.contains(&RegistrationKey::named::<u8>("x")));

        container.clear();
        assert!(container.is_empty());
        assert!(container.resolve::<u8>().is_err());
    }

    #[test]
    fn test_resolver_outside_resolution_starts_new_tree() {
        let container = Container::new();
        container.register(|_| Ok(Counted(0))).unwrap();

        let resolver = Resolver::new(container.clone());
        let a = resolver.resolve::<Counted>().unwrap();
        let b = resolver.resolve::<Counted>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.context().depth(), 0);
    }

    #[test]
    fn test_main_container_is_shared() {
        assert!(std::ptr::eq(Container::main(), Container::main()));

        Container::main()
            .register_named("main-container-test", |_| Ok(11u8))
            .unwrap();
        assert_eq!(
            *Container::main()
                .resolve_named::<u8>("main-container-test")
                .unwrap(),
            11
        );
    }
}
