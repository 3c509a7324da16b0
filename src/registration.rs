//! Registrations: a factory bound to a scope and post-construction hooks.
//!
//! The container stores registrations type-erased; [`Registrable`] is the
//! typed handle returned from every register call for fluent configuration.

use crate::factory::{ErasedFactory, FactoryFailure};
use crate::storage::{Binding, Forward};
use crate::{
    AnyArc, BoxError, Container, DiError, FactoryKind, Injectable, Instance, RegistrationKey,
    Resolver, Result, Scope,
};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

type Hook = Arc<dyn Fn(&Resolver, &AnyArc) -> std::result::Result<(), BoxError> + Send + Sync>;

// =============================================================================
// Cache slots
// =============================================================================

/// What one registration (or one argument value) caches: its own products and,
/// for each forwarded type, the converted values under the same scope.
struct Slot {
    scope: Scope,
    product: Arc<dyn Instance>,
    forwards: DashMap<TypeId, Arc<dyn Instance>, RandomState>,
}

impl Slot {
    fn new(scope: &Scope) -> Self {
        Self {
            scope: scope.clone(),
            product: scope.instantiate(),
            forwards: DashMap::with_hasher(RandomState::new()),
        }
    }

    fn forward(&self, target: TypeId) -> Arc<dyn Instance> {
        if let Some(existing) = self.forwards.get(&target) {
            return Arc::clone(existing.value());
        }
        let instance = self
            .forwards
            .entry(target)
            .or_insert_with(|| self.scope.instantiate());
        Arc::clone(instance.value())
    }

    fn release_all(&self) {
        self.product.release_all();
        for forward in self.forwards.iter() {
            forward.value().release_all();
        }
    }
}

/// Cache slots of an argument registration, one per distinct argument value.
trait ArgumentSlots: Send + Sync {
    /// Slot for `argument`, created from `scope` if unseen. `None` when the
    /// argument is not of the declared type.
    fn slot(&self, argument: &AnyArc, scope: &Scope) -> Option<Arc<Slot>>;

    fn clear(&self);

    fn release_all(&self);

    fn len(&self) -> usize;
}

struct TypedSlots<A> {
    slots: DashMap<A, Arc<Slot>, RandomState>,
}

impl<A> Default for TypedSlots<A>
where
    A: Hash + Eq,
{
    fn default() -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
        }
    }
}

impl<A> ArgumentSlots for TypedSlots<A>
where
    A: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn slot(&self, argument: &AnyArc, scope: &Scope) -> Option<Arc<Slot>> {
        let argument = argument.downcast_ref::<A>()?;
        if let Some(existing) = self.slots.get(argument) {
            return Some(Arc::clone(existing.value()));
        }
        let slot = self
            .slots
            .entry(argument.clone())
            .or_insert_with(|| Arc::new(Slot::new(scope)));
        Some(Arc::clone(slot.value()))
    }

    fn clear(&self) {
        self.slots.clear();
    }

    fn release_all(&self) {
        for slot in self.slots.iter() {
            slot.value().release_all();
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

enum Cache {
    Single(Arc<Slot>),
    PerArgument {
        slots: Box<dyn ArgumentSlots>,
        argument: &'static str,
    },
}

// =============================================================================
// Registration core
// =============================================================================

/// The erased registration stored in the container.
pub(crate) struct Registration {
    key: RegistrationKey,
    factory: ErasedFactory,
    overridable: bool,
    scope: RwLock<Scope>,
    cache: RwLock<Cache>,
    hooks: RwLock<Vec<Hook>>,
}

impl Registration {
    /// Registration without an argument.
    pub(crate) fn new(key: RegistrationKey, factory: ErasedFactory, overridable: bool) -> Self {
        let scope = Scope::default();
        let cache = Cache::Single(Arc::new(Slot::new(&scope)));
        Self::build(key, factory, overridable, scope, cache)
    }

    /// Registration keyed additionally by argument value.
    pub(crate) fn with_argument<A>(
        key: RegistrationKey,
        factory: ErasedFactory,
        overridable: bool,
    ) -> Self
    where
        A: Hash + Eq + Clone + Send + Sync + 'static,
    {
        let cache = Cache::PerArgument {
            slots: Box::new(TypedSlots::<A>::default()),
            argument: type_name::<A>(),
        };
        Self::build(key, factory, overridable, Scope::default(), cache)
    }

    fn build(
        key: RegistrationKey,
        factory: ErasedFactory,
        overridable: bool,
        scope: Scope,
        cache: Cache,
    ) -> Self {
        Self {
            key,
            factory,
            overridable,
            scope: RwLock::new(scope),
            cache: RwLock::new(cache),
            hooks: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &RegistrationKey {
        &self.key
    }

    #[inline]
    pub(crate) fn is_overridable(&self) -> bool {
        self.overridable
    }

    #[inline]
    pub(crate) fn kind(&self) -> FactoryKind {
        self.factory.kind()
    }

    pub(crate) fn scope(&self) -> Scope {
        self.scope.read().clone()
    }

    /// Replace the scope, discarding everything cached under the old one.
    pub(crate) fn set_scope(&self, scope: Scope) {
        let mut cache = self.cache.write();
        match &mut *cache {
            Cache::Single(slot) => *slot = Arc::new(Slot::new(&scope)),
            Cache::PerArgument { slots, .. } => slots.clear(),
        }
        *self.scope.write() = scope;
    }

    pub(crate) fn add_hook(&self, hook: Hook) {
        self.hooks.write().push(hook);
    }

    /// Drop every value cached by this registration.
    pub(crate) fn release_all(&self) {
        match &*self.cache.read() {
            Cache::Single(slot) => slot.release_all(),
            Cache::PerArgument { slots, .. } => slots.release_all(),
        }
    }

    /// Number of distinct argument values seen (0 without arguments).
    pub(crate) fn argument_slots(&self) -> usize {
        match &*self.cache.read() {
            Cache::Single(_) => 0,
            Cache::PerArgument { slots, .. } => slots.len(),
        }
    }

    fn slot(&self, argument: Option<&AnyArc>) -> Result<Arc<Slot>> {
        let cache = self.cache.read();
        match (&*cache, argument) {
            (Cache::Single(slot), None) => Ok(Arc::clone(slot)),
            (Cache::PerArgument { slots, argument: expected }, Some(value)) => {
                let scope = self.scope.read();
                slots
                    .slot(value, &scope)
                    .ok_or_else(|| DiError::InvalidArgument {
                        key: self.key.clone(),
                        expected: *expected,
                    })
            }
            (Cache::PerArgument { argument: expected, .. }, None) => {
                Err(DiError::InvalidArgument {
                    key: self.key.clone(),
                    expected: *expected,
                })
            }
            (Cache::Single(_), Some(_)) => Err(DiError::InvalidArgument {
                key: self.key.clone(),
                expected: "no argument",
            }),
        }
    }

    fn failure(&self, failure: FactoryFailure) -> DiError {
        match failure {
            FactoryFailure::Suspends => DiError::InvalidFactory {
                key: self.key.clone(),
            },
            FactoryFailure::Argument(expected) => DiError::InvalidArgument {
                key: self.key.clone(),
                expected,
            },
            FactoryFailure::Body(error) => DiError::from_factory(&self.key, error),
        }
    }

    fn cached(&self, instance: &dyn Instance, resolver: &Resolver) -> Option<AnyArc> {
        let cached = instance.get(resolver.context())?;

        #[cfg(feature = "logging")]
        trace!(
            target: "graph_injector",
            service = %self.key,
            depth = resolver.context().depth(),
            "Returning cached instance"
        );

        Some(cached)
    }

    /// Cache the freshly built product and run hooks on it.
    ///
    /// The scope decides what is returned: a racing resolver that lost the
    /// first write gets the cached winner and does not run hooks again.
    fn accept(
        &self,
        instance: &dyn Instance,
        resolver: &Resolver,
        product: AnyArc,
    ) -> Result<AnyArc> {
        let context = resolver.context();
        instance.set(Arc::clone(&product), context);

        if let Some(winner) = instance.get(context) {
            if !Arc::ptr_eq(&winner, &product) {
                return Ok(winner);
            }
        }

        let hooks = self.hooks.read().clone();
        for hook in hooks {
            hook(resolver, &product).map_err(|error| DiError::from_hook(&self.key, error))?;
        }
        Ok(product)
    }

    /// Cache a converted value; first write wins as for products.
    fn keep(instance: &dyn Instance, resolver: &Resolver, converted: AnyArc) -> AnyArc {
        let context = resolver.context();
        instance.set(Arc::clone(&converted), context);
        instance.get(context).unwrap_or(converted)
    }

    /// Resolve through the synchronous path, converting through `forward`
    /// when the value was requested as a forwarded type.
    pub(crate) fn resolve(
        &self,
        resolver: &Resolver,
        argument: Option<AnyArc>,
        forward: Option<&Forward>,
    ) -> Result<AnyArc> {
        let slot = self.slot(argument.as_ref())?;
        let Some(forward) = forward else {
            return self.produce(slot.product.as_ref(), resolver, argument);
        };

        let instance = slot.forward(forward.target());
        if let Some(cached) = self.cached(instance.as_ref(), resolver) {
            return Ok(cached);
        }
        let product = self.produce(slot.product.as_ref(), resolver, argument)?;
        let converted = forward.convert(&self.key, product)?;
        Ok(Self::keep(instance.as_ref(), resolver, converted))
    }

    fn produce(
        &self,
        instance: &dyn Instance,
        resolver: &Resolver,
        argument: Option<AnyArc>,
    ) -> Result<AnyArc> {
        if let Some(cached) = self.cached(instance, resolver) {
            return Ok(cached);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            service = %self.key,
            depth = resolver.context().depth(),
            "Invoking factory"
        );

        let product = self
            .factory
            .invoke(resolver, argument)
            .map_err(|failure| self.failure(failure))?;

        self.accept(instance, resolver, product)
    }

    /// Resolve through the async path; accepts both factory kinds.
    pub(crate) async fn resolve_async(
        &self,
        resolver: Resolver,
        argument: Option<AnyArc>,
        forward: Option<&Forward>,
    ) -> Result<AnyArc> {
        let slot = self.slot(argument.as_ref())?;
        let Some(forward) = forward else {
            return self
                .produce_async(Arc::clone(&slot.product), resolver, argument)
                .await;
        };

        let instance = slot.forward(forward.target());
        if let Some(cached) = self.cached(instance.as_ref(), &resolver) {
            return Ok(cached);
        }
        let product = self
            .produce_async(Arc::clone(&slot.product), resolver.clone(), argument)
            .await?;
        let converted = forward.convert(&self.key, product)?;
        Ok(Self::keep(instance.as_ref(), &resolver, converted))
    }

    async fn produce_async(
        &self,
        instance: Arc<dyn Instance>,
        resolver: Resolver,
        argument: Option<AnyArc>,
    ) -> Result<AnyArc> {
        if let Some(cached) = self.cached(instance.as_ref(), &resolver) {
            return Ok(cached);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            service = %self.key,
            depth = resolver.context().depth(),
            "Invoking factory"
        );

        let product = self
            .factory
            .invoke_async(resolver.clone(), argument)
            .await
            .map_err(|failure| self.failure(failure))?;

        self.accept(instance.as_ref(), &resolver, product)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("kind", &self.kind())
            .field("scope", &self.scope.read().name())
            .field("overridable", &self.overridable)
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

// =============================================================================
// Registrable handle
// =============================================================================

/// Typed handle for configuring a registration after it is inserted.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{Container, Scope};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Pool { warmed: AtomicBool }
///
/// let container = Container::new();
/// container
///     .register(|_| Ok(Pool { warmed: AtomicBool::new(false) }))
///     .unwrap()
///     .scope(Scope::Singleton)
///     .after_init(|_, pool| {
///         pool.warmed.store(true, Ordering::SeqCst);
///         Ok(())
///     });
///
/// let pool = container.resolve::<Pool>().unwrap();
/// assert!(pool.warmed.load(Ordering::SeqCst));
/// assert!(Arc::ptr_eq(&pool, &container.resolve::<Pool>().unwrap()));
/// ```
pub struct Registrable<T> {
    registration: Arc<Registration>,
    container: Container,
    _product: PhantomData<fn() -> T>,
}

impl<T: Injectable> Registrable<T> {
    pub(crate) fn new(registration: Arc<Registration>, container: Container) -> Self {
        Self {
            registration,
            container,
            _product: PhantomData,
        }
    }

    /// Replace the scope. Anything cached under the previous scope is dropped.
    pub fn scope(self, scope: Scope) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            service = %self.registration.key(),
            scope = scope.name(),
            "Setting registration scope"
        );

        self.registration.set_scope(scope);
        self
    }

    /// Append a hook that runs after each factory invocation, in order.
    pub fn after_init<F>(self, hook: F) -> Self
    where
        F: Fn(&Resolver, &Arc<T>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(
            move |resolver: &Resolver, product: &AnyArc| -> std::result::Result<(), BoxError> {
                let typed = Arc::clone(product)
                    .downcast::<T>()
                    .map_err(|_| format!("product is not a {}", type_name::<T>()))?;
                hook(resolver, &typed)
            },
        );
        self.registration.add_hook(hook);
        self
    }

    /// Also register this registration as a provider of `U`.
    ///
    /// Resolving `U` runs the same factory and shares the same cache; `cast`
    /// converts the shared product.
    pub fn implements<U, F>(self, cast: F) -> Result<Self>
    where
        U: Injectable,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        let source = self.registration.key();
        let mut key = RegistrationKey::of::<U>()
            .with_name(source.name())
            .with_kind(source.kind());
        if let Some(argument) = source.argument_type() {
            key = key.with_argument_id(argument, source.argument_name().unwrap_or("?"));
        }

        let binding = Binding::forwarded::<T, U, F>(Arc::clone(&self.registration), cast);
        self.container.insert_binding(key, binding)?;
        Ok(self)
    }

    /// Drop every value cached by this registration.
    pub fn release_all(&self) -> &Self {
        self.registration.release_all();
        self
    }

    /// The key this registration was inserted under.
    pub fn key(&self) -> &RegistrationKey {
        self.registration.key()
    }

    /// The currently configured scope.
    pub fn current_scope(&self) -> Scope {
        self.registration.scope()
    }

    /// Number of distinct argument values with their own cache slot.
    pub fn cached_arguments(&self) -> usize {
        self.registration.argument_slots()
    }

    /// Whether a later registration may replace this one.
    pub fn is_overridable(&self) -> bool {
        self.registration.is_overridable()
    }
}

impl<T> fmt::Debug for Registrable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrable")
            .field("registration", &self.registration)
            .finish()
    }
}
