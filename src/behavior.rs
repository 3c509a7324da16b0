//! Registration and resolution observers

use crate::storage::Binding;
use crate::{Container, RegistrationKey, Scope};

/// Read-only view of a registration, as seen through one key.
#[derive(Debug, Clone)]
pub struct RegistrationInfo {
    key: RegistrationKey,
    source: RegistrationKey,
    scope: Scope,
    overridable: bool,
}

impl RegistrationInfo {
    pub(crate) fn of(key: &RegistrationKey, binding: &Binding) -> Self {
        let registration = binding.registration();
        Self {
            key: key.clone(),
            source: registration.key().clone(),
            scope: registration.scope(),
            overridable: registration.is_overridable(),
        }
    }

    /// The key the event happened under.
    #[inline]
    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    /// The key of the registration that owns the factory. Differs from
    /// [`key`](Self::key) for forwarded types.
    #[inline]
    pub fn source(&self) -> &RegistrationKey {
        &self.source
    }

    /// The registration's scope at the time of the event.
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[inline]
    pub fn is_overridable(&self) -> bool {
        self.overridable
    }

    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.key != self.source
    }

    /// Registration name, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.key.name()
    }
}

/// Observer notified after registry events.
///
/// Callbacks run synchronously, in the order behaviors were added, after the
/// change is committed. They run outside the registry's locks, so a behavior
/// may itself call back into the container.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{Behavior, Container, RegistrationInfo, Scope};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountSingletons(AtomicUsize);
///
/// impl Behavior for CountSingletons {
///     fn did_resolve(&self, _container: &Container, info: &RegistrationInfo) {
///         if matches!(info.scope(), Scope::Singleton) {
///             self.0.fetch_add(1, Ordering::SeqCst);
///         }
///     }
/// }
///
/// let counter = Arc::new(CountSingletons::default());
/// let container = Container::new();
/// container.add_behavior(counter.clone());
/// container.register(|_| Ok(1u8)).unwrap().scope(Scope::Singleton);
/// container.register(|_| Ok(1u16)).unwrap();
///
/// container.resolve::<u8>().unwrap();
/// container.resolve::<u16>().unwrap();
/// assert_eq!(counter.0.load(Ordering::SeqCst), 1);
/// ```
pub trait Behavior: Send + Sync {
    /// A registration was inserted (or replaced).
    fn did_register(&self, _container: &Container, _info: &RegistrationInfo) {}

    /// A value was resolved.
    fn did_resolve(&self, _container: &Container, _info: &RegistrationInfo) {}
}
