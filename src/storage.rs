//! Concurrent registration storage
//!
//! Uses DashMap for lock-free concurrent access. The per-shard entry lock is
//! the mutual-exclusion boundary for the override check and the insert.

use crate::registration::Registration;
use crate::{AnyArc, DiError, Injectable, RegistrationKey, Result};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::{TypeId, type_name};
use std::sync::Arc;

type Cast = Arc<dyn Fn(AnyArc) -> Option<AnyArc> + Send + Sync>;

/// Conversion from a registration's product to a type it is forwarded as.
#[derive(Clone)]
pub(crate) struct Forward {
    cast: Cast,
    target: TypeId,
    target_name: &'static str,
}

impl Forward {
    pub(crate) fn new<T, U, F>(cast: F) -> Self
    where
        T: Injectable,
        U: Injectable,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        Self {
            cast: Arc::new(move |product: AnyArc| -> Option<AnyArc> {
                let typed = product.downcast::<T>().ok()?;
                Some(cast(typed) as AnyArc)
            }),
            target: TypeId::of::<U>(),
            target_name: type_name::<U>(),
        }
    }

    /// The forwarded type; each one gets its own cache next to the source's.
    #[inline]
    pub(crate) fn target(&self) -> TypeId {
        self.target
    }

    /// Convert a product of the registration keyed `source`.
    pub(crate) fn convert(&self, source: &RegistrationKey, product: AnyArc) -> Result<AnyArc> {
        (self.cast)(product).ok_or_else(|| DiError::InvalidForwarding {
            key: source.clone(),
            target: self.target_name,
        })
    }
}

/// A registration as seen through one key.
///
/// A forwarded binding shares the registration with the key it was forwarded
/// from. The registration caches converted values under the same scope as
/// its own products.
#[derive(Clone)]
pub(crate) struct Binding {
    registration: Arc<Registration>,
    forward: Option<Forward>,
}

impl Binding {
    pub(crate) fn direct(registration: Arc<Registration>) -> Self {
        Self {
            registration,
            forward: None,
        }
    }

    pub(crate) fn forwarded<T, U, F>(registration: Arc<Registration>, cast: F) -> Self
    where
        T: Injectable,
        U: Injectable,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        Self {
            registration,
            forward: Some(Forward::new::<T, U, F>(cast)),
        }
    }

    #[inline]
    pub(crate) fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    #[inline]
    pub(crate) fn forward(&self) -> Option<&Forward> {
        self.forward.as_ref()
    }

    #[inline]
    pub(crate) fn is_overridable(&self) -> bool {
        self.registration.is_overridable()
    }

    #[inline]
    pub(crate) fn is_forwarded(&self) -> bool {
        self.forward.is_some()
    }
}

/// Thread-safe map from registration key to binding.
///
/// Uses `DashMap` with `ahash` for maximum concurrent performance.
pub(crate) struct RegistrationStorage {
    bindings: DashMap<RegistrationKey, Binding, RandomState>,
}

impl RegistrationStorage {
    /// Create new empty storage with optimized shard count.
    ///
    /// Uses 8 shards as a balance between creation overhead and concurrent
    /// read performance. Default DashMap uses num_cpus * 4 shards which is
    /// overkill for typical registries with <50 registrations.
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            bindings: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
        }
    }

    /// Create with pre-allocated capacity and optimized shards.
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self {
            bindings: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
        }
    }

    /// Insert `binding` under `key`.
    ///
    /// An occupied slot is replaced only when both the existing and the new
    /// binding are overridable. Returns whether a binding was replaced.
    pub(crate) fn insert(&self, key: RegistrationKey, binding: Binding) -> Result<bool> {
        match self.bindings.entry(key) {
            Entry::Occupied(mut entry) => {
                if !(entry.get().is_overridable() && binding.is_overridable()) {
                    return Err(DiError::already_registered(entry.key()));
                }
                entry.insert(binding);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(binding);
                Ok(false)
            }
        }
    }

    /// Clone out the binding for `key`; no shard lock is held afterwards.
    #[inline]
    pub(crate) fn get(&self, key: &RegistrationKey) -> Option<Binding> {
        self.bindings.get(key).map(|entry| entry.value().clone())
    }

    #[inline]
    pub(crate) fn contains(&self, key: &RegistrationKey) -> bool {
        self.bindings.contains_key(key)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.bindings.clear();
    }

    pub(crate) fn keys(&self) -> Vec<RegistrationKey> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for RegistrationStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegistrationStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationStorage")
            .field("count", &self.len())
            .finish()
    }
}
