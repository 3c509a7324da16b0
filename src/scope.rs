//! Instance lifetime scopes
//!
//! A [`Scope`] describes how a registration caches what its factory builds.
//! Each registration (and, for argument registrations, each distinct argument
//! value) instantiates its own [`Instance`] from the descriptor.

use crate::context::TreeCache;
use crate::{AnyArc, ResolutionContext};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// A caching policy for produced values.
///
/// `get` returns the value accepted by the latest matching `set`; after
/// `release` (or `release_all`) it returns `None` for that context.
pub trait Instance: Send + Sync {
    /// Cached value for `context`, if any
    fn get(&self, context: &ResolutionContext) -> Option<AnyArc>;

    /// Offer a freshly built value for caching
    fn set(&self, product: AnyArc, context: &ResolutionContext);

    /// Forget the value cached for `context`
    fn release(&self, context: &ResolutionContext);

    /// Forget every cached value
    fn release_all(&self);
}

/// Lifetime descriptor used to configure a registration.
///
/// The default is [`Scope::Graph`].
#[derive(Debug, Clone, Default)]
pub enum Scope {
    /// New value on every resolve
    Transient,
    /// One value for the life of the registration; first write wins
    Singleton,
    /// Shared while someone outside the container holds it
    Weak,
    /// One value per top-level resolve call
    #[default]
    Graph,
    /// Singleton that a [`DisposalGroup`] can reset
    Disposable(DisposalGroup),
    /// First hit among children; writes and releases go to all of them
    Composite(Vec<Scope>),
}

impl Scope {
    /// Create a fresh cache of this kind.
    pub fn instantiate(&self) -> Arc<dyn Instance> {
        match self {
            Scope::Transient => Arc::new(TransientInstance),
            Scope::Singleton => Arc::new(SingletonInstance::default()),
            Scope::Weak => Arc::new(WeakInstance::default()),
            Scope::Graph => Arc::new(GraphInstance::default()),
            Scope::Disposable(group) => group.instantiate(),
            Scope::Composite(children) => Arc::new(CompositeInstance::new(
                children.iter().map(Scope::instantiate).collect(),
            )),
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Scope::Transient => "transient",
            Scope::Singleton => "singleton",
            Scope::Weak => "weak",
            Scope::Graph => "graph",
            Scope::Disposable(_) => "disposable",
            Scope::Composite(_) => "composite",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Transient
// =============================================================================

/// Never caches.
#[derive(Debug, Default)]
pub struct TransientInstance;

impl Instance for TransientInstance {
    #[inline]
    fn get(&self, _context: &ResolutionContext) -> Option<AnyArc> {
        None
    }

    #[inline]
    fn set(&self, _product: AnyArc, _context: &ResolutionContext) {}

    #[inline]
    fn release(&self, _context: &ResolutionContext) {}

    #[inline]
    fn release_all(&self) {}
}

// =============================================================================
// Singleton
// =============================================================================

/// One slot, set once.
#[derive(Default)]
pub struct SingletonInstance {
    slot: RwLock<Option<AnyArc>>,
}

impl Instance for SingletonInstance {
    #[inline]
    fn get(&self, _context: &ResolutionContext) -> Option<AnyArc> {
        self.slot.read().clone()
    }

    fn set(&self, product: AnyArc, _context: &ResolutionContext) {
        let mut slot = self.slot.write();
        if slot.is_none() {
            *slot = Some(product);
        }
    }

    fn release(&self, _context: &ResolutionContext) {
        self.release_all();
    }

    fn release_all(&self) {
        self.slot.write().take();
    }
}

impl fmt::Debug for SingletonInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonInstance")
            .field("cached", &self.slot.read().is_some())
            .finish()
    }
}

// =============================================================================
// Weak
// =============================================================================

/// Non-owning slot; empties itself when the last outside owner drops.
#[derive(Default)]
pub struct WeakInstance {
    slot: RwLock<Option<Weak<dyn Any + Send + Sync>>>,
}

impl Instance for WeakInstance {
    #[inline]
    fn get(&self, _context: &ResolutionContext) -> Option<AnyArc> {
        self.slot.read().as_ref().and_then(Weak::upgrade)
    }

    fn set(&self, product: AnyArc, _context: &ResolutionContext) {
        let mut slot = self.slot.write();
        let live = slot.as_ref().is_some_and(|weak| weak.strong_count() > 0);
        if !live {
            *slot = Some(Arc::downgrade(&product));
        }
    }

    fn release(&self, _context: &ResolutionContext) {
        self.release_all();
    }

    fn release_all(&self) {
        self.slot.write().take();
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alive = self
            .slot
            .read()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0);
        f.debug_struct("WeakInstance").field("alive", &alive).finish()
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Per-tree cache keyed by the context's tree id.
///
/// A value lives until the top-level resolve of its tree returns. Resolves
/// through a context whose tree has already ended are not cached.
#[derive(Default)]
pub struct GraphInstance {
    entries: Arc<GraphEntries>,
}

#[derive(Default)]
struct GraphEntries(DashMap<u64, AnyArc, RandomState>);

impl TreeCache for GraphEntries {
    fn release_tree(&self, tree: u64) {
        self.0.remove(&tree);
    }
}

impl GraphInstance {
    /// Number of trees currently holding a value.
    pub fn len(&self) -> usize {
        self.entries.0.len()
    }

    /// Whether no tree holds a value.
    pub fn is_empty(&self) -> bool {
        self.entries.0.is_empty()
    }
}

impl Instance for GraphInstance {
    fn get(&self, context: &ResolutionContext) -> Option<AnyArc> {
        let tree = context.tree()?;
        self.entries
            .0
            .get(&tree.id())
            .map(|entry| Arc::clone(entry.value()))
    }

    fn set(&self, product: AnyArc, context: &ResolutionContext) {
        let Some(tree) = context.tree() else {
            return;
        };
        if tree.is_finished() {
            return;
        }

        match self.entries.0.entry(tree.id()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(product);
            }
        }

        let cache: Weak<dyn TreeCache> = Arc::<GraphEntries>::downgrade(&self.entries);
        if !tree.track(cache) {
            // the tree ended while we were inserting
            self.entries.0.remove(&tree.id());
        }
    }

    fn release(&self, context: &ResolutionContext) {
        if let Some(tree) = context.tree() {
            self.entries.0.remove(&tree.id());
        }
    }

    fn release_all(&self) {
        self.entries.0.clear();
    }
}

impl fmt::Debug for GraphInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphInstance")
            .field("trees", &self.len())
            .finish()
    }
}

// =============================================================================
// Disposable singleton
// =============================================================================

/// Singleton that belongs to a [`DisposalGroup`].
#[derive(Debug, Default)]
pub struct DisposableSingletonInstance {
    inner: SingletonInstance,
}

impl Instance for DisposableSingletonInstance {
    #[inline]
    fn get(&self, context: &ResolutionContext) -> Option<AnyArc> {
        self.inner.get(context)
    }

    #[inline]
    fn set(&self, product: AnyArc, context: &ResolutionContext) {
        self.inner.set(product, context);
    }

    #[inline]
    fn release(&self, context: &ResolutionContext) {
        self.inner.release(context);
    }

    #[inline]
    fn release_all(&self) {
        self.inner.release_all();
    }
}

/// Shared reset switch for disposable singletons.
///
/// Every registration configured with `Scope::Disposable(group)` caches like a
/// singleton until [`release_all`](DisposalGroup::release_all) is called.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{Container, DisposalGroup, Scope};
/// use std::sync::Arc;
///
/// struct Session(u32);
///
/// let sessions = DisposalGroup::new();
/// let container = Container::new();
/// container
///     .register(|_| Ok(Session(7)))
///     .unwrap()
///     .scope(Scope::Disposable(sessions.clone()));
///
/// let first = container.resolve::<Session>().unwrap();
/// assert!(Arc::ptr_eq(&first, &container.resolve::<Session>().unwrap()));
///
/// sessions.release_all();
/// assert!(!Arc::ptr_eq(&first, &container.resolve::<Session>().unwrap()));
/// ```
#[derive(Clone, Default)]
pub struct DisposalGroup {
    members: Arc<Mutex<Vec<Weak<DisposableSingletonInstance>>>>,
}

impl DisposalGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    fn instantiate(&self) -> Arc<dyn Instance> {
        let instance = Arc::new(DisposableSingletonInstance::default());
        let mut members = self.members.lock();
        members.retain(|weak| weak.strong_count() > 0);
        members.push(Arc::downgrade(&instance));
        instance
    }

    /// Drop every value cached by every member.
    pub fn release_all(&self) {
        let members = self.members.lock();
        let mut released = 0usize;
        for instance in members.iter().filter_map(Weak::upgrade) {
            instance.release_all();
            released += 1;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            released = released,
            "Disposal group released"
        );
        #[cfg(not(feature = "logging"))]
        let _ = released;
    }

    /// Number of live member caches.
    pub fn len(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether the group has no live members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DisposalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalGroup")
            .field("members", &self.len())
            .finish()
    }
}

// =============================================================================
// Composite
// =============================================================================

/// Ordered list of child caches.
pub struct CompositeInstance {
    children: Vec<Arc<dyn Instance>>,
}

impl CompositeInstance {
    /// Wrap the given children, searched in order.
    pub fn new(children: Vec<Arc<dyn Instance>>) -> Self {
        Self { children }
    }
}

impl Instance for CompositeInstance {
    fn get(&self, context: &ResolutionContext) -> Option<AnyArc> {
        let hit = self.children.iter().find_map(|child| child.get(context));

        #[cfg(feature = "logging")]
        if hit.is_some() {
            trace!(target: "graph_injector", "Composite scope hit");
        }

        hit
    }

    fn set(&self, product: AnyArc, context: &ResolutionContext) {
        for child in &self.children {
            child.set(Arc::clone(&product), context);
        }
    }

    fn release(&self, context: &ResolutionContext) {
        for child in &self.children {
            child.release(context);
        }
    }

    fn release_all(&self) {
        for child in &self.children {
            child.release_all();
        }
    }
}

impl fmt::Debug for CompositeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeInstance")
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(value: u32) -> AnyArc {
        Arc::new(value)
    }

    fn read(value: Option<AnyArc>) -> Option<u32> {
        value.and_then(|any| any.downcast::<u32>().ok()).map(|v| *v)
    }

    #[test]
    fn test_transient_never_caches() {
        let ctx = ResolutionContext::fresh();
        let scope = Scope::Transient.instantiate();
        scope.set(product(1), &ctx);
        assert!(scope.get(&ctx).is_none());
    }

    #[test]
    fn test_singleton_first_write_wins() {
        let ctx = ResolutionContext::fresh();
        let scope = Scope::Singleton.instantiate();

        scope.set(product(1), &ctx);
        scope.set(product(2), &ctx);
        assert_eq!(read(scope.get(&ctx)), Some(1));

        // context is ignored
        assert_eq!(read(scope.get(&ResolutionContext::fresh())), Some(1));

        scope.release(&ctx);
        assert!(scope.get(&ctx).is_none());
    }

    #[test]
    fn test_weak_follows_outside_owner() {
        let ctx = ResolutionContext::fresh();
        let scope = Scope::Weak.instantiate();

        let held = product(5);
        scope.set(Arc::clone(&held), &ctx);
        assert_eq!(read(scope.get(&ctx)), Some(5));

        drop(held);
        assert!(scope.get(&ctx).is_none());

        scope.set(product(6), &ctx);
        // nobody holds the new value either
        assert!(scope.get(&ctx).is_none());
    }

    #[test]
    fn test_graph_is_per_tree() {
        let scope = GraphInstance::default();
        let a = ResolutionContext::fresh();
        let b = ResolutionContext::fresh();

        scope.set(product(1), &a);
        assert_eq!(read(scope.get(&a.next())), Some(1));
        assert!(scope.get(&b).is_none());

        scope.set(product(2), &b);
        assert_eq!(read(scope.get(&b)), Some(2));
        assert_eq!(read(scope.get(&a)), Some(1));

        scope.release(&a);
        assert!(scope.get(&a).is_none());
        assert_eq!(read(scope.get(&b)), Some(2));
    }

    #[test]
    fn test_graph_ignores_root_context() {
        let scope = GraphInstance::default();
        let root = ResolutionContext::root();
        scope.set(product(1), &root);
        assert!(scope.get(&root).is_none());
        assert!(scope.is_empty());
    }

    #[test]
    fn test_graph_releases_finished_trees() {
        let scope = GraphInstance::default();
        let finished = ResolutionContext::fresh();
        let live = ResolutionContext::fresh();

        let held = product(1);
        let weak = Arc::downgrade(&held);
        scope.set(held, &finished);
        scope.set(product(2), &live);
        assert_eq!(scope.len(), 2);

        finished.tree().unwrap().finish();
        assert_eq!(scope.len(), 1);
        assert!(weak.upgrade().is_none());
        assert_eq!(read(scope.get(&live)), Some(2));
    }

    #[test]
    fn test_graph_does_not_cache_for_finished_tree() {
        let scope = GraphInstance::default();
        let ctx = ResolutionContext::fresh();
        ctx.tree().unwrap().finish();

        scope.set(product(1), &ctx.next());
        assert!(scope.get(&ctx).is_none());
        assert!(scope.is_empty());
    }

    #[test]
    fn test_disposal_group_resets_members() {
        let group = DisposalGroup::new();
        let ctx = ResolutionContext::fresh();
        let first = Scope::Disposable(group.clone()).instantiate();
        let second = Scope::Disposable(group.clone()).instantiate();
        assert_eq!(group.len(), 2);

        first.set(product(1), &ctx);
        second.set(product(2), &ctx);
        group.release_all();

        assert!(first.get(&ctx).is_none());
        assert!(second.get(&ctx).is_none());

        drop(second);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_composite_first_hit_and_broadcast() {
        let ctx = ResolutionContext::fresh();
        let scope = Scope::Composite(vec![Scope::Weak, Scope::Singleton]).instantiate();

        let held = product(3);
        scope.set(Arc::clone(&held), &ctx);
        assert_eq!(read(scope.get(&ctx)), Some(3));

        // the singleton child keeps the value alive
        drop(held);
        assert_eq!(read(scope.get(&ctx)), Some(3));

        scope.release_all();
        assert!(scope.get(&ctx).is_none());
    }

    #[test]
    fn test_default_scope_is_graph() {
        assert_eq!(Scope::default().name(), "graph");
        assert_eq!(Scope::Composite(vec![]).to_string(), "composite");
    }
}
