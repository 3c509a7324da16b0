//! Per-call resolution context.
//!
//! A [`ResolutionContext`] is an immutable value threaded through every nested
//! resolve. It records how deep the current call tree is, which tree it
//! belongs to and which keys are under construction. Because it travels with
//! the logical call (inside the [`Resolver`](crate::Resolver) handed to each
//! factory) rather than living in thread-local state, cycle tracking stays
//! correct when an async factory suspends and resumes on another worker.

use crate::{DiError, RegistrationKey, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::debug;

/// A cache holding values for individual trees.
pub(crate) trait TreeCache: Send + Sync {
    /// Drop whatever is cached for `tree`.
    fn release_tree(&self, tree: u64);
}

#[derive(Default)]
struct TreeState {
    finished: bool,
    caches: Vec<Weak<dyn TreeCache>>,
}

struct TreeToken {
    id: u64,
    state: Mutex<TreeState>,
}

/// Identity of one top-level resolution tree.
///
/// Every top-level resolve gets a unique id; nested resolves share it. The
/// tree ends when the top-level resolve that started it returns, at which
/// point every cache that stored a value for it is told to drop that value.
/// Contexts that outlive the tree (a resolver captured by a product) still
/// resolve, but nothing is cached for a finished tree.
#[derive(Clone)]
pub struct TreeId(Arc<TreeToken>);

impl TreeId {
    /// Generate a new unique tree id.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(Arc::new(TreeToken {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(TreeState::default()),
        }))
    }

    /// Get the raw id value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether the top-level resolve of this tree has returned.
    pub fn is_finished(&self) -> bool {
        self.0.state.lock().finished
    }

    /// Ask to be released when the tree ends.
    ///
    /// Returns `false` if the tree has already ended; the caller must then
    /// drop what it stored itself.
    pub(crate) fn track(&self, cache: Weak<dyn TreeCache>) -> bool {
        let mut state = self.0.state.lock();
        if state.finished {
            return false;
        }
        state.caches.retain(|cache| cache.strong_count() > 0);
        state.caches.push(cache);
        true
    }

    /// End the tree and release every tracked cache.
    pub(crate) fn finish(&self) {
        let caches = {
            let mut state = self.0.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            std::mem::take(&mut state.caches)
        };

        let mut released = 0usize;
        for cache in caches.iter().filter_map(Weak::upgrade) {
            cache.release_tree(self.id());
            released += 1;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            tree = self.id(),
            released = released,
            "Resolution tree finished"
        );
        #[cfg(not(feature = "logging"))]
        let _ = released;
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TreeId {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TreeId {}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree-{}", self.id())
    }
}

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeId")
            .field("id", &self.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Ends the tree started by a top-level resolve when dropped.
///
/// Holds nothing for nested resolves, so only the outermost call ends the
/// tree, on every exit path including cancellation of an async resolve.
pub(crate) struct TreeScope(Option<TreeId>);

impl TreeScope {
    /// Guard for the step from `outer` into `inner`.
    pub(crate) fn new(outer: &ResolutionContext, inner: &ResolutionContext) -> Self {
        if outer.depth == 0 {
            Self(inner.tree.clone())
        } else {
            Self(None)
        }
    }
}

impl Drop for TreeScope {
    fn drop(&mut self) {
        if let Some(tree) = &self.0 {
            tree.finish();
        }
    }
}

#[derive(Debug)]
struct PathNode {
    key: RegistrationKey,
    parent: Option<Arc<PathNode>>,
    len: usize,
}

/// Immutable record of an in-flight resolution.
///
/// Every operation returns a new value; the receiver is never changed, so a
/// failed nested resolve cannot leave a stale entry behind in the caller's
/// context.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{RegistrationKey, ResolutionContext};
///
/// let root = ResolutionContext::root();
/// assert_eq!(root.depth(), 0);
///
/// let tree = root.advance();
/// assert_eq!(tree.depth(), 1);
///
/// let inside = tree.enter(&RegistrationKey::of::<u32>()).unwrap();
/// assert!(inside.enter(&RegistrationKey::of::<u32>()).is_err());
/// assert!(tree.path().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    depth: u32,
    tree: Option<TreeId>,
    path: Option<Arc<PathNode>>,
}

impl ResolutionContext {
    /// The empty context of a caller that is not resolving anything yet.
    #[inline]
    pub fn root() -> Self {
        Self::default()
    }

    /// Start a new resolution tree: depth 1, new tree id, empty path.
    pub fn fresh() -> Self {
        let tree = TreeId::new();

        #[cfg(feature = "logging")]
        debug!(
            target: "graph_injector",
            tree = tree.id(),
            "Starting new resolution tree"
        );

        Self {
            depth: 1,
            tree: Some(tree),
            path: None,
        }
    }

    /// Descend one level inside the current tree.
    #[inline]
    pub fn next(&self) -> Self {
        Self {
            depth: self.depth + 1,
            tree: self.tree.clone(),
            path: self.path.clone(),
        }
    }

    /// [`fresh`](Self::fresh) at depth 0, [`next`](Self::next) otherwise.
    #[inline]
    pub fn advance(&self) -> Self {
        if self.depth == 0 { Self::fresh() } else { self.next() }
    }

    /// Append `key` to the path.
    #[inline]
    pub fn push(&self, key: RegistrationKey) -> Self {
        let len = self.path.as_ref().map_or(0, |node| node.len) + 1;
        Self {
            depth: self.depth,
            tree: self.tree.clone(),
            path: Some(Arc::new(PathNode {
                key,
                parent: self.path.clone(),
                len,
            })),
        }
    }

    /// Remove the last key from the path.
    #[inline]
    pub fn pop(&self) -> Self {
        Self {
            depth: self.depth,
            tree: self.tree.clone(),
            path: self.path.as_ref().and_then(|node| node.parent.clone()),
        }
    }

    /// Check for a cycle on `key`, then push it.
    pub fn enter(&self, key: &RegistrationKey) -> Result<Self> {
        if self.contains(key) {
            let mut path = self.path();
            path.push(key.clone());

            #[cfg(feature = "logging")]
            debug!(
                target: "graph_injector",
                service = %key,
                depth = self.depth,
                "Circular dependency detected"
            );

            return Err(DiError::circular(key, path));
        }
        Ok(self.push(key.clone()))
    }

    /// Whether `key` is currently under construction.
    pub fn contains(&self, key: &RegistrationKey) -> bool {
        let mut current = self.path.as_deref();
        while let Some(node) = current {
            if &node.key == key {
                return true;
            }
            current = node.parent.as_deref();
        }
        false
    }

    /// Keys under construction, outermost first.
    pub fn path(&self) -> Vec<RegistrationKey> {
        let mut keys = Vec::with_capacity(self.path_len());
        let mut current = self.path.as_deref();
        while let Some(node) = current {
            keys.push(node.key.clone());
            current = node.parent.as_deref();
        }
        keys.reverse();
        keys
    }

    /// Number of keys under construction.
    #[inline]
    pub fn path_len(&self) -> usize {
        self.path.as_ref().map_or(0, |node| node.len)
    }

    /// Nesting depth (0 = no resolution underway).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The tree this context belongs to.
    #[inline]
    pub fn tree(&self) -> Option<&TreeId> {
        self.tree.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_starts_tree() {
        let a = ResolutionContext::fresh();
        let b = ResolutionContext::fresh();

        assert_eq!(a.depth(), 1);
        assert!(a.path().is_empty());
        assert_ne!(a.tree(), b.tree());
    }

    #[test]
    fn test_next_keeps_tree_and_path() {
        let ctx = ResolutionContext::fresh().push(RegistrationKey::of::<u8>());
        let nested = ctx.next();

        assert_eq!(nested.depth(), 2);
        assert_eq!(nested.tree(), ctx.tree());
        assert_eq!(nested.path(), vec![RegistrationKey::of::<u8>()]);
    }

    #[test]
    fn test_advance_from_root_is_fresh() {
        let root = ResolutionContext::root();
        assert!(root.tree().is_none());

        let started = root.advance();
        assert_eq!(started.depth(), 1);
        assert!(started.tree().is_some());

        let nested = started.advance();
        assert_eq!(nested.tree(), started.tree());
    }

    #[test]
    fn test_push_pop_are_persistent() {
        let base = ResolutionContext::fresh();
        let one = base.push(RegistrationKey::of::<u8>());
        let two = one.push(RegistrationKey::of::<u16>());

        assert_eq!(base.path_len(), 0);
        assert_eq!(one.path_len(), 1);
        assert_eq!(
            two.path(),
            vec![RegistrationKey::of::<u8>(), RegistrationKey::of::<u16>()]
        );
        assert_eq!(two.pop().path(), one.path());
    }

    #[test]
    fn test_enter_detects_cycle() {
        let ctx = ResolutionContext::fresh()
            .enter(&RegistrationKey::of::<u8>())
            .unwrap()
            .enter(&RegistrationKey::of::<u16>())
            .unwrap();

        match ctx.enter(&RegistrationKey::of::<u8>()) {
            Err(DiError::CircularDependency { key, path }) => {
                assert_eq!(key, RegistrationKey::of::<u8>());
                assert_eq!(path.len(), 3);
                assert!(path.contains(&RegistrationKey::of::<u16>()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }

        // the failed enter left the context untouched
        assert_eq!(ctx.path_len(), 2);
    }

    struct Recorded(Mutex<Vec<u64>>);

    impl TreeCache for Recorded {
        fn release_tree(&self, tree: u64) {
            self.0.lock().push(tree);
        }
    }

    #[test]
    fn test_finish_releases_tracked_caches() {
        let ctx = ResolutionContext::fresh();
        let tree = ctx.tree().unwrap().clone();
        let cache = Arc::new(Recorded(Mutex::new(Vec::new())));
        let weak: Weak<dyn TreeCache> = Arc::<Recorded>::downgrade(&cache);

        assert!(tree.track(weak.clone()));
        assert!(!tree.is_finished());

        tree.finish();
        tree.finish();
        assert!(tree.is_finished());
        assert_eq!(*cache.0.lock(), vec![tree.id()]);

        // late arrivals are refused
        assert!(!tree.track(weak));
    }

    #[test]
    fn test_tree_scope_only_ends_top_level() {
        let root = ResolutionContext::root();
        let top = root.advance();
        let nested = top.advance();

        drop(TreeScope::new(&top, &nested));
        assert!(!top.tree().unwrap().is_finished());

        drop(TreeScope::new(&root, &top));
        assert!(top.tree().unwrap().is_finished());
        assert!(nested.tree().unwrap().is_finished());
    }

    #[test]
    fn test_tree_display() {
        let tree = TreeId::new();
        assert!(tree.to_string().starts_with("tree-"));
    }
}
