//! Factory types for creating products
//!
//! A factory wraps a user closure that builds a product from a [`Resolver`]
//! (and, for argument factories, an argument value). Bodies are stored
//! type-erased so registrations of every product type share one storage
//! format; the typed wrappers only exist at the registration boundary.

use crate::{AnyArc, BoxError, FactoryKind, Injectable, Resolver};
use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type SyncFn = Arc<dyn Fn(&Resolver, Option<AnyArc>) -> FactoryResult + Send + Sync>;
type AsyncFn =
    Arc<dyn Fn(Resolver, Option<AnyArc>) -> BoxFuture<'static, FactoryResult> + Send + Sync>;

pub(crate) type FactoryResult = std::result::Result<AnyArc, FactoryFailure>;

/// Why an erased factory call did not produce a value.
#[derive(Debug)]
pub(crate) enum FactoryFailure {
    /// Synchronous call on a suspending body
    Suspends,
    /// The erased argument was not of the declared type
    Argument(&'static str),
    /// The body itself failed
    Body(BoxError),
}

enum Body {
    Sync(SyncFn),
    Async(AsyncFn),
}

fn sync_body<F>(body: F) -> SyncFn
where
    F: Fn(&Resolver, Option<AnyArc>) -> FactoryResult + Send + Sync + 'static,
{
    Arc::new(body)
}

fn async_body<F>(body: F) -> AsyncFn
where
    F: Fn(Resolver, Option<AnyArc>) -> BoxFuture<'static, FactoryResult> + Send + Sync + 'static,
{
    Arc::new(body)
}

fn next_factory_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Type-erased factory owned by a registration.
pub(crate) struct ErasedFactory {
    id: u64,
    body: Body,
}

impl ErasedFactory {
    fn new(body: Body) -> Self {
        Self {
            id: next_factory_id(),
            body,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn kind(&self) -> FactoryKind {
        match self.body {
            Body::Sync(_) => FactoryKind::Sync,
            Body::Async(_) => FactoryKind::Async,
        }
    }

    /// Run a synchronous body. Suspending bodies refuse.
    pub(crate) fn invoke(&self, resolver: &Resolver, argument: Option<AnyArc>) -> FactoryResult {
        match &self.body {
            Body::Sync(body) => body(resolver, argument),
            Body::Async(_) => Err(FactoryFailure::Suspends),
        }
    }

    /// Run either kind of body.
    pub(crate) fn invoke_async(
        &self,
        resolver: Resolver,
        argument: Option<AnyArc>,
    ) -> BoxFuture<'static, FactoryResult> {
        match &self.body {
            Body::Sync(body) => {
                let result = body(&resolver, argument);
                Box::pin(std::future::ready(result))
            }
            Body::Async(body) => body(resolver, argument),
        }
    }
}

impl fmt::Debug for ErasedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedFactory")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .finish()
    }
}

fn erase<T: Injectable>(result: std::result::Result<T, BoxError>) -> FactoryResult {
    result
        .map(|product| Arc::new(product) as AnyArc)
        .map_err(FactoryFailure::Body)
}

fn take_argument<A: Clone + Send + Sync + 'static>(
    argument: Option<AnyArc>,
) -> std::result::Result<A, FactoryFailure> {
    argument
        .and_then(|any| any.downcast::<A>().ok())
        .map(|arc| A::clone(&arc))
        .ok_or(FactoryFailure::Argument(type_name::<A>()))
}

// =============================================================================
// Factory
// =============================================================================

/// Builds a `T` from a [`Resolver`].
///
/// Identity is per construction: two factories wrapping identical closures
/// are still different factories.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{Factory, FactoryKind, Resolver};
///
/// let sync = Factory::new(|_: &Resolver| Ok(42u32));
/// assert_eq!(sync.kind(), FactoryKind::Sync);
///
/// let suspending = Factory::from_async(|_: Resolver| async { Ok(42u32) });
/// assert_eq!(suspending.kind(), FactoryKind::Async);
/// assert_ne!(sync, Factory::new(|_: &Resolver| Ok(42u32)));
/// ```
pub struct Factory<T> {
    erased: ErasedFactory,
    _product: PhantomData<fn() -> T>,
}

impl<T: Injectable> Factory<T> {
    /// Wrap a synchronous body.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Resolver) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let body = sync_body(move |resolver, _argument| erase(body(resolver)));
        Self {
            erased: ErasedFactory::new(Body::Sync(body)),
            _product: PhantomData,
        }
    }

    /// Wrap a suspending body.
    ///
    /// The body receives an owned [`Resolver`] so nested resolves can be
    /// awaited and the task may resume on any thread.
    pub fn from_async<F, Fut>(body: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        let body = async_body(move |resolver, _argument| {
            let pending = body(resolver);
            Box::pin(async move { erase(pending.await) })
        });
        Self {
            erased: ErasedFactory::new(Body::Async(body)),
            _product: PhantomData,
        }
    }
}

impl<T> Factory<T> {
    /// Whether the body suspends.
    #[inline]
    pub fn kind(&self) -> FactoryKind {
        self.erased.kind()
    }

    /// Unique identity of this factory.
    #[inline]
    pub fn id(&self) -> u64 {
        self.erased.id()
    }

    pub(crate) fn into_erased(self) -> ErasedFactory {
        self.erased
    }
}

impl<T> PartialEq for Factory<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T> Eq for Factory<T> {}

impl<T> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("product", &type_name::<T>())
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

// =============================================================================
// ArgumentFactory
// =============================================================================

/// Builds a `T` from a [`Resolver`] and an argument of type `A`.
///
/// Arguments are hashed to pick a cache slot, so `A` must be
/// `Hash + Eq + Clone`.
pub struct ArgumentFactory<T, A> {
    erased: ErasedFactory,
    _product: PhantomData<fn(A) -> T>,
}

impl<T, A> ArgumentFactory<T, A>
where
    T: Injectable,
    A: Clone + Send + Sync + 'static,
{
    /// Wrap a synchronous body.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Resolver, A) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let body = sync_body(move |resolver, argument| {
            let argument = take_argument::<A>(argument)?;
            erase(body(resolver, argument))
        });
        Self {
            erased: ErasedFactory::new(Body::Sync(body)),
            _product: PhantomData,
        }
    }

    /// Wrap a suspending body.
    pub fn from_async<F, Fut>(body: F) -> Self
    where
        F: Fn(Resolver, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        let body = async_body(move |resolver, argument| match take_argument::<A>(argument) {
            Ok(argument) => {
                let pending = body(resolver, argument);
                Box::pin(async move { erase(pending.await) })
            }
            Err(failure) => Box::pin(std::future::ready(Err(failure))),
        });
        Self {
            erased: ErasedFactory::new(Body::Async(body)),
            _product: PhantomData,
        }
    }
}

impl<T, A> ArgumentFactory<T, A> {
    /// Whether the body suspends.
    #[inline]
    pub fn kind(&self) -> FactoryKind {
        self.erased.kind()
    }

    /// Unique identity of this factory.
    #[inline]
    pub fn id(&self) -> u64 {
        self.erased.id()
    }

    pub(crate) fn into_erased(self) -> ErasedFactory {
        self.erased
    }
}

impl<T, A> PartialEq for ArgumentFactory<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T, A> Eq for ArgumentFactory<T, A> {}

impl<T, A> fmt::Debug for ArgumentFactory<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentFactory")
            .field("product", &type_name::<T>())
            .field("argument", &type_name::<A>())
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Container;

    fn resolver() -> Resolver {
        Resolver::new(Container::new())
    }

    fn read<T: Injectable + Copy>(result: FactoryResult) -> T {
        match result {
            Ok(any) => *any.downcast::<T>().ok().unwrap(),
            Err(failure) => panic!("factory failed: {failure:?}"),
        }
    }

    #[test]
    fn test_sync_factory_invokes_both_paths() {
        let factory = Factory::new(|_: &Resolver| Ok(7u32)).into_erased();
        assert_eq!(read::<u32>(factory.invoke(&resolver(), None)), 7);

        let result = tokio_test_block_on(factory.invoke_async(resolver(), None));
        assert_eq!(read::<u32>(result), 7);
    }

    #[test]
    fn test_async_factory_refuses_sync_path() {
        let factory = Factory::from_async(|_: Resolver| async { Ok(7u32) }).into_erased();
        assert!(matches!(
            factory.invoke(&resolver(), None),
            Err(FactoryFailure::Suspends)
        ));

        let result = tokio_test_block_on(factory.invoke_async(resolver(), None));
        assert_eq!(read::<u32>(result), 7);
    }

    #[test]
    fn test_body_errors_are_not_wrapped() {
        let factory =
            Factory::<u32>::new(|_: &Resolver| Err("no database".into())).into_erased();

        match factory.invoke(&resolver(), None) {
            Err(FactoryFailure::Body(error)) => assert_eq!(error.to_string(), "no database"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_argument_factory() {
        let factory =
            ArgumentFactory::new(|_: &Resolver, name: String| Ok(format!("{name}!"))).into_erased();

        let argument: AnyArc = Arc::new(String::from("hi"));
        let result = factory.invoke(&resolver(), Some(argument)).ok().unwrap();
        assert_eq!(result.downcast::<String>().ok().unwrap().as_str(), "hi!");

        let wrong: AnyArc = Arc::new(5u8);
        assert!(matches!(
            factory.invoke(&resolver(), Some(wrong)),
            Err(FactoryFailure::Argument(_))
        ));
    }

    #[test]
    fn test_identity_not_body() {
        let a = Factory::new(|_: &Resolver| Ok(1u8));
        let b = Factory::new(|_: &Resolver| Ok(1u8));
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    fn tokio_test_block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }
}
