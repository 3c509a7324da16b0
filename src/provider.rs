//! Provider traits for dependency injection
//!
//! These traits define what types can be produced by the container and how
//! bulk registration units plug into it.

use crate::{Container, Resolver, Result};
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Type-erased product as stored in scope caches.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Marker trait for types that can be produced by the container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {
    /// Returns the TypeId of this type (for internal use)
    #[inline]
    fn type_id_of() -> TypeId
    where
        Self: Sized,
    {
        TypeId::of::<Self>()
    }

    /// Returns the type name for debugging
    #[inline]
    fn type_name_of() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// A batch-registration unit.
///
/// [`Container::assemble`] calls [`assemble`](Assembly::assemble) on every
/// assembly in order, then [`loaded`](Assembly::loaded) on every assembly
/// with a resolver for post-load wiring.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{Assembly, Container, Result};
///
/// struct Port(u16);
///
/// struct NetworkAssembly;
///
/// impl Assembly for NetworkAssembly {
///     fn assemble(&self, container: &Container) -> Result<()> {
///         container.register(|_| Ok(Port(8080)))?;
///         Ok(())
///     }
/// }
///
/// let container = Container::new();
/// container.assemble(&[&NetworkAssembly]).unwrap();
/// assert_eq!(container.resolve::<Port>().unwrap().0, 8080);
/// ```
pub trait Assembly: Send + Sync {
    /// Register this unit's services.
    fn assemble(&self, container: &Container) -> Result<()>;

    /// Runs once every assembly has registered its services.
    fn loaded(&self, _resolver: &Resolver) -> Result<()> {
        Ok(())
    }
}
