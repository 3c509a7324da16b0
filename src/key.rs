//! Registration identity.
//!
//! A [`RegistrationKey`] names one slot in the container: the product type,
//! an optional registration name, an optional argument type and whether the
//! factory behind the slot suspends.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// How a factory produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactoryKind {
    /// Plain closure, callable from both resolve paths
    Sync,
    /// Suspending closure, callable only from the async resolve path
    Async,
}

impl fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryKind::Sync => f.write_str("sync"),
            FactoryKind::Async => f.write_str("async"),
        }
    }
}

/// Identity of a registration slot.
///
/// Two keys are equal when product type, name, argument type and factory
/// kind all match. Type names are carried for diagnostics only.
///
/// # Examples
///
/// ```rust
/// use graph_injector::{FactoryKind, RegistrationKey};
///
/// let plain = RegistrationKey::of::<u32>();
/// let named = RegistrationKey::named::<u32>("port");
/// assert_ne!(plain, named);
///
/// let with_arg = RegistrationKey::of::<String>().with_argument::<String>();
/// assert_ne!(with_arg, RegistrationKey::of::<String>());
///
/// let suspending = plain.clone().with_kind(FactoryKind::Async);
/// assert_ne!(plain, suspending);
/// ```
#[derive(Clone)]
pub struct RegistrationKey {
    product: TypeId,
    product_name: &'static str,
    name: Option<Arc<str>>,
    argument: Option<(TypeId, &'static str)>,
    kind: FactoryKind,
}

impl RegistrationKey {
    /// Key for an unnamed, argument-free, synchronous registration of `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            product: TypeId::of::<T>(),
            product_name: type_name::<T>(),
            name: None,
            argument: None,
            kind: FactoryKind::Sync,
        }
    }

    /// Key for a named registration of `T`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &str) -> Self {
        Self::of::<T>().with_name(Some(name))
    }

    /// Replace the registration name.
    #[inline]
    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = name.map(Arc::from);
        self
    }

    /// Mark the key as taking an argument of type `A`.
    #[inline]
    pub fn with_argument<A: 'static>(mut self) -> Self {
        self.argument = Some((TypeId::of::<A>(), type_name::<A>()));
        self
    }

    /// Mark the key as taking an argument identified by a raw [`TypeId`].
    #[inline]
    pub(crate) fn with_argument_id(mut self, id: TypeId, name: &'static str) -> Self {
        self.argument = Some((id, name));
        self
    }

    /// Replace the factory kind.
    #[inline]
    pub fn with_kind(mut self, kind: FactoryKind) -> Self {
        self.kind = kind;
        self
    }

    /// The product [`TypeId`].
    #[inline]
    pub fn product_type(&self) -> TypeId {
        self.product
    }

    /// Human-readable product type name.
    #[inline]
    pub fn product_name(&self) -> &'static str {
        self.product_name
    }

    /// Registration name, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Argument [`TypeId`], if the registration takes one.
    #[inline]
    pub fn argument_type(&self) -> Option<TypeId> {
        self.argument.map(|(id, _)| id)
    }

    /// Argument type name, if the registration takes one.
    #[inline]
    pub fn argument_name(&self) -> Option<&'static str> {
        self.argument.map(|(_, name)| name)
    }

    /// Factory kind.
    #[inline]
    pub fn kind(&self) -> FactoryKind {
        self.kind
    }
}

impl PartialEq for RegistrationKey {
    fn eq(&self, other: &Self) -> bool {
        self.product == other.product
            && self.name == other.name
            && self.argument_type() == other.argument_type()
            && self.kind == other.kind
    }
}

impl Eq for RegistrationKey {}

impl Hash for RegistrationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.product.hash(state);
        self.name.hash(state);
        self.argument_type().hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Debug for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RegistrationKey");
        s.field("product", &self.product_name);
        if let Some(name) = &self.name {
            s.field("name", name);
        }
        if let Some(argument) = self.argument_name() {
            s.field("argument", &argument);
        }
        s.field("kind", &self.kind).finish()
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.product_name)?;
        if let Some(argument) = self.argument_name() {
            write!(f, "({argument})")?;
        }
        if let Some(name) = &self.name {
            write!(f, " [name={name:?}]")?;
        }
        if self.kind == FactoryKind::Async {
            f.write_str(" [async]")?;
        }
        Ok(())
    }
}
