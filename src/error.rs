//! Error types for dependency injection

use crate::RegistrationKey;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by factory bodies and post-construction hooks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared error cause carried by the wrapping variants.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur during registration or resolution
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// A non-overridable registration already occupies the slot
    #[error("Registration already exists for {key}")]
    AlreadyRegistered { key: RegistrationKey },

    /// Nothing is registered under the requested key
    #[error("No registration found for {key}")]
    NoRegistrationFound { key: RegistrationKey },

    /// The key is already under construction in the current resolution tree
    #[error("Circular dependency detected while resolving {key} (path: {})", format_path(.path))]
    CircularDependency {
        key: RegistrationKey,
        path: Vec<RegistrationKey>,
    },

    /// A suspending factory was invoked through the synchronous path
    #[error("Factory for {key} is asynchronous and cannot be resolved synchronously")]
    InvalidFactory { key: RegistrationKey },

    /// The argument value does not match the registration's argument type
    #[error("Invalid argument for {key}: expected {expected}")]
    InvalidArgument {
        key: RegistrationKey,
        expected: &'static str,
    },

    /// A forwarded registration produced a value of the wrong type
    #[error("Cannot forward {key} to {target}")]
    InvalidForwarding {
        key: RegistrationKey,
        target: &'static str,
    },

    /// The factory body failed
    #[error("Factory for {key} failed: {source}")]
    Underlying {
        key: RegistrationKey,
        #[source]
        source: SharedError,
    },

    /// A post-construction hook failed
    #[error("Post-construction hook for {key} failed: {source}")]
    RegistrationAction {
        key: RegistrationKey,
        #[source]
        source: SharedError,
    },
}

impl DiError {
    /// Create a NoRegistrationFound error
    #[inline]
    pub fn not_found(key: &RegistrationKey) -> Self {
        Self::NoRegistrationFound { key: key.clone() }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(key: &RegistrationKey) -> Self {
        Self::AlreadyRegistered { key: key.clone() }
    }

    /// Create a CircularDependency error
    #[inline]
    pub fn circular(key: &RegistrationKey, path: Vec<RegistrationKey>) -> Self {
        Self::CircularDependency {
            key: key.clone(),
            path,
        }
    }

    /// Wrap a factory failure, passing framework errors through untouched.
    pub(crate) fn from_factory(key: &RegistrationKey, error: BoxError) -> Self {
        match error.downcast::<DiError>() {
            Ok(inner) => *inner,
            Err(other) => Self::Underlying {
                key: key.clone(),
                source: Arc::from(other),
            },
        }
    }

    /// Wrap a hook failure.
    pub(crate) fn from_hook(key: &RegistrationKey, error: BoxError) -> Self {
        Self::RegistrationAction {
            key: key.clone(),
            source: Arc::from(error),
        }
    }

    /// The registration key this error refers to.
    pub fn key(&self) -> &RegistrationKey {
        match self {
            Self::AlreadyRegistered { key }
            | Self::NoRegistrationFound { key }
            | Self::CircularDependency { key, .. }
            | Self::InvalidFactory { key }
            | Self::InvalidArgument { key, .. }
            | Self::InvalidForwarding { key, .. }
            | Self::Underlying { key, .. }
            | Self::RegistrationAction { key, .. } => key,
        }
    }
}

fn format_path(path: &[RegistrationKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
