//! # Graph Injector - Object-Graph Dependency Injection for Rust
//!
//! A thread-safe container that builds object graphs from registered
//! factories, caches what they build according to a per-registration scope,
//! and detects dependency cycles along the logical call tree, even when
//! asynchronous factories suspend and resume on other worker threads.
//!
//! ## Features
//!
//! - **Lock-free registry** - `DashMap` keyed by type, name, argument type and factory kind
//! - **Scopes** - transient, singleton, weak, graph (per top-level resolve), disposable, composite
//! - **Cycle detection** - the resolution path travels with each call, not with the thread
//! - **Async factories** - suspending factories resolve their own dependencies with `.await`
//! - **Argument factories** - one cache slot per distinct argument value
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use graph_injector::{Container, Scope};
//! use std::sync::Arc;
//!
//! struct Config { url: String }
//! struct Database { config: Arc<Config> }
//! struct UserService { db: Arc<Database> }
//!
//! let container = Container::new();
//! container
//!     .register(|_| Ok(Config { url: "postgres://localhost".into() }))
//!     .unwrap()
//!     .scope(Scope::Singleton);
//! container.register(|r| Ok(Database { config: r.resolve()? })).unwrap();
//! container.register(|r| Ok(UserService { db: r.resolve()? })).unwrap();
//!
//! let users = container.resolve::<UserService>().unwrap();
//! assert_eq!(users.db.config.url, "postgres://localhost");
//! ```
//!
//! ## Scopes
//!
//! Registrations default to [`Scope::Graph`]: within one top-level resolve
//! every dependent sees the same instance, and the next top-level resolve
//! builds a fresh graph.
//!
//! ```rust
//! use graph_injector::{Container, Scope};
//! use std::sync::Arc;
//!
//! struct Connection;
//! struct Reader(Arc<Connection>);
//! struct Writer(Arc<Connection>);
//! struct Session { reader: Arc<Reader>, writer: Arc<Writer> }
//!
//! let container = Container::new();
//! container.register(|_| Ok(Connection)).unwrap();
//! container.register(|r| Ok(Reader(r.resolve()?))).unwrap();
//! container.register(|r| Ok(Writer(r.resolve()?))).unwrap();
//! container
//!     .register(|r| Ok(Session { reader: r.resolve()?, writer: r.resolve()? }))
//!     .unwrap();
//!
//! let session = container.resolve::<Session>().unwrap();
//! assert!(Arc::ptr_eq(&session.reader.0, &session.writer.0));
//!
//! let other = container.resolve::<Session>().unwrap();
//! assert!(!Arc::ptr_eq(&session.reader.0, &other.reader.0));
//! ```
//!
//! ## Cycles
//!
//! ```rust
//! use graph_injector::{Container, DiError};
//!
//! struct A;
//! struct B;
//!
//! let container = Container::new();
//! container.register(|r| { r.resolve::<B>()?; Ok(A) }).unwrap();
//! container.register(|r| { r.resolve::<A>()?; Ok(B) }).unwrap();
//!
//! assert!(matches!(
//!     container.resolve::<A>(),
//!     Err(DiError::CircularDependency { .. })
//! ));
//! ```

mod behavior;
mod container;
mod context;
mod error;
mod factory;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod registration;
mod scope;
mod storage;

pub use behavior::*;
pub use container::*;
pub use context::{ResolutionContext, TreeId};
pub use error::*;
pub use factory::{ArgumentFactory, BoxFuture, Factory};
pub use key::*;
pub use provider::*;
pub use registration::Registrable;
pub use scope::*;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Assembly, Behavior, BoxError, Container, DiError, Factory, Injectable, Registrable,
        RegisterOptions, RegistrationInfo, Resolver, Result, Scope,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Database {
        url: String,
    }

    struct UserService {
        db: Arc<Database>,
    }

    #[test]
    fn test_singleton_registration() {
        let container = Container::new();
        container
            .register(|_| Ok(Database { url: "test".into() }))
            .unwrap()
            .scope(Scope::Singleton);

        let db = container.resolve::<Database>().unwrap();
        assert_eq!(db.url, "test");
    }

    #[test]
    fn test_multiple_resolve_same_instance() {
        let container = Container::new();
        container
            .register(|_| Ok(Database { url: "test".into() }))
            .unwrap()
            .scope(Scope::Singleton);

        let db1 = container.resolve::<Database>().unwrap();
        let db2 = container.resolve::<Database>().unwrap();

        // Same Arc instance
        assert!(Arc::ptr_eq(&db1, &db2));
    }

    #[test]
    fn test_transient_creates_new_instance() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        struct Counter(u32);

        let container = Container::new();
        container
            .register(|_| Ok(Counter(COUNTER.fetch_add(1, Ordering::SeqCst))))
            .unwrap()
            .scope(Scope::Transient);

        let c1 = container.resolve::<Counter>().unwrap();
        let c2 = container.resolve::<Counter>().unwrap();

        assert_ne!(c1.0, c2.0);
    }

    #[test]
    fn test_factories_are_lazy() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct LazyService;

        let container = Container::new();
        container
            .register(|_| {
                CREATED.fetch_add(1, Ordering::SeqCst);
                Ok(LazyService)
            })
            .unwrap()
            .scope(Scope::Singleton);

        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        let _ = container.resolve::<LazyService>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);

        // Second resolve doesn't create new instance
        let _ = container.resolve::<LazyService>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dependency_chain() {
        let container = Container::new();
        container
            .register(|_| Ok(Database { url: "root".into() }))
            .unwrap();
        container
            .register(|r| Ok(UserService { db: r.resolve()? }))
            .unwrap();

        let users = container.resolve::<UserService>().unwrap();
        assert_eq!(users.db.url, "root");
    }

    #[test]
    fn test_missing_dependency_surfaces_unchanged() {
        let container = Container::new();
        container
            .register(|r| Ok(UserService { db: r.resolve()? }))
            .unwrap();

        match container.resolve::<UserService>() {
            Err(DiError::NoRegistrationFound { key }) => {
                assert_eq!(key, RegistrationKey::of::<Database>());
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;

        let container = Container::new();
        let _: Result<Registrable<u8>> = container.register(|_: &Resolver| Ok(1u8));
        assert!(container.resolve::<u8>().is_ok());
    }
}
