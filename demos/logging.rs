//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use graph_injector::{Container, DiError, Scope};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserRepository {
    db: Arc<Database>,
}

#[allow(dead_code)]
struct AuditLog {
    db: Arc<Database>,
}

#[allow(dead_code)]
struct UserService {
    users: Arc<UserRepository>,
    audit: Arc<AuditLog>,
}

struct Chicken;
struct Egg;

fn main() -> Result<(), DiError> {
    // JSON if logging-json is enabled, pretty otherwise
    graph_injector::logging::builder()
        .graph_only()
        .trace()
        .with_thread_ids()
        .init();

    println!("=== Graph Injector Logging Demo ===\n");

    // logs: "Creating new container"
    let container = Container::new();

    // logs: "Registered service" (replaced = false)
    container
        .register(|_| {
            println!("  [App] Connecting to database...");
            Ok(Database {
                url: "postgres://localhost/mydb".into(),
            })
        })?
        .scope(Scope::Singleton);
    container.register(|r| Ok(UserRepository { db: r.resolve()? }))?;
    container.register(|r| Ok(AuditLog { db: r.resolve()? }))?;
    container.register(|r| {
        Ok(UserService {
            users: r.resolve()?,
            audit: r.resolve()?,
        })
    })?;

    // logs: "Resolving service" at increasing depth, "Invoking factory" for
    // each new instance and "Returning cached instance" for the shared database
    let _service = container.resolve::<UserService>()?;

    // A second top-level resolve builds a new graph around the same singleton
    let _again = container.resolve::<UserService>()?;

    // logs: "Service not found"
    assert!(container.try_resolve::<i32>().is_none());

    // logs: "Circular dependency detected"
    container.register(|r| {
        r.resolve::<Egg>()?;
        Ok(Chicken)
    })?;
    container.register(|r| {
        r.resolve::<Chicken>()?;
        Ok(Egg)
    })?;
    if let Err(error) = container.resolve::<Chicken>() {
        println!("  [App] {error}");
    }

    // logs: "Registered service" (replaced = true)
    container.register(|_| Ok(Egg))?;
    let _egg = container.resolve::<Egg>()?;

    // logs: "Clearing container"
    container.clear();

    println!("\n=== Demo Complete ===");
    println!("Tip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development");
    Ok(())
}
