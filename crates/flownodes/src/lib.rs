//! Standard logic library
//!
//! Collection of built-in node logic for common operations, registered
//! under stable keys such as `debug.echo` or `transform.json_parse`.

mod debug;
mod demo;
mod time;
mod transform;

pub use debug::echo;
pub use demo::{branching, finalizer, intensive, starter};
pub use time::delay;
pub use transform::{json_parse, json_stringify};

use flowruntime::LogicRegistry;

/// Register all standard logic with a registry
pub fn register_all(registry: &mut LogicRegistry) {
    debug::register(registry);
    demo::register(registry);
    time::register(registry);
    transform::register(registry);
}

/// A registry holding only the standard logic.
pub fn standard_registry() -> LogicRegistry {
    let mut registry = LogicRegistry::new();
    register_all(&mut registry);
    registry
}
