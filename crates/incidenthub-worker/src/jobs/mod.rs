//! Built-in job handler implementations.

pub mod echo;
pub mod sleep;

pub use echo::EchoJob;
pub use sleep::SleepJob;

use crate::registry::JobRegistry;

/// Register the built-in diagnostic handlers.
pub fn register_builtin(registry: &mut JobRegistry) {
    registry.register(EchoJob).register(SleepJob);
}
