//! Configuration for the debrief-calc client.
//!
//! The client reads a `calc.toml` from the user's home directory and from the
//! workspace, merges the layers and validates the result before any component
//! is constructed. Every field has a default, so an empty file (or no file at
//! all) yields a working configuration.

pub mod calc;
pub mod constants;
pub mod debug;
pub mod loader;

pub use calc::{
    CalcConfig, CircuitBreakerConfig, ConnectionConfig, EngineConfig, ResultStyleConfig,
    ToolCacheConfig,
};
pub use debug::{DebugConfig, TraceLevel};
pub use loader::{ConfigLayerSource, ConfigManager, merge_toml_values};
