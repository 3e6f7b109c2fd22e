//! Client for the `debrief-calc` analysis engine.
//!
//! The engine runs out of process and is reached through a [`CalcEngine`]
//! implementation (MCP over stdio by default, see [`engine::mcp`]). Everything
//! between the caller and the engine lives here:
//!
//! - [`ConnectionManager`] owns the connection state machine and the circuit
//!   breaker, and coalesces concurrent connect attempts.
//! - [`ToolCatalog`] caches the engine's tool list with a TTL.
//! - [`selection`] classifies a track/location selection and filters the tools
//!   that apply to it.
//! - [`ExecutionController`] runs one tool at a time and supports
//!   cancellation.
//! - [`ResultLayerFactory`] turns successful executions into styled layers for
//!   the map renderer.
//!
//! [`CalcService`] wires these together for the rest of the application:
//!
//! ```no_run
//! use std::sync::Arc;
//! use debrief_calc_client::{CalcService, McpCalcEngine, Selection};
//! use debrief_config::ConfigManager;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConfigManager::load()?.into_config();
//! let engine = Arc::new(McpCalcEngine::new(config.engine.clone()));
//! let service = CalcService::new(config, engine);
//!
//! if service.check_availability().await {
//!     let selection = Selection::new(vec!["track-1".into()], Vec::new());
//!     let tools = service.get_applicable_tools(&selection).await?;
//!     println!("{} tools apply", tools.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod circuit_breaker;
pub mod connection;
pub mod engine;
pub mod error;
pub mod execution;
pub mod models;
pub mod result_layer;
pub mod selection;
pub mod service;
pub mod tracing_setup;

pub use catalog::{CacheStats, ToolCache, ToolCatalog};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker};
pub use connection::{ConnectionManager, ConnectionState};
pub use engine::mcp::McpCalcEngine;
pub use engine::{CalcEngine, EngineError, FeatureSource, StaticFeatureSource};
pub use error::{CalcError, CalcResult};
pub use execution::ExecutionController;
pub use models::{
    ContextType, ExecutionStatus, FeatureCollection, FeatureKind, LayerStyle, ResultLayer,
    Selection, ToolContextType, ToolDescriptor, ToolExecution, ToolExecutionRequest,
    ToolExecutionResult,
};
pub use result_layer::{ResultLayerFactory, create_default_result_style};
pub use service::CalcService;
pub use tracing_setup::init_tracing;

pub use debrief_commons::{Clock, ErrorCategory, ManualClock, SharedClock, SystemClock};
pub use debrief_config::CalcConfig;
