use std::sync::Arc;

use debrief_commons::{SharedClock, SystemClock};
use debrief_config::CalcConfig;
use tracing::debug;

use crate::catalog::ToolCatalog;
use crate::circuit_breaker::BreakerSnapshot;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::engine::{CalcEngine, FeatureSource};
use crate::error::CalcResult;
use crate::execution::ExecutionController;
use crate::models::{
    ResultLayer, Selection, ToolDescriptor, ToolExecution, ToolExecutionRequest,
    ToolExecutionResult,
};
use crate::result_layer::ResultLayerFactory;
use crate::selection::{context_of, feature_kinds, filter_applicable};

/// Entry point used by the rest of the application.
///
/// Construct one per session and share it behind an `Arc`; every method takes
/// `&self`.
#[derive(Debug)]
pub struct CalcService {
    connection: Arc<ConnectionManager>,
    catalog: ToolCatalog,
    executions: ExecutionController,
    layers: ResultLayerFactory,
}

impl CalcService {
    pub fn new(config: CalcConfig, engine: Arc<dyn CalcEngine>) -> Self {
        Self::with_clock(config, engine, SystemClock::shared())
    }

    pub fn with_clock(config: CalcConfig, engine: Arc<dyn CalcEngine>, clock: SharedClock) -> Self {
        let connection = Arc::new(ConnectionManager::new(engine, &config, Arc::clone(&clock)));
        let catalog = ToolCatalog::new(Arc::clone(&connection));
        let executions = ExecutionController::new(Arc::clone(&connection), Arc::clone(&clock));
        let layers = ResultLayerFactory::new(connection.tool_cache(), config.result_style, clock);
        Self {
            connection,
            catalog,
            executions,
            layers,
        }
    }

    pub async fn check_availability(&self) -> bool {
        self.connection.check_availability().await
    }

    pub async fn list_tools(&self) -> CalcResult<Vec<ToolDescriptor>> {
        self.catalog.list_tools().await
    }

    /// Tools that apply to `selection`. An empty selection yields no tools
    /// without contacting the engine.
    pub async fn get_applicable_tools(
        &self,
        selection: &Selection,
    ) -> CalcResult<Vec<ToolDescriptor>> {
        if selection.is_empty() {
            return Ok(Vec::new());
        }
        let context = context_of(selection);
        let kinds = feature_kinds(selection);
        let tools = self.catalog.list_tools().await?;
        let applicable = filter_applicable(&tools, context, &kinds);
        debug!(
            context = %context,
            available = tools.len(),
            applicable = applicable.len(),
            "filtered tools for selection"
        );
        Ok(applicable)
    }

    pub async fn execute_tool(
        &self,
        request: &ToolExecutionRequest,
        features: &dyn FeatureSource,
    ) -> ToolExecutionResult {
        self.executions.execute_tool(request, features).await
    }

    pub fn cancel_execution(&self) {
        self.executions.cancel_execution();
    }

    pub fn current_execution(&self) -> Option<ToolExecution> {
        self.executions.current_execution()
    }

    /// Build a layer for a successful result and link it to its execution.
    pub fn create_result_layer(
        &self,
        tool_name: &str,
        execution_id: &str,
        result: &ToolExecutionResult,
    ) -> Option<ResultLayer> {
        let layer = self
            .layers
            .create_result_layer(tool_name, execution_id, result)?;
        self.executions.attach_result_layer(execution_id, &layer.id);
        Some(layer)
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.connection.breaker_snapshot()
    }

    pub fn execution_history(&self) -> Vec<ToolExecution> {
        self.executions.history()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn executions(&self) -> &ExecutionController {
        &self.executions
    }

    pub fn layers(&self) -> &ResultLayerFactory {
        &self.layers
    }
}
