//! Single-slot tool execution.
//!
//! At most one execution is current. A second request while one is running is
//! rejected with [`CalcError::ExecutionInProgress`]. Every path out of
//! [`ExecutionController::execute_tool`] clears the current slot, including a
//! panicking transport or a dropped future.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use debrief_commons::SharedClock;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::engine::FeatureSource;
use crate::error::{CalcError, CalcResult};
use crate::models::{
    ExecutionStatus, FeatureCollection, ToolExecution, ToolExecutionRequest, ToolExecutionResult,
    generate_id,
};

/// Terminal executions kept for lookup after the slot is cleared.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

struct ActiveExecution {
    execution: ToolExecution,
    cancel: CancellationToken,
}

pub struct ExecutionController {
    connection: Arc<ConnectionManager>,
    clock: SharedClock,
    current: Mutex<Option<ActiveExecution>>,
    history: Mutex<VecDeque<ToolExecution>>,
    history_limit: usize,
    tool_timeout: Option<Duration>,
}

impl ExecutionController {
    pub fn new(connection: Arc<ConnectionManager>, clock: SharedClock) -> Self {
        let tool_timeout = connection.config().tool_timeout();
        Self {
            connection,
            clock,
            current: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            tool_timeout,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Run a tool against the selected features.
    ///
    /// Never fails: every outcome, including rejection and cancellation, is
    /// reported through the returned result.
    ///
    /// Unlike [`ConnectionManager::connect`], this refuses to start a
    /// handshake while the circuit breaker is cooling down and no session
    /// exists; the result then carries [`CalcError::CircuitOpen`]. A session
    /// that is already connected keeps running tools regardless of the
    /// breaker.
    pub async fn execute_tool(
        &self,
        request: &ToolExecutionRequest,
        features: &dyn FeatureSource,
    ) -> ToolExecutionResult {
        if let Some(active_id) = self.current_id() {
            return Self::rejected_busy(&request.tool_name, active_id);
        }

        if let Err(err) = self.connection.ensure_connected().await {
            warn!(
                tool = %request.tool_name,
                error = %err,
                "cannot execute tool: engine unavailable"
            );
            return ToolExecutionResult::failed(None, &err);
        }

        let (execution_id, cancel) = match self.begin(&request.tool_name) {
            Ok(started) => started,
            Err(active_id) => return Self::rejected_busy(&request.tool_name, active_id),
        };
        let _slot = SlotGuard {
            controller: self,
            execution_id: execution_id.clone(),
        };

        self.mark_running(&execution_id);

        let tracks = features.tracks(&request.track_ids);
        let locations = features.locations(&request.location_ids);
        debug!(
            execution_id = %execution_id,
            tracks = tracks.len(),
            locations = locations.len(),
            "invoking analysis tool"
        );

        let started = tokio::time::Instant::now();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.invoke(request, tracks, locations) => Some(result),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Some(Ok(collection)) => {
                if self.finish(&execution_id, ExecutionStatus::Completed, None) {
                    info!(
                        execution_id = %execution_id,
                        tool = %request.tool_name,
                        features = collection.len(),
                        duration_ms,
                        "tool execution completed"
                    );
                    ToolExecutionResult::succeeded(execution_id, collection, duration_ms)
                } else {
                    Self::cancelled_result(execution_id)
                }
            }
            Some(Err(err)) => {
                if self.finish(&execution_id, ExecutionStatus::Failed, Some(err.to_string())) {
                    self.connection.record_failure();
                    warn!(
                        execution_id = %execution_id,
                        tool = %request.tool_name,
                        error = %err,
                        "tool execution failed"
                    );
                    ToolExecutionResult::failed(Some(execution_id), &err)
                } else {
                    Self::cancelled_result(execution_id)
                }
            }
            None => Self::cancelled_result(execution_id),
        }
    }

    /// Cancel the current execution, if any.
    ///
    /// The local await is aborted; the engine process is not told to stop.
    pub fn cancel_execution(&self) {
        let Some(mut active) = self.current.lock().take() else {
            return;
        };
        active
            .execution
            .transition(ExecutionStatus::Cancelled, self.clock.now());
        active.cancel.cancel();
        info!(execution_id = %active.execution.id, "tool execution cancelled");
        self.push_history(active.execution);
    }

    pub fn current_execution(&self) -> Option<ToolExecution> {
        self.current
            .lock()
            .as_ref()
            .map(|active| active.execution.clone())
    }

    /// Update progress on the current execution. Ignored for any other id.
    pub fn report_progress(&self, execution_id: &str, progress: u8, message: Option<String>) {
        let mut current = self.current.lock();
        if let Some(active) = current
            .as_mut()
            .filter(|active| active.execution.id == execution_id)
        {
            active.execution.set_progress(progress, message);
        }
    }

    /// Terminal executions, most recent last.
    pub fn history(&self) -> Vec<ToolExecution> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn find_execution(&self, execution_id: &str) -> Option<ToolExecution> {
        if let Some(current) = self
            .current_execution()
            .filter(|execution| execution.id == execution_id)
        {
            return Some(current);
        }
        self.history
            .lock()
            .iter()
            .rev()
            .find(|execution| execution.id == execution_id)
            .cloned()
    }

    /// Link a result layer to a completed execution.
    pub fn attach_result_layer(&self, execution_id: &str, layer_id: &str) -> bool {
        let mut history = self.history.lock();
        match history
            .iter_mut()
            .rev()
            .find(|execution| execution.id == execution_id)
        {
            Some(execution) => {
                execution.result_layer_id = Some(layer_id.to_string());
                true
            }
            None => false,
        }
    }

    async fn invoke(
        &self,
        request: &ToolExecutionRequest,
        tracks: Vec<serde_json::Value>,
        locations: Vec<serde_json::Value>,
    ) -> CalcResult<FeatureCollection> {
        let call = self.connection.engine().execute_tool(
            &request.tool_name,
            tracks,
            locations,
            request.params.clone(),
        );

        let guarded = AssertUnwindSafe(call).catch_unwind();
        let outcome = match self.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| CalcError::Timeout {
                    operation: "tool execution",
                    after: limit,
                })?,
            None => guarded.await,
        };

        match outcome {
            Ok(result) => result.map_err(CalcError::from),
            Err(_) => Err(CalcError::execution("analysis engine call panicked")),
        }
    }

    /// Create the execution and claim the slot, or return the id holding it.
    fn begin(&self, tool_name: &str) -> Result<(String, CancellationToken), String> {
        let mut current = self.current.lock();
        if let Some(active) = current.as_ref() {
            return Err(active.execution.id.clone());
        }
        let now = self.clock.now();
        let execution = ToolExecution::new(generate_id("exec", now), tool_name, now);
        let cancel = CancellationToken::new();
        let execution_id = execution.id.clone();
        *current = Some(ActiveExecution {
            execution,
            cancel: cancel.clone(),
        });
        Ok((execution_id, cancel))
    }

    fn mark_running(&self, execution_id: &str) {
        let now = self.clock.now();
        let mut current = self.current.lock();
        if let Some(active) = current
            .as_mut()
            .filter(|active| active.execution.id == execution_id)
        {
            active.execution.transition(ExecutionStatus::Running, now);
        }
    }

    /// Move the execution to a terminal state and release the slot.
    ///
    /// Returns `false` if the slot no longer belongs to `execution_id`, which
    /// means it was cancelled first.
    fn finish(&self, execution_id: &str, status: ExecutionStatus, error: Option<String>) -> bool {
        let now = self.clock.now();
        let finished = {
            let mut current = self.current.lock();
            let owns_slot = current
                .as_ref()
                .is_some_and(|active| active.execution.id == execution_id);
            if owns_slot { current.take() } else { None }
        };
        let Some(mut active) = finished else {
            return false;
        };
        active.execution.transition(status, now);
        active.execution.error = error;
        self.push_history(active.execution);
        true
    }

    fn push_history(&self, execution: ToolExecution) {
        let mut history = self.history.lock();
        history.push_back(execution);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    fn current_id(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .map(|active| active.execution.id.clone())
    }

    fn rejected_busy(tool_name: &str, active_id: String) -> ToolExecutionResult {
        debug!(tool = %tool_name, active = %active_id, "rejecting tool execution: slot busy");
        ToolExecutionResult::failed(
            None,
            &CalcError::ExecutionInProgress {
                execution_id: active_id,
            },
        )
    }

    fn cancelled_result(execution_id: String) -> ToolExecutionResult {
        let err = CalcError::Cancelled {
            execution_id: execution_id.clone(),
        };
        ToolExecutionResult::failed(Some(execution_id), &err)
    }
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("current", &self.current_id())
            .field("history", &self.history.lock().len())
            .field("tool_timeout", &self.tool_timeout)
            .finish()
    }
}

/// Releases the slot if `execute_tool` exits without reaching `finish`.
struct SlotGuard<'a> {
    controller: &'a ExecutionController,
    execution_id: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let abandoned = {
            let mut current = self.controller.current.lock();
            let owns_slot = current
                .as_ref()
                .is_some_and(|active| active.execution.id == self.execution_id);
            if owns_slot { current.take() } else { None }
        };
        if let Some(mut active) = abandoned {
            active
                .execution
                .transition(ExecutionStatus::Failed, self.controller.clock.now());
            active.execution.error = Some("execution abandoned".to_string());
            active.cancel.cancel();
            warn!(execution_id = %self.execution_id, "tool execution abandoned");
            self.controller.push_history(active.execution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CalcEngine, EngineError, StaticFeatureSource};
    use crate::models::ToolDescriptor;
    use async_trait::async_trait;
    use debrief_commons::{ErrorCategory, ManualClock};
    use debrief_config::CalcConfig;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Succeed,
        Fail,
        Hang,
        Panic,
    }

    struct ScriptedEngine {
        behaviour: Behaviour,
        calls: AtomicUsize,
        last_features: Mutex<Vec<Value>>,
    }

    impl ScriptedEngine {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                last_features: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CalcEngine for ScriptedEngine {
        async fn handshake(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn execute_tool(
            &self,
            _tool_name: &str,
            tracks: Vec<Value>,
            locations: Vec<Value>,
            _params: Option<Map<String, Value>>,
        ) -> Result<FeatureCollection, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_features.lock() = tracks.into_iter().chain(locations).collect();
            match self.behaviour {
                Behaviour::Succeed => {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok(FeatureCollection::new(vec![json!({"type": "Feature"})]))
                }
                Behaviour::Fail => Err(EngineError::Tool {
                    code: "INVALID_CONTEXT".into(),
                    message: "Tool requires exactly 1 feature, got 2".into(),
                    details: None,
                }),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(FeatureCollection::default())
                }
                Behaviour::Panic => panic!("transport exploded"),
            }
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn controller(
        engine: Arc<ScriptedEngine>,
    ) -> (Arc<ExecutionController>, Arc<ConnectionManager>) {
        let clock = ManualClock::at_epoch();
        let connection = Arc::new(ConnectionManager::new(
            engine,
            &CalcConfig::default(),
            clock.clone(),
        ));
        let controller = Arc::new(ExecutionController::new(Arc::clone(&connection), clock));
        (controller, connection)
    }

    fn request() -> ToolExecutionRequest {
        ToolExecutionRequest {
            tool_name: "calc_range_bearing".into(),
            track_ids: vec!["t1".into(), "t2".into()],
            location_ids: Vec::new(),
            params: None,
        }
    }

    fn features() -> StaticFeatureSource {
        StaticFeatureSource::new()
            .with_track("t1", json!({"id": "t1"}))
            .with_track("t2", json!({"id": "t2"}))
    }

    #[tokio::test(start_paused = true)]
    async fn success_completes_and_clears_slot() {
        let engine = ScriptedEngine::new(Behaviour::Succeed);
        let (controller, _) = controller(engine.clone());

        let result = controller.execute_tool(&request(), &features()).await;
        assert!(result.success);
        assert_eq!(result.features.as_ref().map(FeatureCollection::len), Some(1));
        assert_eq!(result.duration_ms, 40);
        assert!(controller.current_execution().is_none());

        let history = controller.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Completed);
        assert_eq!(Some(history[0].id.clone()), result.execution_id);
        assert!(history[0].completed_at.is_some());
        assert_eq!(
            *engine.last_features.lock(),
            vec![json!({"id": "t1"}), json!({"id": "t2"})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_captured_and_recorded() {
        let engine = ScriptedEngine::new(Behaviour::Fail);
        let (controller, connection) = controller(engine);

        let result = controller.execute_tool(&request(), &features()).await;
        assert!(!result.success);
        assert_eq!(result.duration_ms, 0);
        assert_eq!(result.error_category, Some(ErrorCategory::InvalidContext));
        assert!(!result.retryable);
        assert_eq!(
            result.error.as_deref(),
            Some("Tool requires exactly 1 feature, got 2")
        );
        assert!(controller.current_execution().is_none());
        assert_eq!(connection.breaker_snapshot().failure_count, 1);

        let history = controller.history();
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert!(history[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_is_rejected_while_running() {
        let engine = ScriptedEngine::new(Behaviour::Succeed);
        let (controller, connection) = controller(engine.clone());
        let features = features();
        let request = request();

        let (first, second) = tokio::join!(
            controller.execute_tool(&request, &features),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let running = controller.current_execution().unwrap();
                assert_eq!(running.status, ExecutionStatus::Running);
                controller.execute_tool(&request, &features).await
            }
        );

        assert!(first.success);
        assert!(!second.success);
        assert_eq!(second.error_category, Some(ErrorCategory::Busy));
        assert!(second.retryable);
        assert!(second.execution_id.is_none());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(connection.breaker_snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_await_without_recording_failure() {
        let engine = ScriptedEngine::new(Behaviour::Hang);
        let (controller, connection) = controller(engine);
        let features = features();
        let request = request();

        let (result, ()) = tokio::join!(controller.execute_tool(&request, &features), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            controller.cancel_execution();
        });

        assert!(!result.success);
        assert_eq!(result.error_category, Some(ErrorCategory::Cancelled));
        assert!(controller.current_execution().is_none());
        assert_eq!(connection.breaker_snapshot().failure_count, 0);

        let history = controller.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Cancelled);
        assert!(history[0].completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_applies_only_to_current_execution() {
        let (controller, _) = controller(ScriptedEngine::new(Behaviour::Hang));
        let features = features();
        let request = request();

        let (_, ()) = tokio::join!(controller.execute_tool(&request, &features), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let running = controller.current_execution().unwrap();
            controller.report_progress("exec-other", 90, None);
            controller.report_progress(&running.id, 40, Some("resampling tracks".into()));

            let updated = controller.current_execution().unwrap();
            assert_eq!(updated.progress, Some(40));
            assert_eq!(updated.progress_message.as_deref(), Some("resampling tracks"));
            controller.cancel_execution();
        });
    }

    #[test]
    fn cancel_without_execution_is_noop() {
        let (controller, _) = controller(ScriptedEngine::new(Behaviour::Succeed));
        controller.cancel_execution();
        assert!(controller.current_execution().is_none());
        assert!(controller.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_transport_still_clears_slot() {
        let engine = ScriptedEngine::new(Behaviour::Panic);
        let (controller, connection) = controller(engine);

        let result = controller.execute_tool(&request(), &features()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("panicked"));
        assert!(controller.current_execution().is_none());
        assert_eq!(connection.breaker_snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_fails_execution() {
        let engine = ScriptedEngine::new(Behaviour::Hang);
        let (controller, _) = controller(engine);

        let result = controller.execute_tool(&request(), &features()).await;
        assert_eq!(result.error_category, Some(ErrorCategory::Timeout));
        assert!(result.retryable);
        assert!(controller.current_execution().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_future_releases_slot() {
        let engine = ScriptedEngine::new(Behaviour::Hang);
        let (controller, _) = controller(engine);

        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            controller.execute_tool(&request(), &features()),
        )
        .await;
        assert!(attempt.is_err());
        assert!(controller.current_execution().is_none());
        assert_eq!(controller.history()[0].status, ExecutionStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejects_before_connecting() {
        let engine = ScriptedEngine::new(Behaviour::Succeed);
        let (controller, connection) = controller(engine.clone());
        for _ in 0..3 {
            connection.record_failure();
        }

        let result = controller.execute_tool(&request(), &features()).await;
        assert_eq!(result.error_category, Some(ErrorCategory::CircuitOpen));
        assert!(result.execution_id.is_none());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn result_layer_can_be_attached_after_completion() {
        let (controller, _) = controller(ScriptedEngine::new(Behaviour::Succeed));
        let result = controller.execute_tool(&request(), &features()).await;
        let execution_id = result.execution_id.unwrap();

        assert!(controller.attach_result_layer(&execution_id, "layer-1"));
        assert!(!controller.attach_result_layer("exec-unknown", "layer-2"));
        assert_eq!(
            controller
                .find_execution(&execution_id)
                .and_then(|e| e.result_layer_id),
            Some("layer-1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded() {
        let engine = ScriptedEngine::new(Behaviour::Fail);
        let clock = ManualClock::at_epoch();
        let connection = Arc::new(ConnectionManager::new(
            engine,
            &CalcConfig::default(),
            clock.clone(),
        ));
        let controller = ExecutionController::new(connection, clock).with_history_limit(2);

        // The session stays connected, so the open breaker does not block these runs.
        for _ in 0..3 {
            controller.execute_tool(&request(), &features()).await;
        }
        assert_eq!(controller.history().len(), 2);
    }
}
