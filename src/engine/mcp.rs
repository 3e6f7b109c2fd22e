//! MCP stdio transport to the `debrief_calc.mcp.server` process.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use debrief_config::EngineConfig;
use parking_lot::Mutex;
use rmcp::service::{self, RoleClient, RunningService, ServiceError};
use rmcp::transport::child_process::TokioChildProcess;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::envelope::{decode_call_result, descriptor_from_tool, tool_arguments};
use crate::engine::{CalcEngine, EngineError};
use crate::models::{FeatureCollection, ToolDescriptor};

type ClientService = RunningService<RoleClient, ()>;

/// Analysis engine reached over MCP on the child process's stdio.
///
/// Each successful [`handshake`](CalcEngine::handshake) spawns the configured
/// command; [`shutdown`](CalcEngine::shutdown) cancels the session and the
/// child is killed when the transport drops.
pub struct McpCalcEngine {
    config: EngineConfig,
    service: Mutex<Option<Arc<ClientService>>>,
}

impl McpCalcEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            service: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.service.lock().is_some()
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = self.config.working_directory.as_ref() {
            command.current_dir(dir);
        }
        command
    }

    fn service(&self) -> Result<Arc<ClientService>> {
        self.service
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("analysis engine session is not running"))
    }

    /// Drop `service` if the call failed because the child's transport is
    /// gone, so the next handshake respawns the engine.
    fn release_if_closed(&self, service: &Arc<ClientService>, err: &ServiceError) {
        if !matches!(err, ServiceError::TransportClosed) {
            return;
        }
        let mut slot = self.service.lock();
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, service))
        {
            *slot = None;
            warn!("analysis engine transport closed; session released");
        }
    }
}

#[async_trait]
impl CalcEngine for McpCalcEngine {
    async fn handshake(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let program = self.config.command.clone();
        let (transport, stderr) = TokioChildProcess::builder(self.build_command())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn analysis engine '{program}'"))?;

        if let Some(stderr) = stderr {
            let program_name = program.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("analysis engine stderr ({program_name}): {line}");
                }
            });
        }

        let running = service::serve_client((), transport)
            .await
            .with_context(|| format!("MCP handshake with '{program}' failed"))?;

        if let Some(info) = running.peer().peer_info() {
            let server = serde_json::to_value(info)
                .ok()
                .and_then(|v| v.pointer("/serverInfo/name").cloned())
                .unwrap_or(Value::Null);
            info!(server = %server, "analysis engine session established");
        }

        let previous = self.service.lock().replace(Arc::new(running));
        if let Some(previous) = previous {
            previous.cancellation_token().cancel();
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let service = self.service()?;
        let tools = service
            .peer()
            .list_all_tools()
            .await
            .map_err(|err| {
                self.release_if_closed(&service, &err);
                anyhow!("tools/list failed: {err}")
            })?;

        let descriptors = tools
            .iter()
            .filter_map(|tool| {
                let value = serde_json::to_value(tool).ok()?;
                let descriptor = descriptor_from_tool(&value);
                if descriptor.is_none() {
                    warn!(tool = %value, "skipping unnamed engine tool");
                }
                descriptor
            })
            .collect::<Vec<_>>();

        debug!(count = descriptors.len(), "listed analysis tools");
        Ok(descriptors)
    }

    async fn execute_tool(
        &self,
        tool_name: &str,
        tracks: Vec<Value>,
        locations: Vec<Value>,
        params: Option<Map<String, Value>>,
    ) -> Result<FeatureCollection, EngineError> {
        let service = self.service()?;
        let arguments = tool_arguments(tracks, locations, params);
        let request: rmcp::model::CallToolRequestParam = serde_json::from_value(json!({
            "name": tool_name,
            "arguments": arguments,
        }))
        .context("failed to build tools/call request")?;

        let result = service
            .call_tool(request)
            .await
            .map_err(|err| {
                self.release_if_closed(&service, &err);
                anyhow!("tools/call failed: {err}")
            })?;

        let value = serde_json::to_value(result).context("failed to read tools/call result")?;
        decode_call_result(&value)
    }

    async fn shutdown(&self) -> Result<()> {
        let service = self.service.lock().take();
        if let Some(service) = service {
            service.cancellation_token().cancel();
            info!("analysis engine session closed");
        }
        Ok(())
    }

    fn is_session_alive(&self) -> bool {
        self.is_running()
    }
}

impl std::fmt::Debug for McpCalcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpCalcEngine")
            .field("command", &self.config.command)
            .field("args", &self.config.args)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_uses_configured_program_and_args() {
        let engine = McpCalcEngine::new(EngineConfig::default());
        let command = engine.build_command();
        let std_command = command.as_std();
        assert_eq!(std_command.get_program(), "python");
        let args: Vec<_> = std_command.get_args().collect();
        assert_eq!(args, vec!["-m", "debrief_calc.mcp.server"]);
    }

    #[tokio::test]
    async fn calls_before_handshake_fail_cleanly() {
        let engine = McpCalcEngine::new(EngineConfig::default());
        assert!(!engine.is_running());
        assert!(!engine.is_session_alive());
        assert!(engine.list_tools().await.is_err());
        assert!(matches!(
            engine.execute_tool("calc_track_stats", Vec::new(), Vec::new(), None).await,
            Err(EngineError::Transport(_))
        ));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_fails_handshake() {
        let engine = McpCalcEngine::new(EngineConfig {
            command: "debrief-calc-engine-that-does-not-exist".into(),
            args: Vec::new(),
            ..EngineConfig::default()
        });
        let err = engine.handshake().await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to spawn"));
        assert!(!engine.is_running());
    }
}
