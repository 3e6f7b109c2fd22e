//! Seams to the out-of-process analysis engine and to the feature store.

pub mod envelope;
pub mod mcp;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::CalcError;
use crate::models::{FeatureCollection, ToolDescriptor};

/// Failure reported by an engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine ran and reported a structured failure.
    #[error("{message}")]
    Tool {
        code: String,
        message: String,
        details: Option<Value>,
    },
    /// The call could not be delivered or its response was unusable.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl From<EngineError> for CalcError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Tool { code, message, .. } => CalcError::Execution {
                code: Some(code),
                message,
            },
            EngineError::Transport(err) => CalcError::execution(format!("{err:#}")),
        }
    }
}

/// Remote analysis engine.
///
/// Implementations own the transport. Timeouts and retry policy are applied
/// by the caller, so methods should simply await the remote side.
#[async_trait]
pub trait CalcEngine: Send + Sync {
    /// Establish a session with the engine.
    async fn handshake(&self) -> anyhow::Result<()>;

    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>>;

    async fn execute_tool(
        &self,
        tool_name: &str,
        tracks: Vec<Value>,
        locations: Vec<Value>,
        params: Option<Map<String, Value>>,
    ) -> Result<FeatureCollection, EngineError>;

    /// Tear down the session. Must be safe to call when not connected.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// Whether the session from the last handshake is still usable. Engines
    /// that notice a dead transport return `false` so the next call
    /// reconnects.
    fn is_session_alive(&self) -> bool {
        true
    }
}

/// Resolves selected identifiers to GeoJSON feature payloads.
pub trait FeatureSource: Send + Sync {
    /// Features for the given track ids. Unknown ids are skipped.
    fn tracks(&self, ids: &[String]) -> Vec<Value>;

    /// Features for the given location ids. Unknown ids are skipped.
    fn locations(&self, ids: &[String]) -> Vec<Value>;
}

/// In-memory feature source keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureSource {
    tracks: HashMap<String, Value>,
    locations: HashMap<String, Value>,
}

impl StaticFeatureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, id: impl Into<String>, feature: Value) -> Self {
        self.tracks.insert(id.into(), feature);
        self
    }

    pub fn with_location(mut self, id: impl Into<String>, feature: Value) -> Self {
        self.locations.insert(id.into(), feature);
        self
    }
}

impl FeatureSource for StaticFeatureSource {
    fn tracks(&self, ids: &[String]) -> Vec<Value> {
        ids.iter()
            .filter_map(|id| self.tracks.get(id).cloned())
            .collect()
    }

    fn locations(&self, ids: &[String]) -> Vec<Value> {
        ids.iter()
            .filter_map(|id| self.locations.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn static_source_preserves_request_order_and_skips_unknown() {
        let source = StaticFeatureSource::new()
            .with_track("a", json!({"id": "a"}))
            .with_track("b", json!({"id": "b"}))
            .with_location("p", json!({"id": "p"}));

        let ids = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        assert_eq!(source.tracks(&ids), vec![json!({"id": "b"}), json!({"id": "a"})]);
        assert_eq!(source.locations(&["p".to_string()]), vec![json!({"id": "p"})]);
    }

    #[test]
    fn engine_errors_convert_to_execution_errors() {
        let err: CalcError = EngineError::Tool {
            code: "TOOL_NOT_FOUND".into(),
            message: "Unknown tool: foo".into(),
            details: None,
        }
        .into();
        assert_eq!(
            err,
            CalcError::Execution {
                code: Some("TOOL_NOT_FOUND".into()),
                message: "Unknown tool: foo".into()
            }
        );

        let err: CalcError = EngineError::Transport(anyhow::anyhow!("broken pipe")).into();
        assert_eq!(err.to_string(), "broken pipe");
    }
}
