//! Data model shared by the catalog, execution and result-layer components.
//!
//! Everything that crosses into the renderer serialises as camelCase JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use debrief_commons::ErrorCategory;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CalcError;

const ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `<prefix>-<unix millis>-<7 random base36 chars>`
pub(crate) fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
        .collect();
    format!("{prefix}-{}-{suffix}", now.timestamp_millis())
}

/// Classification of the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextType {
    None,
    SingleTrack,
    MultiTrack,
    Location,
    Mixed,
}

impl ContextType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SingleTrack => "single-track",
            Self::MultiTrack => "multi-track",
            Self::Location => "location",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selection context a tool requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ToolContextType {
    #[default]
    Any,
    SingleTrack,
    MultiTrack,
    Location,
    Mixed,
}

impl ToolContextType {
    pub fn accepts(self, context: ContextType) -> bool {
        match self {
            Self::Any => true,
            Self::SingleTrack => context == ContextType::SingleTrack,
            Self::MultiTrack => context == ContextType::MultiTrack,
            Self::Location => context == ContextType::Location,
            Self::Mixed => context == ContextType::Mixed,
        }
    }

    /// Lenient parse used for engine-supplied metadata.
    ///
    /// Accepts the engine's own spellings (`single`, `multi`, `region`) as well
    /// as the canonical kebab-case names.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "any" => Some(Self::Any),
            "single-track" | "single" => Some(Self::SingleTrack),
            "multi-track" | "multi" => Some(Self::MultiTrack),
            "location" | "region" => Some(Self::Location),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Track,
    Location,
}

impl FeatureKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "track" => Some(Self::Track),
            "location" | "point" | "reference-location" => Some(Self::Location),
            _ => None,
        }
    }
}

/// Selected track and location identifiers, as supplied by the selection
/// provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub track_ids: Vec<String>,
    pub location_ids: Vec<String>,
}

impl Selection {
    pub fn new(track_ids: Vec<String>, location_ids: Vec<String>) -> Self {
        Self {
            track_ids,
            location_ids,
        }
    }

    pub fn track_count(&self) -> usize {
        self.track_ids.len()
    }

    pub fn location_count(&self) -> usize {
        self.location_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track_ids.is_empty() && self.location_ids.is_empty()
    }
}

/// An analysis tool advertised by the engine. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context_type: ToolContextType,
    #[serde(default)]
    pub input_kinds: Vec<FeatureKind>,
    #[serde(default)]
    pub input_schema: Value,
}

/// GeoJSON feature collection. Features stay opaque to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "FeatureCollection::collection_type")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Value>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Value>) -> Self {
        Self {
            kind: Self::collection_type(),
            features,
        }
    }

    fn collection_type() -> String {
        "FeatureCollection".to_string()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Transitions only move forward; terminal states are never left.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Lifecycle record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub id: String,
    pub tool_name: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_layer_id: Option<String>,
}

impl ToolExecution {
    pub fn new(id: String, tool_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            status: ExecutionStatus::Pending,
            progress: None,
            progress_message: None,
            started_at,
            completed_at: None,
            error: None,
            result_layer_id: None,
        }
    }

    /// Move to `next`, stamping `completed_at` on terminal states.
    ///
    /// Returns `false` and leaves the record untouched when the transition
    /// would go backwards or leave a terminal state.
    pub fn transition(&mut self, next: ExecutionStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(at);
            if next == ExecutionStatus::Completed {
                self.progress = Some(100);
            }
        }
        true
    }

    pub fn set_progress(&mut self, progress: u8, message: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = Some(progress.min(100));
        self.progress_message = message;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionRequest {
    pub tool_name: String,
    #[serde(default)]
    pub track_ids: Vec<String>,
    #[serde(default)]
    pub location_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ToolExecutionRequest {
    pub fn new(tool_name: impl Into<String>, selection: &Selection) -> Self {
        Self {
            tool_name: tool_name.into(),
            track_ids: selection.track_ids.clone(),
            location_ids: selection.location_ids.clone(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

/// Outcome of [`ExecutionController::execute_tool`](crate::ExecutionController::execute_tool).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub success: bool,
    /// Set whenever an execution record was created for the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureCollection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default)]
    pub retryable: bool,
    pub duration_ms: u64,
}

impl ToolExecutionResult {
    pub fn succeeded(execution_id: String, features: FeatureCollection, duration_ms: u64) -> Self {
        Self {
            success: true,
            execution_id: Some(execution_id),
            features: Some(features),
            error: None,
            error_category: None,
            retryable: false,
            duration_ms,
        }
    }

    pub fn failed(execution_id: Option<String>, error: &CalcError) -> Self {
        let category = error.category();
        Self {
            success: false,
            execution_id,
            features: None,
            error: Some(error.to_string()),
            error_category: Some(category),
            retryable: category.is_retryable(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    pub stroke_color: String,
    pub stroke_width: u32,
    pub dash_array: Vec<u32>,
    pub fill_color: String,
    pub fill_opacity: f64,
}

/// Displayable layer built from a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultLayer {
    pub id: String,
    pub name: String,
    pub tool_name: String,
    pub execution_id: String,
    pub features: FeatureCollection,
    pub style: LayerStyle,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub z_index: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn generated_ids_have_prefix_millis_and_suffix() {
        let now = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let id = generate_id("exec", now);
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "exec");
        assert_eq!(parts[1], "1700000000123");
        assert_eq!(parts[2].len(), 7);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_id("exec", now), generate_id("exec", now));
    }

    #[test]
    fn tool_context_accepts_matching_or_any() {
        assert!(ToolContextType::Any.accepts(ContextType::Mixed));
        assert!(ToolContextType::Any.accepts(ContextType::None));
        assert!(ToolContextType::MultiTrack.accepts(ContextType::MultiTrack));
        assert!(!ToolContextType::MultiTrack.accepts(ContextType::SingleTrack));
    }

    #[test]
    fn tool_context_parse_accepts_engine_spellings() {
        assert_eq!(
            ToolContextType::parse("single"),
            Some(ToolContextType::SingleTrack)
        );
        assert_eq!(
            ToolContextType::parse("MULTI_TRACK"),
            Some(ToolContextType::MultiTrack)
        );
        assert_eq!(
            ToolContextType::parse("region"),
            Some(ToolContextType::Location)
        );
        assert_eq!(ToolContextType::parse("sideways"), None);
        assert_eq!(ToolContextType::parse("none"), None);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let started = Utc::now();
        let mut execution = ToolExecution::new("exec-1".into(), "track-stats", started);
        assert!(execution.transition(ExecutionStatus::Running, started));
        assert!(!execution.transition(ExecutionStatus::Pending, started));
        assert!(execution.transition(ExecutionStatus::Completed, started));
        assert_eq!(execution.completed_at, Some(started));
        assert_eq!(execution.progress, Some(100));

        assert!(!execution.transition(ExecutionStatus::Failed, started));
        assert!(!execution.transition(ExecutionStatus::Cancelled, started));
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[test]
    fn progress_is_clamped_and_frozen_after_terminal() {
        let now = Utc::now();
        let mut execution = ToolExecution::new("exec-1".into(), "range-bearing", now);
        execution.set_progress(150, Some("halfway".into()));
        assert_eq!(execution.progress, Some(100));

        execution.transition(ExecutionStatus::Cancelled, now);
        execution.set_progress(10, None);
        assert_eq!(execution.progress, Some(100));
        assert_eq!(execution.progress_message.as_deref(), Some("halfway"));
    }

    #[test]
    fn descriptor_deserialises_with_defaults() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "track-stats",
            "displayName": "Track Statistics"
        }))
        .unwrap();
        assert_eq!(tool.context_type, ToolContextType::Any);
        assert!(tool.input_kinds.is_empty());
        assert_eq!(tool.input_schema, Value::Null);
    }

    #[test]
    fn result_layer_serialises_camel_case() {
        let layer = ResultLayer {
            id: "layer-1".into(),
            name: "Track Statistics".into(),
            tool_name: "track-stats".into(),
            execution_id: "exec-1".into(),
            features: FeatureCollection::default(),
            style: LayerStyle {
                stroke_color: "hsl(1, 70%, 50%)".into(),
                stroke_width: 2,
                dash_array: vec![8, 4],
                fill_color: "hsl(1, 70%, 50%)".into(),
                fill_opacity: 0.3,
            },
            visible: true,
            created_at: DateTime::<Utc>::default(),
            z_index: 100,
        };
        let value = serde_json::to_value(&layer).unwrap();
        assert_eq!(value["zIndex"], json!(100));
        assert_eq!(value["style"]["dashArray"], json!([8, 4]));
        assert_eq!(value["features"]["type"], json!("FeatureCollection"));
    }

    #[test]
    fn failed_result_carries_category() {
        let result = ToolExecutionResult::failed(
            Some("exec-1".into()),
            &CalcError::Connection("broken pipe".into()),
        );
        assert!(!result.success);
        assert_eq!(result.duration_ms, 0);
        assert_eq!(result.error_category, Some(ErrorCategory::Network));
        assert!(result.retryable);
    }
}
