//! Translation between MCP payloads and the client's data model.
//!
//! Everything here works on `serde_json::Value` so it stays independent of the
//! MCP SDK's type definitions.
//!
//! Tool results carry a JSON envelope in their text content:
//!
//! ```json
//! {"success": true, "features": [...], "duration_ms": 12}
//! {"success": false, "error": {"code": "KIND_MISMATCH", "message": "...", "details": {}}}
//! ```

use anyhow::anyhow;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::engine::EngineError;
use crate::models::{FeatureCollection, FeatureKind, ToolContextType, ToolDescriptor};

/// Prefix the engine puts on its MCP tool names.
const TOOL_NAME_PREFIX: &str = "calc_";

const EXECUTION_FAILED: &str = "EXECUTION_FAILED";

/// Build a descriptor from a serialised MCP `Tool`.
///
/// Returns `None` when the tool has no name.
pub fn descriptor_from_tool(tool: &Value) -> Option<ToolDescriptor> {
    let name = tool.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let display_name = metadata_str(tool, &["displayName", "display_name"])
        .or_else(|| tool.get("title").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| title_case(name));

    let context_type = metadata_str(tool, &["contextType", "context_type"])
        .and_then(|raw| {
            let parsed = ToolContextType::parse(&raw);
            if parsed.is_none() {
                debug!(
                    tool = %name,
                    context_type = %raw,
                    "unrecognised tool context; using any"
                );
            }
            parsed
        })
        .unwrap_or_default();

    let mut input_kinds: Vec<FeatureKind> = metadata_value(tool, &["inputKinds", "input_kinds"])
        .and_then(Value::as_array)
        .map(|kinds| {
            kinds
                .iter()
                .filter_map(Value::as_str)
                .filter_map(FeatureKind::parse)
                .collect()
        })
        .unwrap_or_default();
    input_kinds.sort();
    input_kinds.dedup();

    Some(ToolDescriptor {
        name: name.to_string(),
        display_name,
        description: tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        context_type,
        input_kinds,
        input_schema: tool.get("inputSchema").cloned().unwrap_or(Value::Null),
    })
}

/// Arguments object for a tool call.
///
/// Tracks and locations travel together as `features`. Point locations also
/// contribute a `bounds` box for region-context tools.
pub fn tool_arguments(
    tracks: Vec<Value>,
    locations: Vec<Value>,
    params: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let bounds = point_bounds(&locations);
    let mut features = tracks;
    features.extend(locations);

    let mut arguments = Map::new();
    arguments.insert("features".to_string(), Value::Array(features));
    if let Some(bounds) = bounds {
        arguments.insert("bounds".to_string(), json!(bounds));
    }
    arguments.insert(
        "params".to_string(),
        Value::Object(params.unwrap_or_default()),
    );
    arguments
}

/// Decode a serialised MCP `CallToolResult`.
pub fn decode_call_result(result: &Value) -> Result<FeatureCollection, EngineError> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(structured) = result.get("structuredContent").filter(|v| v.is_object()) {
        return decode_envelope(structured);
    }

    let text = text_content(result);
    match serde_json::from_str::<Value>(&text) {
        Ok(envelope) if envelope.get("success").is_some() => decode_envelope(&envelope),
        _ if is_error => Err(EngineError::Tool {
            code: EXECUTION_FAILED.to_string(),
            message: if text.is_empty() {
                "engine reported an error without details".to_string()
            } else {
                text
            },
            details: None,
        }),
        Ok(_) | Err(_) => Err(EngineError::Transport(anyhow!(
            "unrecognised tool result payload: {}",
            truncate(&text, 200)
        ))),
    }
}

/// Decode the engine's `{success, ...}` envelope.
pub fn decode_envelope(envelope: &Value) -> Result<FeatureCollection, EngineError> {
    let success = envelope
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !success {
        let error = envelope.get("error");
        let code = error
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .unwrap_or(EXECUTION_FAILED)
            .to_string();
        let message = error
            .and_then(|e| e.get("message").and_then(Value::as_str))
            .or_else(|| error.and_then(Value::as_str))
            .unwrap_or("engine reported failure")
            .to_string();
        let details = error
            .and_then(|e| e.get("details"))
            .filter(|d| !d.is_null())
            .cloned();
        return Err(EngineError::Tool {
            code,
            message,
            details,
        });
    }

    match envelope.get("features") {
        Some(Value::Array(features)) => Ok(FeatureCollection::new(features.clone())),
        Some(collection @ Value::Object(_)) => serde_json::from_value(collection.clone())
            .map_err(|err| EngineError::Transport(anyhow!("invalid feature collection: {err}"))),
        Some(Value::Null) | None => Ok(FeatureCollection::default()),
        Some(other) => Err(EngineError::Transport(anyhow!(
            "unexpected features payload: {other}"
        ))),
    }
}

/// "calc_track_stats" -> "Track Stats"
fn title_case(name: &str) -> String {
    let stripped = name.strip_prefix(TOOL_NAME_PREFIX).unwrap_or(name);
    stripped
        .split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn metadata_value<'a>(tool: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    ["_meta", "annotations"]
        .iter()
        .filter_map(|section| tool.get(*section))
        .find_map(|section| keys.iter().find_map(|key| section.get(*key)))
}

fn metadata_str(tool: &Value, keys: &[&str]) -> Option<String> {
    metadata_value(tool, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn point_bounds(locations: &[Value]) -> Option<[f64; 4]> {
    let mut bounds: Option<[f64; 4]> = None;
    for feature in locations {
        let Some(geometry) = feature.get("geometry") else {
            continue;
        };
        if geometry.get("type").and_then(Value::as_str) != Some("Point") {
            continue;
        }
        let coords = geometry.get("coordinates").and_then(Value::as_array);
        let (Some(x), Some(y)) = (
            coords.and_then(|c| c.first()).and_then(Value::as_f64),
            coords.and_then(|c| c.get(1)).and_then(Value::as_f64),
        ) else {
            continue;
        };
        bounds = Some(match bounds {
            None => [x, y, x, y],
            Some([min_x, min_y, max_x, max_y]) => {
                [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
            }
        });
    }
    bounds
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
