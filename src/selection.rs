//! Selection classification and tool filtering.

use crate::models::{ContextType, FeatureKind, Selection, ToolDescriptor};

/// Classify a selection by how many tracks and locations it holds.
pub fn compute_context_type(track_count: usize, location_count: usize) -> ContextType {
    match (track_count, location_count) {
        (0, 0) => ContextType::None,
        (1, 0) => ContextType::SingleTrack,
        (_, 0) => ContextType::MultiTrack,
        (0, _) => ContextType::Location,
        _ => ContextType::Mixed,
    }
}

pub fn context_of(selection: &Selection) -> ContextType {
    compute_context_type(selection.track_count(), selection.location_count())
}

/// Feature kinds present in a selection.
pub fn feature_kinds(selection: &Selection) -> Vec<FeatureKind> {
    let mut kinds = Vec::with_capacity(2);
    if selection.track_count() > 0 {
        kinds.push(FeatureKind::Track);
    }
    if selection.location_count() > 0 {
        kinds.push(FeatureKind::Location);
    }
    kinds
}

/// A tool applies when its context matches (or is `any`) and it either
/// accepts every kind or shares at least one kind with the selection.
pub fn is_tool_applicable(
    tool: &ToolDescriptor,
    context: ContextType,
    kinds: &[FeatureKind],
) -> bool {
    if !tool.context_type.accepts(context) {
        return false;
    }
    tool.input_kinds.is_empty() || tool.input_kinds.iter().any(|kind| kinds.contains(kind))
}

pub fn filter_applicable(
    tools: &[ToolDescriptor],
    context: ContextType,
    kinds: &[FeatureKind],
) -> Vec<ToolDescriptor> {
    tools
        .iter()
        .filter(|tool| is_tool_applicable(tool, context, kinds))
        .cloned()
        .collect()
}
