//! Result layers for the map renderer.
//!
//! Layer colours come from a hash of the tool name, so repeated runs of the
//! same tool always render in the same hue. Every result layer is dashed to
//! set it apart from source tracks.

use std::sync::Arc;

use debrief_commons::SharedClock;
use debrief_config::ResultStyleConfig;

use crate::catalog::ToolCache;
use crate::models::{LayerStyle, ResultLayer, ToolExecutionResult, generate_id};

pub const RESULT_DASH_ARRAY: [u32; 2] = [8, 4];

/// 32-bit string hash matching `h = h * 31 + code_unit` over UTF-16 code units
/// with two's-complement wrap-around, as computed by the webview.
pub fn tool_name_hash(tool_name: &str) -> i32 {
    tool_name
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Hue in `[0, 360)` for a tool name.
pub fn tool_hue(tool_name: &str) -> u32 {
    let hue = i64::from(tool_name_hash(tool_name)).abs() % 360;
    u32::try_from(hue).unwrap_or_default()
}

/// Style with the default palette.
pub fn create_default_result_style(tool_name: &str) -> LayerStyle {
    style_for(tool_name, &ResultStyleConfig::default())
}

pub fn style_for(tool_name: &str, palette: &ResultStyleConfig) -> LayerStyle {
    let colour = format!(
        "hsl({}, {}%, {}%)",
        tool_hue(tool_name),
        palette.saturation,
        palette.lightness
    );
    LayerStyle {
        stroke_color: colour.clone(),
        stroke_width: palette.stroke_width,
        dash_array: RESULT_DASH_ARRAY.to_vec(),
        fill_color: colour,
        fill_opacity: palette.fill_opacity,
    }
}

pub struct ResultLayerFactory {
    tool_cache: Arc<ToolCache>,
    palette: ResultStyleConfig,
    clock: SharedClock,
}

impl ResultLayerFactory {
    pub fn new(tool_cache: Arc<ToolCache>, palette: ResultStyleConfig, clock: SharedClock) -> Self {
        Self {
            tool_cache,
            palette,
            clock,
        }
    }

    /// Build a layer from a successful result. `None` unless the result
    /// succeeded and carries features.
    pub fn create_result_layer(
        &self,
        tool_name: &str,
        execution_id: &str,
        result: &ToolExecutionResult,
    ) -> Option<ResultLayer> {
        if !result.success {
            return None;
        }
        let features = result.features.clone()?;
        let now = self.clock.now();

        Some(ResultLayer {
            id: generate_id("layer", now),
            name: self.display_name(tool_name),
            tool_name: tool_name.to_string(),
            execution_id: execution_id.to_string(),
            features,
            style: self.style(tool_name),
            visible: true,
            created_at: now,
            z_index: self.palette.z_index,
        })
    }

    pub fn style(&self, tool_name: &str) -> LayerStyle {
        style_for(tool_name, &self.palette)
    }

    fn display_name(&self, tool_name: &str) -> String {
        self.tool_cache
            .snapshot()
            .and_then(|tools| {
                tools
                    .iter()
                    .find(|tool| tool.name == tool_name)
                    .map(|tool| tool.display_name.clone())
            })
            .unwrap_or_else(|| tool_name.to_string())
    }
}

impl std::fmt::Debug for ResultLayerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultLayerFactory")
            .field("palette", &self.palette)
            .field("tool_cache", &self.tool_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureCollection, ToolContextType, ToolDescriptor};
    use debrief_commons::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn factory() -> (ResultLayerFactory, Arc<ToolCache>) {
        let clock = ManualClock::at_epoch();
        let cache = Arc::new(ToolCache::new(Duration::from_secs(60), clock.clone()));
        (
            ResultLayerFactory::new(Arc::clone(&cache), ResultStyleConfig::default(), clock),
            cache,
        )
    }

    fn success() -> ToolExecutionResult {
        ToolExecutionResult::succeeded(
            "exec-1".into(),
            FeatureCollection::new(vec![json!({"type": "Feature"})]),
            12,
        )
    }

    #[test]
    fn hash_matches_webview_values() {
        assert_eq!(tool_name_hash(""), 0);
        assert_eq!(tool_name_hash("ab"), 3105);
        assert_eq!(tool_name_hash("track-stats"), 166_159_773);
        assert_eq!(tool_name_hash("relative-motion"), -1_279_675_945);
        assert_eq!(tool_name_hash("°N"), 5534);

        assert_eq!(tool_hue("track-stats"), 333);
        assert_eq!(tool_hue("relative-motion"), 145);
        assert_eq!(tool_hue("area-summary"), 90);
    }

    #[test]
    fn default_style_is_deterministic() {
        let first = create_default_result_style("range-bearing");
        let second = create_default_result_style("range-bearing");
        assert_eq!(first, second);
        assert_eq!(first.stroke_color, "hsl(54, 70%, 50%)");
        assert_eq!(first.fill_color, first.stroke_color);
        assert_eq!(first.dash_array, vec![8, 4]);
        assert_eq!(first.stroke_width, 2);
        assert_eq!(first.fill_opacity, 0.3);
    }

    #[test]
    fn configured_palette_changes_saturation_and_lightness() {
        let palette = ResultStyleConfig {
            saturation: 40,
            lightness: 60,
            ..ResultStyleConfig::default()
        };
        let style = style_for("track-stats", &palette);
        assert_eq!(style.stroke_color, "hsl(333, 40%, 60%)");
        assert_eq!(style.dash_array, vec![8, 4]);
    }

    #[test]
    fn debug_output_omits_clock() {
        let (factory, _) = factory();
        let rendered = format!("{factory:?}");
        assert!(rendered.starts_with("ResultLayerFactory"));
        assert!(rendered.contains("saturation: 70"));
        assert!(!rendered.contains("clock"));
    }

    #[test]
    fn no_layer_for_failure_or_missing_features() {
        let (factory, _) = factory();

        let failed = ToolExecutionResult::failed(
            Some("exec-1".into()),
            &crate::error::CalcError::execution("boom"),
        );
        assert!(factory.create_result_layer("track-stats", "exec-1", &failed).is_none());

        let mut empty = success();
        empty.features = None;
        assert!(factory.create_result_layer("track-stats", "exec-1", &empty).is_none());
    }

    #[test]
    fn layer_uses_cached_display_name() {
        let (factory, cache) = factory();

        let layer = factory
            .create_result_layer("calc_track_stats", "exec-1", &success())
            .unwrap();
        assert_eq!(layer.name, "calc_track_stats");

        cache.store(vec![ToolDescriptor {
            name: "calc_track_stats".into(),
            display_name: "Track Statistics".into(),
            description: String::new(),
            context_type: ToolContextType::SingleTrack,
            input_kinds: Vec::new(),
            input_schema: Value::Null,
        }]);

        let layer = factory
            .create_result_layer("calc_track_stats", "exec-1", &success())
            .unwrap();
        assert_eq!(layer.name, "Track Statistics");
        assert_eq!(layer.execution_id, "exec-1");
        assert_eq!(layer.z_index, 100);
        assert!(layer.visible);
        assert!(layer.id.starts_with("layer-0-"));
        assert_eq!(layer.features.len(), 1);
    }
}
