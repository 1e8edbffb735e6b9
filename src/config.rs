use serde::{Deserialize, Serialize};
use std::path::Path;

/// Labeling engine knobs. Candidate densities are expressed per centimetre
/// of paper and converted to map units for each render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub max_line_candidates_per_cm: f64,
    pub max_polygon_candidates_per_cm_squared: f64,
    pub use_all_labels: bool,
    pub use_partial_candidates: bool,
    pub draw_candidates: bool,
    pub draw_unplaced_labels: bool,
    pub collect_unplaced_labels: bool,
    pub placement_version: u8,
    /// Two z-indices closer than this compare equal when sorting labels.
    pub z_index_epsilon: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_line_candidates_per_cm: 5.0,
            max_polygon_candidates_per_cm_squared: 2.5,
            use_all_labels: false,
            use_partial_candidates: true,
            draw_candidates: false,
            draw_unplaced_labels: false,
            collect_unplaced_labels: false,
            placement_version: 2,
            z_index_epsilon: 4.0 * f64::EPSILON,
        }
    }
}

impl EngineSettings {
    /// Unplaced labels are tracked when they are either drawn or collected.
    pub fn wants_unplaced(&self) -> bool {
        self.draw_unplaced_labels || self.collect_unplaced_labels
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    pub enabled: bool,
    /// Anchor coordinates are multiplied by this and rounded when building
    /// dedup keys.
    pub anchor_scale: f64,
    pub store_file_name: String,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anchor_scale: 1e10,
            store_file_name: "bbox.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: f32,
    pub height: f32,
    pub dpi: f32,
    pub background: String,
    pub font_family: String,
    pub font_size: f32,
    pub text_color: String,
    pub label_background: String,
    pub label_border: String,
    pub unplaced_color: String,
    pub boundary_color: String,
    pub candidate_color: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 800.0,
            dpi: 96.0,
            background: "#FFFFFF".to_string(),
            font_family: "'trebuchet ms', verdana, arial, sans-serif".to_string(),
            font_size: 12.0,
            text_color: "#333333".to_string(),
            label_background: "rgba(255,255,255,0.8)".to_string(),
            label_border: "#9370DB".to_string(),
            unplaced_color: "#ff0000".to_string(),
            boundary_color: "#0000ff".to_string(),
            candidate_color: "#aaaaaa".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineSettings,
    pub consistency: ConsistencyConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineSettingsFile {
    max_line_candidates_per_cm: Option<f64>,
    max_polygon_candidates_per_cm_squared: Option<f64>,
    use_all_labels: Option<bool>,
    use_partial_candidates: Option<bool>,
    draw_candidates: Option<bool>,
    draw_unplaced_labels: Option<bool>,
    collect_unplaced_labels: Option<bool>,
    placement_version: Option<u8>,
    z_index_epsilon: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsistencyFile {
    enabled: Option<bool>,
    anchor_scale: Option<f64>,
    store_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderFile {
    width: Option<f32>,
    height: Option<f32>,
    dpi: Option<f32>,
    background: Option<String>,
    font_family: Option<String>,
    font_size: Option<f32>,
    text_color: Option<String>,
    label_background: Option<String>,
    label_border: Option<String>,
    unplaced_color: Option<String>,
    boundary_color: Option<String>,
    candidate_color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    labeling: Option<EngineSettingsFile>,
    consistency: Option<ConsistencyFile>,
    render: Option<RenderFile>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, config)
}

/// Overlay a JSON5 config document onto `config`.
pub fn parse_config(contents: &str, mut config: Config) -> anyhow::Result<Config> {
    let parsed: ConfigFile = json5::from_str(contents)?;

    if let Some(engine) = parsed.labeling {
        if let Some(v) = engine.max_line_candidates_per_cm {
            config.engine.max_line_candidates_per_cm = v;
        }
        if let Some(v) = engine.max_polygon_candidates_per_cm_squared {
            config.engine.max_polygon_candidates_per_cm_squared = v;
        }
        if let Some(v) = engine.use_all_labels {
            config.engine.use_all_labels = v;
        }
        if let Some(v) = engine.use_partial_candidates {
            config.engine.use_partial_candidates = v;
        }
        if let Some(v) = engine.draw_candidates {
            config.engine.draw_candidates = v;
        }
        if let Some(v) = engine.draw_unplaced_labels {
            config.engine.draw_unplaced_labels = v;
        }
        if let Some(v) = engine.collect_unplaced_labels {
            config.engine.collect_unplaced_labels = v;
        }
        if let Some(v) = engine.placement_version {
            if !(1..=2).contains(&v) {
                anyhow::bail!("placementVersion must be 1 or 2, got {v}");
            }
            config.engine.placement_version = v;
        }
        if let Some(v) = engine.z_index_epsilon {
            config.engine.z_index_epsilon = v.abs();
        }
    }

    if let Some(consistency) = parsed.consistency {
        if let Some(v) = consistency.enabled {
            config.consistency.enabled = v;
        }
        if let Some(v) = consistency.anchor_scale {
            if !(v.is_finite() && v > 0.0) {
                anyhow::bail!("consistency.anchorScale must be a positive number, got {v}");
            }
            config.consistency.anchor_scale = v;
        }
        if let Some(v) = consistency.store_file_name {
            config.consistency.store_file_name = v;
        }
    }

    if let Some(render) = parsed.render {
        if let Some(v) = render.width {
            config.render.width = v;
        }
        if let Some(v) = render.height {
            config.render.height = v;
        }
        if let Some(v) = render.dpi {
            config.render.dpi = v;
        }
        if let Some(v) = render.background {
            config.render.background = v;
        }
        if let Some(v) = render.font_family {
            config.render.font_family = v;
        }
        if let Some(v) = render.font_size {
            config.render.font_size = v;
        }
        if let Some(v) = render.text_color {
            config.render.text_color = v;
        }
        if let Some(v) = render.label_background {
            config.render.label_background = v;
        }
        if let Some(v) = render.label_border {
            config.render.label_border = v;
        }
        if let Some(v) = render.unplaced_color {
            config.render.unplaced_color = v;
        }
        if let Some(v) = render.boundary_color {
            config.render.boundary_color = v;
        }
        if let Some(v) = render.candidate_color {
            config.render.candidate_color = v;
        }
    }

    Ok(config)
}
