// JSON scene files: a map view plus layers of labeled features, used as the
// command-line input.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::MapSettings;
use crate::feature::{FeatureId, LabelFeature, LabelGeometry};
use crate::geometry::{Point, Polygon, Rect};
use crate::provider::{LabelProvider, LayerStyle, StaticLabelProvider};

const DEFAULT_LABEL_HEIGHT: f64 = 10.0;
/// Average glyph advance relative to the label height.
const CHAR_WIDTH_RATIO: f64 = 0.6;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read scene {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scene json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scene extent must have positive width and height")]
    InvalidExtent,
    #[error("layer #{0} has an empty id")]
    EmptyLayerId(usize),
}

type Coord = [f64; 2];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SceneGeometry {
    Point(Coord),
    Line(Vec<Coord>),
    Polygon(Vec<Coord>),
}

impl SceneGeometry {
    fn to_geometry(&self) -> LabelGeometry {
        match self {
            SceneGeometry::Point(c) => LabelGeometry::Point(point(c)),
            SceneGeometry::Line(coords) => LabelGeometry::Line(coords.iter().map(point).collect()),
            SceneGeometry::Polygon(coords) => LabelGeometry::Polygon(polygon(coords)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneFeature {
    pub id: u64,
    pub geometry: SceneGeometry,
    #[serde(default)]
    pub text: String,
    /// Label width and height in map units; derived from the text when
    /// absent.
    pub size: Option<[f64; 2]>,
    #[serde(default)]
    pub z_index: f64,
    pub priority: Option<f64>,
    #[serde(default = "default_true")]
    pub obstacle: bool,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneLayer {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub style: LayerStyle,
    #[serde(default)]
    pub features: Vec<SceneFeature>,
    #[serde(default)]
    pub sub_layers: Vec<SceneLayer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// `[xmin, ymin, xmax, ymax]` in map units.
    pub extent: [f64; 4],
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub buffer: f64,
    #[serde(default)]
    pub layer_order: Vec<String>,
    pub label_boundary: Option<Vec<Coord>>,
    #[serde(default)]
    pub blocking_regions: Vec<Vec<Coord>>,
    pub tile_level: Option<u32>,
    pub project_path: Option<PathBuf>,
    #[serde(default = "default_label_height")]
    pub label_height: f64,
    #[serde(default)]
    pub layers: Vec<SceneLayer>,
}

fn default_true() -> bool {
    true
}

fn default_label_height() -> f64 {
    DEFAULT_LABEL_HEIGHT
}

fn point(c: &Coord) -> Point {
    Point::new(c[0], c[1])
}

fn polygon(coords: &[Coord]) -> Polygon {
    Polygon::new(coords.iter().map(point).collect())
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, SceneError> {
        let scene: Scene = serde_json::from_str(contents)?;
        scene.validate()?;
        Ok(scene)
    }

    fn validate(&self) -> Result<(), SceneError> {
        let extent = self.extent_rect();
        if !(extent.width > 0.0 && extent.height > 0.0) || !extent.width.is_finite() || !extent.height.is_finite() {
            return Err(SceneError::InvalidExtent);
        }
        if let Some(idx) = self.layers.iter().position(|l| l.id.trim().is_empty()) {
            return Err(SceneError::EmptyLayerId(idx));
        }
        Ok(())
    }

    pub fn extent_rect(&self) -> Rect {
        let [x0, y0, x1, y1] = self.extent;
        Rect::from_corners(x0, y0, x1, y1)
    }

    pub fn map_settings(&self) -> MapSettings {
        let layer_order = if self.layer_order.is_empty() {
            self.layers.iter().map(|l| l.id.clone()).collect()
        } else {
            self.layer_order.clone()
        };
        MapSettings {
            visible_extent: self.extent_rect(),
            extent_buffer: self.buffer,
            rotation: self.rotation,
            layer_order,
            label_boundary: self.label_boundary.as_deref().map(polygon),
            blocking_regions: self.blocking_regions.iter().map(|r| polygon(r)).collect(),
            tile_level: self.tile_level,
            project_path: self.project_path.clone(),
        }
    }

    /// One provider per top-level layer, with sub-layers nested below it.
    pub fn providers(&self) -> Vec<Box<dyn LabelProvider>> {
        self.layers
            .iter()
            .map(|layer| Box::new(self.build_provider(layer)) as Box<dyn LabelProvider>)
            .collect()
    }

    fn build_provider(&self, layer: &SceneLayer) -> StaticLabelProvider {
        let features = layer.features.iter().map(|f| self.build_feature(f)).collect();
        let mut provider = StaticLabelProvider::new(layer.id.clone(), features).with_style(layer.style.clone());
        if let Some(name) = &layer.name {
            provider = provider.with_name(name.clone());
        }
        for sub in &layer.sub_layers {
            provider = provider.with_sub_provider(Box::new(self.build_provider(sub)));
        }
        provider
    }

    fn build_feature(&self, feature: &SceneFeature) -> LabelFeature {
        let size = match feature.size {
            Some([w, h]) => (w, h),
            None => {
                let chars = feature.text.chars().count().max(1) as f64;
                (chars * self.label_height * CHAR_WIDTH_RATIO, self.label_height)
            }
        };
        let mut label = LabelFeature::new(FeatureId(feature.id), Arc::new(feature.geometry.to_geometry()), size)
            .with_text(feature.text.clone())
            .with_z_index(feature.z_index)
            .with_obstacle(feature.obstacle, 1.0);
        if let Some(priority) = feature.priority {
            label = label.with_priority(priority);
        }
        if let Some(symbol) = &feature.symbol {
            label = label.with_symbol(symbol.clone());
        }
        label
    }
}
