// Placement solver contract. The engine only talks to `PlacementSolver`;
// `GreedySolver` is the implementation shipped with the crate.

mod greedy;
mod grid;

use thiserror::Error;

use crate::context::CancellationToken;
use crate::feature::{FeatureId, LabelFeature, ObstacleType, Placement, ProviderId, UpsideDownLabels};
use crate::geometry::{LabelBoundary, Rect};
use crate::placement_codec::PredefinedPosition;

pub use greedy::GreedySolver;
pub(crate) use grid::ObstacleGrid;

#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    pub max_line_candidates_per_map_unit: f64,
    pub max_polygon_candidates_per_map_unit_squared: f64,
    pub show_partial_labels: bool,
    pub placement_version: u8,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_line_candidates_per_map_unit: 0.5,
            max_polygon_candidates_per_map_unit_squared: 0.25,
            show_partial_labels: true,
            placement_version: 2,
        }
    }
}

/// Per-provider layer parameters handed to the solver before any of the
/// provider's features are registered.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub provider: ProviderId,
    pub layer_id: String,
    pub name: String,
    pub placement: Placement,
    pub priority: f64,
    /// Features produce candidates; inactive layers only contribute obstacles.
    pub active: bool,
    pub display_all: bool,
    pub merge_connected_lines: bool,
    pub obstacle_type: ObstacleType,
    pub centroid_inside: bool,
    pub upside_down: UpsideDownLabels,
    pub position_order: Vec<PredefinedPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerHandle(pub usize);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    #[error("feature {0} has empty geometry")]
    EmptyGeometry(FeatureId),
    #[error("feature {0} has a non-finite coordinate")]
    NonFiniteCoordinate(FeatureId),
    #[error("feature {id} {kind} geometry needs at least {needed} points, got {got}")]
    TooFewPoints {
        id: FeatureId,
        kind: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("feature {id} has invalid label size {width}x{height}")]
    InvalidLabelSize { id: FeatureId, width: f64, height: f64 },
    #[error("feature {id} is already registered")]
    Duplicate { id: FeatureId },
    #[error("unknown layer handle {0}")]
    UnknownLayer(usize),
}

#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("labeling extent is empty or not finite")]
    InvalidExtent,
    #[error("labeling boundary is empty")]
    EmptyBoundary,
    #[error("solver was cancelled")]
    Cancelled,
    #[error("solver failure: {0}")]
    Internal(String),
}

/// One concrete placement of a feature's label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPosition {
    feature: usize,
    rect: Rect,
    angle: f64,
    cost: f64,
    upside_down: bool,
}

impl LabelPosition {
    pub fn new(feature: usize, rect: Rect, angle: f64, cost: f64) -> Self {
        Self {
            feature,
            rect,
            angle,
            cost,
            upside_down: false,
        }
    }

    pub fn with_upside_down(mut self, upside_down: bool) -> Self {
        self.upside_down = upside_down;
        self
    }

    /// Index of the satisfied feature inside the problem it was generated for.
    pub fn feature_index(&self) -> usize {
        self.feature
    }

    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    pub fn x(&self) -> f64 {
        self.rect.x
    }

    pub fn y(&self) -> f64 {
        self.rect.y
    }

    pub fn width(&self) -> f64 {
        self.rect.width
    }

    pub fn height(&self) -> f64 {
        self.rect.height
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn is_upside_down(&self) -> bool {
        self.upside_down
    }
}

#[derive(Debug, Clone)]
pub struct ProblemFeature {
    pub feature: LabelFeature,
    pub layer: LayerHandle,
    /// Ranked best first.
    pub candidates: Vec<LabelPosition>,
    /// Position reported for the feature when it ends up unplaced and no
    /// candidate survived the boundary filter.
    pub fallback: LabelPosition,
}

/// The per-pass placement problem: every labelable feature with its ranked
/// candidates, plus the area candidates were generated against.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    extent: Rect,
    boundary: LabelBoundary,
    layers: Vec<LayerSpec>,
    features: Vec<ProblemFeature>,
}

impl Problem {
    pub fn new(extent: Rect, boundary: LabelBoundary, layers: Vec<LayerSpec>) -> Self {
        Self {
            extent,
            boundary,
            layers,
            features: Vec::new(),
        }
    }

    pub fn push_feature(&mut self, feature: ProblemFeature) -> usize {
        self.features.push(feature);
        self.features.len() - 1
    }

    pub fn extent(&self) -> &Rect {
        &self.extent
    }

    pub fn boundary(&self) -> &LabelBoundary {
        &self.boundary
    }

    pub fn layer(&self, handle: LayerHandle) -> Option<&LayerSpec> {
        self.layers.get(handle.0)
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn feature(&self, index: usize) -> Option<&LabelFeature> {
        self.features.get(index).map(|f| &f.feature)
    }

    pub fn feature_mut(&mut self, index: usize) -> Option<&mut LabelFeature> {
        self.features.get_mut(index).map(|f| &mut f.feature)
    }

    pub fn problem_feature(&self, index: usize) -> Option<&ProblemFeature> {
        self.features.get(index)
    }

    pub fn feature_candidate_count(&self, index: usize) -> usize {
        self.features
            .get(index)
            .map(|f| f.candidates.len())
            .unwrap_or(0)
    }

    pub fn feature_candidate(&self, index: usize, candidate: usize) -> Option<&LabelPosition> {
        self.features.get(index)?.candidates.get(candidate)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &LabelPosition> + '_ {
        self.features.iter().flat_map(|f| f.candidates.iter())
    }

    pub fn position_feature(&self, position: &LabelPosition) -> Option<&LabelFeature> {
        self.feature(position.feature_index())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    pub placed: Vec<LabelPosition>,
    pub unplaced: Vec<LabelPosition>,
}

/// Generates and resolves label candidates for one pass.
///
/// Implementations must be deterministic for identical input, poll
/// `cancel` often enough to stop promptly, and drop just the features they
/// cannot handle instead of failing the whole problem.
pub trait PlacementSolver {
    fn configure(&mut self, settings: &SolverSettings);

    fn add_layer(&mut self, spec: LayerSpec) -> LayerHandle;

    /// Register one feature. A rejected feature is simply not part of the
    /// problem; the caller decides whether to log it.
    fn register_feature(
        &mut self,
        layer: LayerHandle,
        feature: LabelFeature,
    ) -> Result<(), RegistrationError>;

    fn extract_problem(
        &mut self,
        extent: Rect,
        boundary: &LabelBoundary,
        cancel: &CancellationToken,
    ) -> Result<Problem, SolverError>;

    fn solve_problem(
        &mut self,
        problem: &Problem,
        use_all_labels: bool,
        want_unplaced: bool,
        cancel: &CancellationToken,
    ) -> Result<Solution, SolverError>;
}
