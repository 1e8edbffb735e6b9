use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Polygon, Rect, bounding_box, point_along};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a provider in the engine's flattened provider table for the
/// current pass. Only meaningful while that pass is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Placement {
    #[default]
    AroundPoint,
    OverPoint,
    Line,
    Curved,
    Horizontal,
    Free,
    OrderedPositionsAroundPoint,
    PerimeterCurved,
    OutsidePolygons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObstacleType {
    /// Candidates are penalised for covering the feature's interior.
    #[default]
    PolygonInterior,
    /// Only the feature's boundary acts as an obstacle.
    PolygonBoundary,
    /// The whole feature geometry acts as an obstacle.
    PolygonWhole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsideDownLabels {
    #[default]
    Upright,
    ShowDefined,
    ShowAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelGeometry {
    Point(Point),
    Line(Vec<Point>),
    Polygon(Polygon),
}

impl LabelGeometry {
    pub fn bounding_box(&self) -> Option<Rect> {
        match self {
            LabelGeometry::Point(p) => Some(Rect::new(p.x, p.y, 0.0, 0.0)),
            LabelGeometry::Line(points) => bounding_box(points),
            LabelGeometry::Polygon(poly) => poly.bounding_box(),
        }
    }

    /// Representative anchor: the point itself, the midpoint along a line,
    /// or the polygon centroid.
    pub fn anchor(&self) -> Option<Point> {
        match self {
            LabelGeometry::Point(p) => Some(*p),
            LabelGeometry::Line(points) => point_along(points, 0.5).map(|(p, _)| p),
            LabelGeometry::Polygon(poly) => poly.centroid(),
        }
    }

    pub fn points(&self) -> &[Point] {
        match self {
            LabelGeometry::Point(p) => std::slice::from_ref(p),
            LabelGeometry::Line(points) => points,
            LabelGeometry::Polygon(poly) => &poly.ring,
        }
    }

    pub fn rotated(&self, degrees: f64, center: Point) -> LabelGeometry {
        match self {
            LabelGeometry::Point(p) => LabelGeometry::Point(p.rotated(degrees, center)),
            LabelGeometry::Line(points) => {
                LabelGeometry::Line(points.iter().map(|p| p.rotated(degrees, center)).collect())
            }
            LabelGeometry::Polygon(poly) => LabelGeometry::Polygon(poly.rotated(degrees, center)),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            LabelGeometry::Point(_) => "point",
            LabelGeometry::Line(_) => "line",
            LabelGeometry::Polygon(_) => "polygon",
        }
    }
}

/// One label request produced by a provider for the current pass.
///
/// The geometry is shared with the layer that produced it; the feature only
/// holds a reference-counted handle.
#[derive(Debug, Clone)]
pub struct LabelFeature {
    id: FeatureId,
    provider: Option<ProviderId>,
    geometry: Arc<LabelGeometry>,
    size: (f64, f64),
    z_index: f64,
    label_text: String,
    priority: Option<f64>,
    is_obstacle: bool,
    obstacle_factor: f64,
    symbol: Option<String>,
}

impl LabelFeature {
    pub fn new(id: FeatureId, geometry: Arc<LabelGeometry>, size: (f64, f64)) -> Self {
        Self {
            id,
            provider: None,
            geometry,
            size,
            z_index: 0.0,
            label_text: String::new(),
            priority: None,
            is_obstacle: true,
            obstacle_factor: 1.0,
            symbol: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.label_text = text.into();
        self
    }

    pub fn with_z_index(mut self, z_index: f64) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority.clamp(0.0, 1.0));
        self
    }

    pub fn with_obstacle(mut self, is_obstacle: bool, factor: f64) -> Self {
        self.is_obstacle = is_obstacle;
        self.obstacle_factor = factor.max(0.0);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn id(&self) -> FeatureId {
        self.id
    }

    pub fn provider(&self) -> Option<ProviderId> {
        self.provider
    }

    pub(crate) fn set_provider(&mut self, provider: ProviderId) {
        self.provider = Some(provider);
    }

    pub fn geometry(&self) -> &LabelGeometry {
        &self.geometry
    }

    pub fn shared_geometry(&self) -> Arc<LabelGeometry> {
        Arc::clone(&self.geometry)
    }

    pub(crate) fn replace_geometry(&mut self, geometry: LabelGeometry) {
        self.geometry = Arc::new(geometry);
    }

    /// Label width and height in map units.
    pub fn size(&self) -> (f64, f64) {
        self.size
    }

    pub fn area(&self) -> f64 {
        self.size.0 * self.size.1
    }

    pub fn z_index(&self) -> f64 {
        self.z_index
    }

    pub fn label_text(&self) -> &str {
        &self.label_text
    }

    pub fn priority(&self) -> Option<f64> {
        self.priority
    }

    pub fn is_obstacle(&self) -> bool {
        self.is_obstacle
    }

    pub fn obstacle_factor(&self) -> f64 {
        self.obstacle_factor
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Drop the symbol once the label has been painted; it may not outlive
    /// the draw call.
    pub fn clear_symbol(&mut self) {
        self.symbol = None;
    }
}
