// Deterministic greedy placement: rank candidates per feature, then walk
// features in priority order and keep the first candidate that does not
// collide with anything already placed.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, trace};

use super::{
    LabelPosition, LayerHandle, LayerSpec, ObstacleGrid, PlacementSolver, Problem,
    ProblemFeature, RegistrationError, Solution, SolverError, SolverSettings,
};
use crate::context::CancellationToken;
use crate::feature::{FeatureId, LabelFeature, LabelGeometry, ObstacleType, Placement, UpsideDownLabels};
use crate::geometry::{
    LabelBoundary, Point, Polygon, Rect, point_along, polyline_length, rotated_box_bounds,
    segments_intersect,
};
use crate::placement_codec::DEFAULT_POSITION_ORDER;

const LINE_ANCHOR_FRACTIONS: [f64; 5] = [0.5, 0.35, 0.65, 0.2, 0.8];
const MAX_CANDIDATES_PER_FEATURE: usize = 64;
const MAX_POLYGON_GRID_SIDE: usize = 16;
const OBSTACLE_WEIGHT: f64 = 1.0;
const LINE_OBSTACLE_WEIGHT: f64 = 0.5;
const POINT_RANK_STEP: f64 = 0.1;
const ENDPOINT_EPS: f64 = 1e-9;
const CANCEL_POLL_INTERVAL: usize = 32;

#[derive(Debug, Clone)]
struct Registered {
    layer: LayerHandle,
    feature: LabelFeature,
}

#[derive(Debug, Default)]
pub struct GreedySolver {
    settings: SolverSettings,
    layers: Vec<LayerSpec>,
    features: Vec<Registered>,
    ids: HashSet<(usize, FeatureId)>,
}

impl GreedySolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn registered_count(&self) -> usize {
        self.features.len()
    }
}

impl PlacementSolver for GreedySolver {
    fn configure(&mut self, settings: &SolverSettings) {
        self.settings = settings.clone();
    }

    fn add_layer(&mut self, spec: LayerSpec) -> LayerHandle {
        self.layers.push(spec);
        LayerHandle(self.layers.len() - 1)
    }

    fn register_feature(
        &mut self,
        layer: LayerHandle,
        feature: LabelFeature,
    ) -> Result<(), RegistrationError> {
        if layer.0 >= self.layers.len() {
            return Err(RegistrationError::UnknownLayer(layer.0));
        }
        validate_feature(&feature)?;
        if !self.ids.insert((layer.0, feature.id())) {
            return Err(RegistrationError::Duplicate { id: feature.id() });
        }
        self.features.push(Registered { layer, feature });
        Ok(())
    }

    fn extract_problem(
        &mut self,
        extent: Rect,
        boundary: &LabelBoundary,
        cancel: &CancellationToken,
    ) -> Result<Problem, SolverError> {
        if !(extent.x.is_finite()
            && extent.y.is_finite()
            && extent.width.is_finite()
            && extent.height.is_finite())
            || extent.width <= 0.0
            || extent.height <= 0.0
        {
            return Err(SolverError::InvalidExtent);
        }
        if boundary.is_empty() {
            return Err(SolverError::EmptyBoundary);
        }

        let registered = merge_connected_lines(&self.layers, &self.features);
        let obstacles = collect_obstacles(&self.layers, &registered, &extent);
        let mut problem = Problem::new(extent, boundary.clone(), self.layers.clone());

        for (idx, entry) in registered.iter().enumerate() {
            if idx % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(SolverError::Cancelled);
            }
            let Some(layer) = self.layers.get(entry.layer.0) else {
                continue;
            };
            if !layer.active {
                continue;
            }
            let Some(bbox) = entry.feature.geometry().bounding_box() else {
                continue;
            };
            if !bbox.intersects(&extent) {
                continue;
            }

            let feature_index = problem.feature_count();
            let raw = generate_candidates(feature_index, &entry.feature, layer, &self.settings);
            let fallback = raw.first().cloned().unwrap_or_else(|| {
                let anchor = entry.feature.geometry().anchor().unwrap_or_default();
                let (w, h) = entry.feature.size();
                LabelPosition::new(feature_index, Rect::centered(anchor, w, h), 0.0, f64::MAX)
            });

            let mut candidates: Vec<LabelPosition> = raw
                .into_iter()
                .filter(|c| c.rect().intersects(&extent))
                .filter(|c| {
                    if self.settings.show_partial_labels {
                        boundary.touches_rect(c.rect()) && boundary.contains_point(c.rect().center())
                    } else {
                        boundary.contains_rect(c.rect())
                    }
                })
                .map(|c| {
                    if self.settings.placement_version >= 2 {
                        apply_obstacle_cost(c, entry.feature.id(), entry.layer, &obstacles)
                    } else {
                        c
                    }
                })
                .collect();
            candidates.sort_by(|a, b| a.cost().partial_cmp(&b.cost()).unwrap_or(Ordering::Equal));
            candidates.truncate(MAX_CANDIDATES_PER_FEATURE);

            trace!(
                feature = %entry.feature.id(),
                candidates = candidates.len(),
                "generated label candidates"
            );
            problem.push_feature(ProblemFeature {
                feature: entry.feature.clone(),
                layer: entry.layer,
                candidates,
                fallback,
            });
        }

        debug!(
            features = problem.feature_count(),
            obstacles = obstacles.len(),
            "extracted labeling problem"
        );
        Ok(problem)
    }

    fn solve_problem(
        &mut self,
        problem: &Problem,
        use_all_labels: bool,
        want_unplaced: bool,
        cancel: &CancellationToken,
    ) -> Result<Solution, SolverError> {
        let order = placement_order(problem, self.settings.placement_version);
        let cell = average_label_side(problem).max(problem.extent().width.max(problem.extent().height) / 256.0);
        let mut grid = ObstacleGrid::new(cell);
        let mut placed_rects: Vec<Rect> = Vec::new();
        let mut solution = Solution::default();

        for (step, idx) in order.into_iter().enumerate() {
            if step % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(SolverError::Cancelled);
            }
            let Some(entry) = problem.problem_feature(idx) else {
                continue;
            };
            let display_all = problem
                .layer(entry.layer)
                .map(|l| l.display_all)
                .unwrap_or(false);

            let free = entry.candidates.iter().find(|candidate| {
                !grid
                    .query(candidate.rect())
                    .any(|other| placed_rects[other].overlap_area(candidate.rect()) > 0.0)
            });
            let chosen = match free {
                Some(candidate) => Some(candidate.clone()),
                None if use_all_labels || display_all => entry.candidates.first().cloned(),
                None => None,
            };

            match chosen {
                Some(position) => {
                    grid.insert(placed_rects.len(), position.rect());
                    placed_rects.push(*position.rect());
                    solution.placed.push(position);
                }
                None if want_unplaced => {
                    let position = entry
                        .candidates
                        .first()
                        .cloned()
                        .unwrap_or_else(|| entry.fallback.clone());
                    solution.unplaced.push(position);
                }
                None => {}
            }
        }

        Ok(solution)
    }
}

fn validate_feature(feature: &LabelFeature) -> Result<(), RegistrationError> {
    let id = feature.id();
    let (width, height) = feature.size();
    if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
        return Err(RegistrationError::InvalidLabelSize { id, width, height });
    }
    let geometry = feature.geometry();
    let points = geometry.points();
    if points.is_empty() {
        return Err(RegistrationError::EmptyGeometry(id));
    }
    if points.iter().any(|p| !p.is_finite()) {
        return Err(RegistrationError::NonFiniteCoordinate(id));
    }
    let needed = match geometry {
        LabelGeometry::Point(_) => 1,
        LabelGeometry::Line(_) => 2,
        LabelGeometry::Polygon(_) => 3,
    };
    if points.len() < needed {
        return Err(RegistrationError::TooFewPoints {
            id,
            kind: geometry.kind_name(),
            needed,
            got: points.len(),
        });
    }
    match geometry {
        LabelGeometry::Line(line) if polyline_length(line) <= 0.0 => {
            Err(RegistrationError::EmptyGeometry(id))
        }
        LabelGeometry::Polygon(poly) if poly.area() <= 0.0 => {
            Err(RegistrationError::EmptyGeometry(id))
        }
        _ => Ok(()),
    }
}

fn feature_priority(problem: &Problem, entry: &ProblemFeature) -> f64 {
    entry
        .feature
        .priority()
        .or_else(|| problem.layer(entry.layer).map(|l| l.priority))
        .unwrap_or(0.5)
}

/// Lower priority values are placed first. Ties go to the feature with fewer
/// candidates, then to registration order.
fn placement_order(problem: &Problem, placement_version: u8) -> Vec<usize> {
    let mut order: Vec<usize> = (0..problem.feature_count()).collect();
    order.sort_by(|&a, &b| {
        let (Some(fa), Some(fb)) = (problem.problem_feature(a), problem.problem_feature(b)) else {
            return a.cmp(&b);
        };
        if placement_version >= 2 {
            let pa = feature_priority(problem, fa);
            let pb = feature_priority(problem, fb);
            if (pa - pb).abs() > f64::EPSILON {
                return pa.partial_cmp(&pb).unwrap_or(Ordering::Equal);
            }
        }
        fa.candidates
            .len()
            .cmp(&fb.candidates.len())
            .then(a.cmp(&b))
    });
    order
}

fn average_label_side(problem: &Problem) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for idx in 0..problem.feature_count() {
        if let Some(feature) = problem.feature(idx) {
            let (w, h) = feature.size();
            sum += w.max(h);
            count += 1;
        }
    }
    if count == 0 { 1.0 } else { sum / count as f64 }
}

fn generate_candidates(
    feature_index: usize,
    feature: &LabelFeature,
    layer: &LayerSpec,
    settings: &SolverSettings,
) -> Vec<LabelPosition> {
    let (w, h) = feature.size();
    match feature.geometry() {
        LabelGeometry::Point(p) => point_candidates(feature_index, *p, w, h, layer),
        LabelGeometry::Line(points) => line_candidates(feature_index, points, w, h, layer, settings),
        LabelGeometry::Polygon(poly) => match layer.placement {
            Placement::Line | Placement::Curved | Placement::PerimeterCurved => {
                let mut ring = poly.ring.clone();
                if let Some(first) = ring.first().copied() {
                    ring.push(first);
                }
                line_candidates(feature_index, &ring, w, h, layer, settings)
            }
            Placement::OutsidePolygons => outside_polygon_candidates(feature_index, poly, w, h),
            _ => polygon_candidates(feature_index, poly, w, h, layer, settings),
        },
    }
}

fn point_candidates(
    feature_index: usize,
    anchor: Point,
    w: f64,
    h: f64,
    layer: &LayerSpec,
) -> Vec<LabelPosition> {
    if layer.placement == Placement::OverPoint {
        return vec![LabelPosition::new(feature_index, Rect::centered(anchor, w, h), 0.0, 0.0)];
    }
    let order = if layer.placement == Placement::OrderedPositionsAroundPoint
        && !layer.position_order.is_empty()
    {
        layer.position_order.as_slice()
    } else {
        &DEFAULT_POSITION_ORDER[..]
    };
    order
        .iter()
        .enumerate()
        .map(|(rank, position)| {
            let (dx, dy) = position.center_offset();
            let center = Point::new(anchor.x + dx * w, anchor.y + dy * h);
            LabelPosition::new(
                feature_index,
                Rect::centered(center, w, h),
                0.0,
                rank as f64 * POINT_RANK_STEP,
            )
        })
        .collect()
}

fn line_fractions(max_count: usize) -> Vec<f64> {
    let mut fractions: Vec<f64> = LINE_ANCHOR_FRACTIONS.to_vec();
    if max_count > fractions.len() {
        let extra = max_count - fractions.len();
        for i in 1..=extra {
            let t = i as f64 / (extra + 1) as f64;
            if !fractions.iter().any(|f| (f - t).abs() < 1e-6) {
                fractions.push(t);
            }
        }
    }
    fractions.truncate(max_count.max(1));
    fractions
}

fn upright_angle(angle: f64, policy: UpsideDownLabels) -> (f64, bool) {
    let normalized = angle.rem_euclid(360.0);
    let upside_down = normalized > 90.0 && normalized <= 270.0;
    if !upside_down {
        return (normalized, false);
    }
    match policy {
        UpsideDownLabels::ShowAll => (normalized, true),
        UpsideDownLabels::Upright | UpsideDownLabels::ShowDefined => {
            ((normalized + 180.0).rem_euclid(360.0), false)
        }
    }
}

fn line_candidates(
    feature_index: usize,
    points: &[Point],
    w: f64,
    h: f64,
    layer: &LayerSpec,
    settings: &SolverSettings,
) -> Vec<LabelPosition> {
    let length = polyline_length(points);
    let max_count = (length * settings.max_line_candidates_per_map_unit)
        .floor()
        .clamp(1.0, MAX_CANDIDATES_PER_FEATURE as f64) as usize;
    line_fractions(max_count)
        .into_iter()
        .filter_map(|t| {
            let (center, raw_angle) = point_along(points, t)?;
            let (angle, upside_down) = if layer.placement == Placement::Horizontal {
                (0.0, false)
            } else {
                upright_angle(raw_angle, layer.upside_down)
            };
            let rect = rotated_box_bounds(center, w, h, angle);
            Some(
                LabelPosition::new(feature_index, rect, angle, (t - 0.5).abs())
                    .with_upside_down(upside_down),
            )
        })
        .collect()
}

fn polygon_candidates(
    feature_index: usize,
    poly: &Polygon,
    w: f64,
    h: f64,
    layer: &LayerSpec,
    settings: &SolverSettings,
) -> Vec<LabelPosition> {
    let Some(bbox) = poly.bounding_box() else {
        return Vec::new();
    };
    let diag = bbox.width.hypot(bbox.height).max(f64::MIN_POSITIVE);
    let mut out = Vec::new();
    let centroid = poly.centroid();
    if let Some(c) = centroid
        && (!layer.centroid_inside || poly.contains_point(c))
    {
        out.push(LabelPosition::new(feature_index, Rect::centered(c, w, h), 0.0, 0.0));
    }

    let budget = (poly.area() * settings.max_polygon_candidates_per_map_unit_squared)
        .floor()
        .clamp(1.0, (MAX_POLYGON_GRID_SIDE * MAX_POLYGON_GRID_SIDE) as f64);
    let side = (budget.sqrt().ceil() as usize).clamp(1, MAX_POLYGON_GRID_SIDE);
    let origin = centroid.unwrap_or_else(|| bbox.center());
    for iy in 0..side {
        for ix in 0..side {
            let p = Point::new(
                bbox.x + bbox.width * (ix as f64 + 0.5) / side as f64,
                bbox.y + bbox.height * (iy as f64 + 0.5) / side as f64,
            );
            if !poly.contains_point(p) {
                continue;
            }
            let cost = 0.05 + p.distance(&origin) / diag;
            out.push(LabelPosition::new(feature_index, Rect::centered(p, w, h), 0.0, cost));
        }
    }
    out
}

fn outside_polygon_candidates(
    feature_index: usize,
    poly: &Polygon,
    w: f64,
    h: f64,
) -> Vec<LabelPosition> {
    let Some(bbox) = poly.bounding_box() else {
        return Vec::new();
    };
    let c = bbox.center();
    let centers = [
        Point::new(c.x, bbox.y_max() + h / 2.0),
        Point::new(bbox.x_max() + w / 2.0, c.y),
        Point::new(c.x, bbox.y - h / 2.0),
        Point::new(bbox.x - w / 2.0, c.y),
    ];
    centers
        .iter()
        .enumerate()
        .map(|(rank, center)| {
            LabelPosition::new(
                feature_index,
                Rect::centered(*center, w, h),
                0.0,
                rank as f64 * POINT_RANK_STEP,
            )
        })
        .collect()
}

struct Obstacle {
    feature: FeatureId,
    layer: LayerHandle,
    kind: ObstacleType,
    factor: f64,
    geometry: std::sync::Arc<LabelGeometry>,
}

fn collect_obstacles(layers: &[LayerSpec], registered: &[Registered], extent: &Rect) -> Vec<Obstacle> {
    registered
        .iter()
        .filter(|entry| entry.feature.is_obstacle() && entry.feature.obstacle_factor() > 0.0)
        .filter(|entry| {
            entry
                .feature
                .geometry()
                .bounding_box()
                .map(|b| b.intersects(extent))
                .unwrap_or(false)
        })
        .map(|entry| Obstacle {
            feature: entry.feature.id(),
            layer: entry.layer,
            kind: layers
                .get(entry.layer.0)
                .map(|l| l.obstacle_type)
                .unwrap_or_default(),
            factor: entry.feature.obstacle_factor(),
            geometry: entry.feature.shared_geometry(),
        })
        .collect()
}

fn rect_crosses_line(rect: &Rect, points: &[Point]) -> bool {
    if points.iter().any(|p| rect.contains_point(*p)) {
        return true;
    }
    let corners = rect.corners();
    points.windows(2).any(|w| {
        (0..4).any(|k| segments_intersect(w[0], w[1], corners[k], corners[(k + 1) % 4]))
    })
}

fn obstacle_penalty(rect: &Rect, obstacle: &Obstacle) -> f64 {
    match obstacle.geometry.as_ref() {
        LabelGeometry::Point(p) => {
            if rect.contains_point(*p) {
                OBSTACLE_WEIGHT
            } else {
                0.0
            }
        }
        LabelGeometry::Line(points) => {
            if rect_crosses_line(rect, points) {
                LINE_OBSTACLE_WEIGHT
            } else {
                0.0
            }
        }
        LabelGeometry::Polygon(poly) => {
            let hit = match obstacle.kind {
                ObstacleType::PolygonInterior => poly.contains_point(rect.center()),
                ObstacleType::PolygonBoundary => {
                    let mut ring = poly.ring.clone();
                    if let Some(first) = ring.first().copied() {
                        ring.push(first);
                    }
                    rect_crosses_line(rect, &ring)
                }
                ObstacleType::PolygonWhole => poly.intersects_rect(rect),
            };
            if hit { OBSTACLE_WEIGHT } else { 0.0 }
        }
    }
}

fn apply_obstacle_cost(
    candidate: LabelPosition,
    own: FeatureId,
    own_layer: LayerHandle,
    obstacles: &[Obstacle],
) -> LabelPosition {
    let penalty: f64 = obstacles
        .iter()
        .filter(|o| !(o.feature == own && o.layer == own_layer))
        .map(|o| obstacle_penalty(candidate.rect(), o) * o.factor)
        .sum();
    if penalty <= 0.0 {
        return candidate;
    }
    let upside_down = candidate.is_upside_down();
    LabelPosition::new(
        candidate.feature_index(),
        *candidate.rect(),
        candidate.angle(),
        candidate.cost() + penalty,
    )
    .with_upside_down(upside_down)
}

fn near(a: Point, b: Point) -> bool {
    (a.x - b.x).abs() <= ENDPOINT_EPS && (a.y - b.y).abs() <= ENDPOINT_EPS
}

/// Join two polylines sharing an endpoint, if they do.
fn join_lines(a: &[Point], b: &[Point]) -> Option<Vec<Point>> {
    let (a_first, a_last) = (*a.first()?, *a.last()?);
    let (b_first, b_last) = (*b.first()?, *b.last()?);
    let mut out: Vec<Point>;
    if near(a_last, b_first) {
        out = a.to_vec();
        out.extend_from_slice(&b[1..]);
    } else if near(a_last, b_last) {
        out = a.to_vec();
        out.extend(b.iter().rev().skip(1));
    } else if near(a_first, b_last) {
        out = b.to_vec();
        out.extend_from_slice(&a[1..]);
    } else if near(a_first, b_first) {
        out = a.iter().rev().copied().collect();
        out.extend_from_slice(&b[1..]);
    } else {
        return None;
    }
    Some(out)
}

/// Merge line features that share text and an endpoint on layers asking for
/// it. The merged feature keeps the id of the first feature in the chain.
fn merge_connected_lines(layers: &[LayerSpec], features: &[Registered]) -> Vec<Registered> {
    let mut out: Vec<Registered> = Vec::with_capacity(features.len());
    let mut absorbed = vec![false; features.len()];

    for i in 0..features.len() {
        if absorbed[i] {
            continue;
        }
        let entry = &features[i];
        let merge = layers
            .get(entry.layer.0)
            .map(|l| l.merge_connected_lines)
            .unwrap_or(false);
        let LabelGeometry::Line(points) = entry.feature.geometry() else {
            out.push(entry.clone());
            continue;
        };
        if !merge || entry.feature.label_text().is_empty() {
            out.push(entry.clone());
            continue;
        }

        let mut chain = points.clone();
        let mut grew = true;
        while grew {
            grew = false;
            for j in (i + 1)..features.len() {
                if absorbed[j] {
                    continue;
                }
                let other = &features[j];
                if other.layer != entry.layer
                    || other.feature.label_text() != entry.feature.label_text()
                {
                    continue;
                }
                let LabelGeometry::Line(other_points) = other.feature.geometry() else {
                    continue;
                };
                if let Some(joined) = join_lines(&chain, other_points) {
                    chain = joined;
                    absorbed[j] = true;
                    grew = true;
                }
            }
        }

        let mut merged = entry.clone();
        if chain.len() != points.len() {
            merged.feature.replace_geometry(LabelGeometry::Line(chain));
        }
        out.push(merged);
    }
    out
}
