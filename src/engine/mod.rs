// Labeling pass orchestration: collect features from every provider, solve
// the placement problem (optionally against the tile-consistency store),
// order the result and dispatch drawing back to the providers.

mod draw;
mod sorter;
mod staged;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::{ConsistencyConfig, EngineSettings};
use crate::consistency::{SessionCache, solve_tile_consistent};
use crate::context::{DrawPass, ExpressionScope, RenderContext};
use crate::geometry::{LabelBoundary, Polygon, Rect};
use crate::provider::LabelProvider;
use crate::registry::{FrameRotation, LabelFeatureRegistry};
use crate::results::{LabelRecord, LabelingResults};
use crate::solver::{GreedySolver, LabelPosition, PlacementSolver, Problem, Solution, SolverError, SolverSettings};

use draw::{DrawTarget, draw_pass};

pub use sorter::{LabelSorter, SortKey};
pub use staged::StagedLabelingEngine;

/// Builds a fresh solver for each pass.
pub type SolverFactory = Box<dyn Fn() -> Box<dyn PlacementSolver> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Registering,
    Solved,
    Drawn,
}

/// The map view a pass is labeled for.
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    pub visible_extent: Rect,
    pub extent_buffer: f64,
    /// Map rotation in degrees, clockwise.
    pub rotation: f64,
    /// Configured layer draw order; used to break z-index ties.
    pub layer_order: Vec<String>,
    /// Replaces the visible area as the starting permissible region.
    pub label_boundary: Option<Polygon>,
    pub blocking_regions: Vec<Polygon>,
    /// Zoom level of the tile being rendered. Together with `project_path`
    /// this switches the pass to tile-consistent solving.
    pub tile_level: Option<u32>,
    pub project_path: Option<PathBuf>,
}

impl MapSettings {
    pub fn new(visible_extent: Rect) -> Self {
        Self {
            visible_extent,
            ..Self::default()
        }
    }

    pub fn is_rotated(&self) -> bool {
        self.rotation.abs() > f64::EPSILON
    }

    fn buffered_extent(&self) -> Rect {
        self.visible_extent.grow(self.extent_buffer)
    }

    /// Permissible labeling area: the explicit boundary or the buffered
    /// visible area, minus every blocking region.
    pub fn labeling_boundary(&self) -> LabelBoundary {
        let outer = self
            .label_boundary
            .clone()
            .unwrap_or_else(|| self.buffered_extent().to_polygon());
        self.blocking_regions
            .iter()
            .fold(LabelBoundary::new(outer), |boundary, region| boundary.difference(region))
    }

    /// Extent candidates are generated in, in the solver's unrotated frame.
    pub fn labeling_extent(&self) -> Rect {
        let extent = self.buffered_extent();
        if !self.is_rotated() {
            return extent;
        }
        extent
            .to_polygon()
            .rotated(-self.rotation, self.visible_extent.center())
            .bounding_box()
            .unwrap_or(extent)
    }

    pub fn frame_rotation(&self) -> Option<FrameRotation> {
        self.is_rotated().then(|| FrameRotation {
            degrees: self.rotation,
            center: self.visible_extent.center(),
        })
    }
}

pub struct LabelingEngine {
    map: MapSettings,
    settings: EngineSettings,
    consistency: ConsistencyConfig,
    providers: Vec<Box<dyn LabelProvider>>,
    solver_factory: SolverFactory,
    solver: Option<Box<dyn PlacementSolver>>,
    registry: LabelFeatureRegistry,
    problem: Option<Problem>,
    labels: Vec<LabelPosition>,
    unplaced: Vec<LabelPosition>,
    results: LabelingResults,
    sessions: Arc<Mutex<SessionCache>>,
    state: EngineState,
}

impl LabelingEngine {
    pub fn new(map: MapSettings, settings: EngineSettings) -> Self {
        Self {
            map,
            settings,
            consistency: ConsistencyConfig::default(),
            providers: Vec::new(),
            solver_factory: Box::new(|| Box::new(GreedySolver::new())),
            solver: None,
            registry: LabelFeatureRegistry::default(),
            problem: None,
            labels: Vec::new(),
            unplaced: Vec::new(),
            results: LabelingResults::default(),
            sessions: Arc::new(Mutex::new(SessionCache::new())),
            state: EngineState::Idle,
        }
    }

    pub fn with_consistency(mut self, consistency: ConsistencyConfig) -> Self {
        self.consistency = consistency;
        self
    }

    /// Share tile sessions with other engines instead of keeping a private
    /// cache.
    pub fn with_session_cache(mut self, sessions: Arc<Mutex<SessionCache>>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_solver_factory(
        mut self,
        factory: impl Fn() -> Box<dyn PlacementSolver> + Send + Sync + 'static,
    ) -> Self {
        self.solver_factory = Box::new(factory);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn map_settings(&self) -> &MapSettings {
        &self.map
    }

    pub fn map_settings_mut(&mut self) -> &mut MapSettings {
        &mut self.map
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn session_cache(&self) -> &Arc<Mutex<SessionCache>> {
        &self.sessions
    }

    pub fn providers(&self) -> &[Box<dyn LabelProvider>] {
        &self.providers
    }

    pub fn registry(&self) -> &LabelFeatureRegistry {
        &self.registry
    }

    pub fn problem(&self) -> Option<&Problem> {
        self.problem.as_ref()
    }

    /// Placed labels in draw order.
    pub fn labels(&self) -> &[LabelPosition] {
        &self.labels
    }

    pub fn unplaced_labels(&self) -> &[LabelPosition] {
        &self.unplaced
    }

    pub fn results(&self) -> &LabelingResults {
        &self.results
    }

    pub fn take_results(&mut self) -> LabelingResults {
        std::mem::take(&mut self.results)
    }

    /// Take ownership of `provider`; it participates from the next pass.
    pub fn add_provider(&mut self, provider: Box<dyn LabelProvider>) {
        self.providers.push(provider);
    }

    /// Drop every top-level provider for `layer_id` along with its
    /// sub-providers. Refused while a pass holds references into the
    /// provider list.
    pub fn remove_provider(&mut self, layer_id: &str) -> bool {
        if self.state != EngineState::Idle {
            warn!(layer = layer_id, state = ?self.state, "cannot remove provider during a labeling pass");
            return false;
        }
        let before = self.providers.len();
        self.providers.retain(|p| p.layer_id() != layer_id);
        before != self.providers.len()
    }

    /// Distinct layer ids taking part in labeling: top-level providers
    /// first, then sub-providers, each group ordered by layer z-index.
    pub fn participating_layer_ids(&self) -> Vec<String> {
        fn collect_subs<'a>(provider: &'a dyn LabelProvider, out: &mut Vec<&'a dyn LabelProvider>) {
            for sub in provider.sub_providers() {
                out.push(sub.as_ref());
                collect_subs(sub.as_ref(), out);
            }
        }

        let mut roots: Vec<&dyn LabelProvider> = self.providers.iter().map(|p| p.as_ref()).collect();
        let mut subs = Vec::new();
        for root in &roots {
            collect_subs(*root, &mut subs);
        }
        roots.sort_by(|a, b| a.z_index().total_cmp(&b.z_index()));
        subs.sort_by(|a, b| a.z_index().total_cmp(&b.z_index()));

        let mut ids: Vec<String> = Vec::new();
        for provider in roots.into_iter().chain(subs) {
            if !ids.iter().any(|id| id == provider.layer_id()) {
                ids.push(provider.layer_id().to_string());
            }
        }
        ids
    }

    /// Candidate limits for this render, converted from paper units.
    pub fn solver_settings(&self, ctx: &RenderContext) -> SolverSettings {
        let defaults = SolverSettings::default();
        let cm = ctx.convert_to_map_units(10.0);
        let (line, polygon) = if cm.is_finite() && cm > 0.0 {
            (
                self.settings.max_line_candidates_per_cm / cm,
                self.settings.max_polygon_candidates_per_cm_squared / (cm * cm),
            )
        } else {
            (
                defaults.max_line_candidates_per_map_unit,
                defaults.max_polygon_candidates_per_map_unit_squared,
            )
        };
        SolverSettings {
            max_line_candidates_per_map_unit: line,
            max_polygon_candidates_per_map_unit_squared: polygon,
            show_partial_labels: self.settings.use_partial_candidates,
            placement_version: self.settings.placement_version,
        }
    }

    /// Collect features from every provider, in registration order, into a
    /// fresh solver.
    pub fn register_labels(&mut self, ctx: &mut RenderContext) {
        self.release_pass();
        self.results = LabelingResults::default();
        self.state = EngineState::Registering;

        let mut solver = (self.solver_factory)();
        solver.configure(&self.solver_settings(ctx));
        let mut registry = LabelFeatureRegistry::new(self.map.frame_rotation());

        let total = self.providers.len();
        for (idx, provider) in self.providers.iter_mut().enumerate() {
            if ctx.rendering_stopped() {
                debug!(remaining = total - idx, "label registration cancelled");
                break;
            }
            registry.register_root(provider.as_mut(), idx, ctx, solver.as_mut());
        }

        debug!(
            providers = registry.provider_count(),
            registered = registry.registered_count(),
            skipped = registry.skipped().len(),
            "registered label features"
        );
        self.registry = registry;
        self.solver = Some(solver);
    }

    /// Build the problem for the current view and resolve it. Any failure
    /// leaves the pass with no labels.
    pub fn solve(&mut self, ctx: &mut RenderContext) {
        let started = Instant::now();
        self.labels.clear();
        self.unplaced.clear();
        self.problem = None;
        self.state = EngineState::Solved;

        let Some(solver) = self.solver.as_mut() else {
            debug!("solve called without registered labels");
            return;
        };

        let mut boundary = self.map.labeling_boundary();
        if self.settings.draw_candidates {
            ctx.debug_overlay_mut().boundary = Some(boundary.clone());
        }
        if self.map.is_rotated() {
            boundary = boundary.rotated(self.map.rotation, self.map.visible_extent.center());
        }
        let extent = self.map.labeling_extent();

        if ctx.rendering_stopped() {
            return;
        }
        let problem = match solver.extract_problem(extent, &boundary, ctx.cancellation()) {
            Ok(problem) => problem,
            Err(SolverError::Cancelled) => {
                debug!("problem extraction cancelled");
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to extract labeling problem");
                return;
            }
        };
        if ctx.rendering_stopped() {
            return;
        }

        if self.settings.draw_candidates {
            let overlay = ctx.debug_overlay_mut();
            overlay.candidates.extend(problem.candidates().map(|c| *c.rect()));
        }

        let want_unplaced = self.settings.wants_unplaced();
        let tiled = tile_solution(
            &self.map,
            &self.consistency,
            &self.sessions,
            &problem,
            want_unplaced,
        );
        let solution = match tiled {
            Some(solution) => solution,
            None => match solver.solve_problem(
                &problem,
                self.settings.use_all_labels,
                want_unplaced,
                ctx.cancellation(),
            ) {
                Ok(solution) => solution,
                Err(SolverError::Cancelled) => {
                    debug!("label solve cancelled");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "label solve failed");
                    return;
                }
            },
        };
        if ctx.rendering_stopped() {
            return;
        }

        let Solution { mut placed, unplaced } = solution;
        let sorter = LabelSorter::new(&self.map.layer_order, self.settings.z_index_epsilon);
        let registry = &self.registry;
        sorter.sort(&mut placed, |label| sort_key(&problem, registry, label));

        self.labels = placed;
        self.unplaced = if want_unplaced { unplaced } else { Vec::new() };
        self.results = self.build_results(&problem);
        self.problem = Some(problem);

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            labels = self.labels.len(),
            unplaced = self.unplaced.len(),
            "labeling work"
        );
    }

    fn build_results(&self, problem: &Problem) -> LabelingResults {
        let record = |label: &LabelPosition, unplaced: bool| {
            let feature = problem.position_feature(label)?;
            let layer_id = feature
                .provider()
                .and_then(|id| self.registry.provider_layer_id(id))
                .unwrap_or_default();
            Some(LabelRecord {
                layer_id: layer_id.to_string(),
                feature_id: feature.id(),
                text: feature.label_text().to_string(),
                rect: *label.rect(),
                angle: label.angle(),
                z_index: feature.z_index(),
                unplaced,
            })
        };

        let mut records: Vec<LabelRecord> = self.labels.iter().filter_map(|l| record(l, false)).collect();
        records.extend(self.unplaced.iter().filter_map(|l| record(l, true)));
        LabelingResults { records }
    }

    /// Dispatch solved labels to their providers: every background first,
    /// then every foreground, then unplaced labels on top when requested.
    /// `layer` restricts drawing to one layer's providers and labels.
    pub fn draw_labels(&mut self, ctx: &mut RenderContext, layer: Option<&str>) {
        if !matches!(self.state, EngineState::Solved | EngineState::Drawn) {
            debug!(state = ?self.state, "draw_labels called before solve");
            return;
        }
        let started = Instant::now();

        for provider in self.providers.iter_mut() {
            if let Some(layer) = layer
                && provider.layer_id() != layer
            {
                continue;
            }
            let scope = provider
                .layer_expression_scope()
                .cloned()
                .unwrap_or_else(|| ExpressionScope::new("layer"));
            let scale = provider.layer_reference_scale();
            ctx.with_expression_scope(scope, |ctx| {
                ctx.with_reference_scale(scale, |ctx| provider.start_render(ctx))
            });
        }

        let mut drawn = 0;
        if let Some(problem) = self.problem.as_mut() {
            let target = DrawTarget {
                providers: &self.providers,
                registry: &self.registry,
                layer,
            };
            let labels = &self.labels;
            let unplaced = &self.unplaced;
            let draw_unplaced = self.settings.draw_unplaced_labels;
            drawn = ctx.with_expression_scope(ExpressionScope::new("symbol"), |ctx| {
                let mut drawn = draw_pass(ctx, &target, problem, labels, DrawPass::Background);
                drawn += draw_pass(ctx, &target, problem, labels, DrawPass::Foreground);
                if draw_unplaced {
                    drawn += draw_pass(ctx, &target, problem, unplaced, DrawPass::Unplaced);
                }
                drawn
            });
        }

        for provider in self.providers.iter_mut() {
            if let Some(layer) = layer
                && provider.layer_id() != layer
            {
                continue;
            }
            provider.stop_render(ctx);
        }

        self.state = EngineState::Drawn;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            drawn,
            layer = layer.unwrap_or("*"),
            "labeling draw"
        );
    }

    /// Release the pass: problem, label lists, solver and registry. Results
    /// stay available until taken. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        self.release_pass();
        self.state = EngineState::Idle;
    }

    fn release_pass(&mut self) {
        self.problem = None;
        self.labels.clear();
        self.unplaced.clear();
        self.solver = None;
        self.registry = LabelFeatureRegistry::default();
    }

    /// Register, solve, draw and clean up, stopping early on cancellation.
    pub fn run(&mut self, ctx: &mut RenderContext) {
        self.register_labels(ctx);
        if ctx.rendering_stopped() {
            self.cleanup();
            return;
        }

        self.solve(ctx);
        if ctx.rendering_stopped() {
            self.cleanup();
            return;
        }

        self.draw_labels(ctx, None);
        self.cleanup();
    }
}

fn tile_solution(
    map: &MapSettings,
    consistency: &ConsistencyConfig,
    sessions: &Mutex<SessionCache>,
    problem: &Problem,
    want_unplaced: bool,
) -> Option<Solution> {
    if !consistency.enabled {
        return None;
    }
    let level = map.tile_level?;
    let project = map.project_path.as_deref()?;
    match solve_tile_consistent(problem, level, project, want_unplaced, sessions, consistency) {
        Ok(solution) => solution,
        Err(err) => {
            warn!(level, project = ?project, error = %err, "tile consistency unavailable, solving plainly");
            None
        }
    }
}

fn sort_key<'r>(problem: &Problem, registry: &'r LabelFeatureRegistry, label: &LabelPosition) -> SortKey<'r> {
    match problem.position_feature(label) {
        Some(feature) => SortKey {
            z_index: feature.z_index(),
            layer_id: feature.provider().and_then(|id| registry.provider_layer_id(id)),
            area: feature.area(),
        },
        None => SortKey {
            z_index: 0.0,
            layer_id: None,
            area: 0.0,
        },
    }
}
