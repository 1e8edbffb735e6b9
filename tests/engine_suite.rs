use std::cell::Cell;
use std::sync::Arc;

use maplabel::config::EngineSettings;
use maplabel::context::{CancellationToken, DrawCommand, DrawPass, MapToPixel, RenderContext};
use maplabel::engine::{EngineState, LabelingEngine, MapSettings, StagedLabelingEngine};
use maplabel::feature::{FeatureId, LabelFeature, LabelGeometry, Placement};
use maplabel::geometry::{Point, Rect};
use maplabel::provider::{LabelProvider, LayerStyle, StaticLabelProvider};
use maplabel::solver::{
    GreedySolver, LabelPosition, LayerHandle, LayerSpec, PlacementSolver, Problem, RegistrationError, Solution,
    SolverError, SolverSettings,
};

fn point_feature(id: u64, x: f64, y: f64, size: (f64, f64)) -> LabelFeature {
    LabelFeature::new(FeatureId(id), Arc::new(LabelGeometry::Point(Point::new(x, y))), size)
        .with_text(format!("f{id}"))
}

fn map(layer_order: &[&str]) -> MapSettings {
    let mut map = MapSettings::new(Rect::new(0.0, 0.0, 100.0, 100.0));
    map.layer_order = layer_order.iter().map(|s| s.to_string()).collect();
    map
}

fn all_labels() -> EngineSettings {
    EngineSettings {
        use_all_labels: true,
        ..EngineSettings::default()
    }
}

fn ctx() -> RenderContext {
    RenderContext::new(MapToPixel::default())
}

#[test]
fn ascending_z_index_comes_first() {
    let mut engine = LabelingEngine::new(map(&["pts"]), all_labels());
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "pts",
        vec![
            point_feature(1, 10.0, 10.0, (5.0, 2.0)).with_z_index(1.0),
            point_feature(2, 50.0, 50.0, (5.0, 4.0)).with_z_index(1.0),
            point_feature(3, 90.0, 90.0, (3.0, 1.0)).with_z_index(2.0),
        ],
    )));
    let mut ctx = ctx();
    engine.run(&mut ctx);

    let results = engine.take_results();
    assert_eq!(results.placed_ids(), vec![FeatureId(2), FeatureId(1), FeatureId(3)]);
    let zs: Vec<f64> = results.placed().map(|r| r.z_index).collect();
    assert!(zs.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn equal_z_labels_follow_reverse_layer_order() {
    let mut engine = LabelingEngine::new(map(&["top", "middle", "bottom"]), all_labels());
    for (idx, layer) in ["top", "middle", "bottom"].into_iter().enumerate() {
        let x = 15.0 + idx as f64 * 30.0;
        engine.add_provider(Box::new(StaticLabelProvider::new(
            layer,
            vec![point_feature(idx as u64 + 1, x, 50.0, (4.0, 2.0)).with_z_index(5.0)],
        )));
    }
    let mut ctx = ctx();
    engine.run(&mut ctx);

    let layers: Vec<String> = engine.take_results().placed().map(|r| r.layer_id.clone()).collect();
    assert_eq!(layers, vec!["bottom", "middle", "top"]);
}

#[test]
fn unlisted_layers_draw_below_listed_ones() {
    let mut engine = LabelingEngine::new(map(&["a", "b"]), all_labels());
    let mut features: [Vec<LabelFeature>; 3] = Default::default();
    let mut seed: u64 = 17;
    for id in 0..64u64 {
        seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        let layer = ((seed >> 33) % 3) as usize;
        let width = 1.0 + ((seed >> 40) % 7) as f64;
        let (x, y) = (5.0 + (id % 8) as f64 * 12.0, 5.0 + (id / 8) as f64 * 12.0);
        features[layer].push(point_feature(id + 1, x, y, (width, 1.0)).with_z_index(1.0));
    }
    let [a, b, c] = features;
    engine.add_provider(Box::new(StaticLabelProvider::new("a", a)));
    engine.add_provider(Box::new(
        StaticLabelProvider::new("b", b).with_sub_provider(Box::new(StaticLabelProvider::new("c", c))),
    ));
    let mut ctx = ctx();
    engine.run(&mut ctx);

    let results = engine.take_results();
    assert_eq!(results.placed().count(), 64);
    let rank = |layer: &str| match layer {
        "c" => 0,
        "b" => 1,
        _ => 2,
    };
    let records: Vec<_> = results.placed().collect();
    for pair in records.windows(2) {
        let (first, second) = (rank(&pair[0].layer_id), rank(&pair[1].layer_id));
        assert!(first <= second);
        if first == second {
            assert!(pair[0].rect.area() >= pair[1].rect.area());
        }
    }
}

#[test]
fn larger_label_sorts_before_smaller_on_same_layer() {
    let mut engine = LabelingEngine::new(map(&["pts"]), all_labels());
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "pts",
        vec![
            point_feature(1, 20.0, 20.0, (10.0, 5.0)),
            point_feature(2, 70.0, 70.0, (10.0, 10.0)),
        ],
    )));
    let mut ctx = ctx();
    engine.run(&mut ctx);
    assert_eq!(engine.take_results().placed_ids(), vec![FeatureId(2), FeatureId(1)]);
}

#[test]
fn rejected_feature_is_skipped_without_stopping_the_layer() {
    let degenerate = LabelFeature::new(
        FeatureId(2),
        Arc::new(LabelGeometry::Line(vec![Point::new(40.0, 40.0)])),
        (4.0, 2.0),
    );
    let settings = EngineSettings {
        collect_unplaced_labels: true,
        ..all_labels()
    };
    let mut engine = LabelingEngine::new(map(&["mixed"]), settings);
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "mixed",
        vec![
            point_feature(1, 10.0, 10.0, (4.0, 2.0)),
            degenerate,
            point_feature(3, 80.0, 80.0, (4.0, 2.0)),
        ],
    )));
    let mut ctx = ctx();

    engine.register_labels(&mut ctx);
    assert_eq!(engine.registry().registered_count(), 2);
    assert!(matches!(
        engine.registry().skipped()[0].reason,
        RegistrationError::TooFewPoints { needed: 2, got: 1, .. }
    ));
    engine.solve(&mut ctx);

    let results = engine.results();
    assert!(results.records.iter().all(|r| r.feature_id != FeatureId(2)));
    assert_eq!(results.placed().count(), 2);
}

/// Provider that cancels the render after a fixed number of foreground draws.
struct CancellingProvider {
    features: Vec<LabelFeature>,
    token: CancellationToken,
    cancel_after: usize,
    drawn: Cell<usize>,
}

impl CancellingProvider {
    fn record(&self, ctx: &mut RenderContext, pass: DrawPass, label: &LabelPosition, feature: &LabelFeature) {
        ctx.surface_mut().push(DrawCommand {
            pass,
            layer_id: "cancel".into(),
            feature_id: feature.id(),
            text: feature.label_text().to_string(),
            rect: *label.rect(),
            angle: label.angle(),
            symbol: None,
        });
    }
}

impl LabelProvider for CancellingProvider {
    fn layer_id(&self) -> &str {
        "cancel"
    }

    fn label_features(&mut self, _ctx: &mut RenderContext) -> Vec<LabelFeature> {
        self.features.clone()
    }

    fn draw_label_background(&self, ctx: &mut RenderContext, label: &LabelPosition, feature: &LabelFeature) {
        self.record(ctx, DrawPass::Background, label, feature);
    }

    fn draw_label(&self, ctx: &mut RenderContext, label: &LabelPosition, feature: &LabelFeature) {
        self.record(ctx, DrawPass::Foreground, label, feature);
        self.drawn.set(self.drawn.get() + 1);
        if self.drawn.get() == self.cancel_after {
            self.token.cancel();
        }
    }
}

#[test]
fn cancellation_mid_draw_keeps_drawn_labels() {
    let token = CancellationToken::new();
    let features = (0..5)
        .map(|i| point_feature(i + 1, 10.0 + i as f64 * 18.0, 50.0, (4.0, 2.0)))
        .collect();
    let mut engine = LabelingEngine::new(map(&["cancel"]), all_labels());
    engine.add_provider(Box::new(CancellingProvider {
        features,
        token: token.clone(),
        cancel_after: 2,
        drawn: Cell::new(0),
    }));
    let mut ctx = ctx().with_cancellation(token);

    engine.run(&mut ctx);

    let commands = ctx.surface().commands();
    let backgrounds = commands.iter().filter(|c| c.pass == DrawPass::Background).count();
    let foregrounds = commands.iter().filter(|c| c.pass == DrawPass::Foreground).count();
    assert_eq!(backgrounds, 5);
    assert_eq!(foregrounds, 2);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(ctx.expression_context().scope_count(), 0);
    assert_eq!(engine.take_results().placed().count(), 5);
}

#[test]
fn cancellation_before_solve_yields_nothing() {
    let token = CancellationToken::new();
    token.cancel();
    let mut engine = LabelingEngine::new(map(&["pts"]), all_labels());
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "pts",
        vec![point_feature(1, 50.0, 50.0, (4.0, 2.0))],
    )));
    let mut ctx = ctx().with_cancellation(token);

    engine.run(&mut ctx);

    assert!(engine.take_results().is_empty());
    assert!(ctx.surface().is_empty());
    assert_eq!(engine.state(), EngineState::Idle);
}

struct FailingSolver(GreedySolver);

impl PlacementSolver for FailingSolver {
    fn configure(&mut self, settings: &SolverSettings) {
        self.0.configure(settings);
    }

    fn add_layer(&mut self, spec: LayerSpec) -> LayerHandle {
        self.0.add_layer(spec)
    }

    fn register_feature(&mut self, layer: LayerHandle, feature: LabelFeature) -> Result<(), RegistrationError> {
        self.0.register_feature(layer, feature)
    }

    fn extract_problem(
        &mut self,
        extent: Rect,
        boundary: &maplabel::geometry::LabelBoundary,
        cancel: &CancellationToken,
    ) -> Result<Problem, SolverError> {
        self.0.extract_problem(extent, boundary, cancel)
    }

    fn solve_problem(
        &mut self,
        _problem: &Problem,
        _use_all_labels: bool,
        _want_unplaced: bool,
        _cancel: &CancellationToken,
    ) -> Result<Solution, SolverError> {
        Err(SolverError::Internal("boom".into()))
    }
}

#[test]
fn solver_failure_leaves_pass_without_labels() {
    let mut engine = LabelingEngine::new(map(&["pts"]), all_labels())
        .with_solver_factory(|| Box::new(FailingSolver(GreedySolver::new())));
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "pts",
        vec![point_feature(1, 50.0, 50.0, (4.0, 2.0))],
    )));
    let mut ctx = ctx();

    engine.run(&mut ctx);

    assert!(engine.take_results().is_empty());
    assert!(ctx.surface().is_empty());
}

#[test]
fn blocking_region_removes_permissible_area() {
    let mut map = map(&["pts"]);
    map.blocking_regions
        .push(Rect::new(30.0, 30.0, 40.0, 40.0).to_polygon());
    let settings = EngineSettings {
        collect_unplaced_labels: true,
        ..EngineSettings::default()
    };
    let mut engine = LabelingEngine::new(map, settings);
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "pts",
        vec![
            point_feature(1, 50.0, 50.0, (4.0, 2.0)),
            point_feature(2, 10.0, 10.0, (4.0, 2.0)),
        ],
    )));
    let mut ctx = ctx();
    engine.run(&mut ctx);

    let results = engine.take_results();
    assert_eq!(results.placed_ids(), vec![FeatureId(2)]);
    assert_eq!(results.unplaced().map(|r| r.feature_id).collect::<Vec<_>>(), vec![FeatureId(1)]);
}

#[test]
fn unplaced_labels_draw_last() {
    let settings = EngineSettings {
        draw_unplaced_labels: true,
        ..EngineSettings::default()
    };
    let over_point = LayerStyle {
        placement: Placement::OverPoint,
        ..LayerStyle::default()
    };
    let mut engine = LabelingEngine::new(map(&["pts"]), settings);
    engine.add_provider(Box::new(
        StaticLabelProvider::new(
            "pts",
            vec![
                point_feature(1, 50.0, 50.0, (10.0, 4.0)),
                point_feature(2, 50.0, 50.0, (10.0, 4.0)),
            ],
        )
        .with_style(over_point),
    ));
    let mut ctx = ctx();
    engine.run(&mut ctx);

    let passes: Vec<DrawPass> = ctx.surface().commands().iter().map(|c| c.pass).collect();
    assert_eq!(passes.last(), Some(&DrawPass::Unplaced));
    let first_unplaced = passes.iter().position(|p| *p == DrawPass::Unplaced).unwrap();
    assert!(passes[..first_unplaced].iter().all(|p| *p != DrawPass::Unplaced));
    assert!(passes[first_unplaced..].iter().all(|p| *p == DrawPass::Unplaced));
}

#[test]
fn staged_engine_draws_one_layer_per_call() {
    let mut engine = LabelingEngine::new(map(&["a", "b"]), all_labels());
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "a",
        vec![point_feature(1, 20.0, 20.0, (4.0, 2.0))],
    )));
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "b",
        vec![point_feature(2, 80.0, 80.0, (4.0, 2.0))],
    )));
    let mut staged = StagedLabelingEngine::new(engine);
    let mut ctx = ctx();

    staged.run(&mut ctx);
    assert!(staged.is_ready());
    assert!(ctx.surface().is_empty());

    staged.render_labels_for_layer(&mut ctx, "a");
    assert!(ctx.surface().commands().iter().all(|c| c.layer_id == "a"));
    let after_a = ctx.surface().len();
    assert!(after_a > 0);

    staged.render_labels_for_layer(&mut ctx, "b");
    assert!(ctx.surface().commands()[after_a..].iter().all(|c| c.layer_id == "b"));

    let results = staged.finalize();
    assert_eq!(results.placed().count(), 2);
    assert!(!staged.is_ready());
}

#[test]
fn participating_layers_are_ordered_by_z_index() {
    let high = LayerStyle {
        z_index: 3.0,
        ..LayerStyle::default()
    };
    let low = LayerStyle {
        z_index: 1.0,
        ..LayerStyle::default()
    };
    let mut engine = LabelingEngine::new(map(&[]), EngineSettings::default());
    engine.add_provider(Box::new(
        StaticLabelProvider::new("roads", Vec::new())
            .with_style(high.clone())
            .with_sub_provider(Box::new(StaticLabelProvider::new("roads-rules", Vec::new()).with_style(high))),
    ));
    engine.add_provider(Box::new(
        StaticLabelProvider::new("towns", Vec::new())
            .with_style(low.clone())
            .with_sub_provider(Box::new(StaticLabelProvider::new("towns-rules", Vec::new()).with_style(low))),
    ));

    assert_eq!(
        engine.participating_layer_ids(),
        vec!["towns", "roads", "towns-rules", "roads-rules"]
    );
    assert!(engine.remove_provider("roads"));
    assert!(!engine.remove_provider("roads"));
    assert_eq!(engine.participating_layer_ids(), vec!["towns", "towns-rules"]);
}

#[test]
fn cleanup_is_idempotent() {
    let mut engine = LabelingEngine::new(map(&["pts"]), all_labels());
    engine.add_provider(Box::new(StaticLabelProvider::new(
        "pts",
        vec![point_feature(1, 50.0, 50.0, (4.0, 2.0))],
    )));
    let mut ctx = ctx();
    engine.register_labels(&mut ctx);
    engine.solve(&mut ctx);
    assert_eq!(engine.state(), EngineState::Solved);
    assert_eq!(engine.labels().len(), 1);

    engine.cleanup();
    engine.cleanup();
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.labels().is_empty());
    assert!(engine.problem().is_none());
}

#[test]
fn solver_limits_scale_with_map_units() {
    let engine = LabelingEngine::new(map(&[]), EngineSettings::default());
    let ctx = RenderContext::new(MapToPixel {
        map_units_per_pixel: 2.0,
        dpi: 25.4,
        ..MapToPixel::default()
    });
    // 10 mm at 25.4 dpi is 10 px, i.e. 20 map units.
    let settings = engine.solver_settings(&ctx);
    assert!((settings.max_line_candidates_per_map_unit - 5.0 / 20.0).abs() < 1e-12);
    assert!((settings.max_polygon_candidates_per_map_unit_squared - 2.5 / 400.0).abs() < 1e-12);
}
