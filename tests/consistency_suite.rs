use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use maplabel::config::{ConsistencyConfig, EngineSettings};
use maplabel::consistency::{BboxStore, SessionCache, SessionKey, solve_tile_consistent, workspace_dir};
use maplabel::context::{CancellationToken, MapToPixel, RenderContext};
use maplabel::engine::{LabelingEngine, MapSettings};
use maplabel::feature::{FeatureId, LabelFeature, LabelGeometry, Placement};
use maplabel::geometry::{LabelBoundary, Point, Rect};
use maplabel::provider::{LayerStyle, StaticLabelProvider};
use maplabel::results::LabelingResults;
use maplabel::solver::{GreedySolver, LayerSpec, PlacementSolver};
use tempfile::TempDir;

fn town(id: u64, x: f64, y: f64, text: &str) -> LabelFeature {
    LabelFeature::new(FeatureId(id), Arc::new(LabelGeometry::Point(Point::new(x, y))), (12.0, 4.0)).with_text(text)
}

fn over_point() -> LayerStyle {
    LayerStyle {
        placement: Placement::OverPoint,
        ..LayerStyle::default()
    }
}

fn project_in(root: &Path, dir: &str) -> PathBuf {
    let workspace = root.join(dir);
    std::fs::create_dir_all(&workspace).unwrap();
    workspace.join("project.json")
}

fn render_tile(
    extent: Rect,
    level: u32,
    project: &Path,
    features: Vec<LabelFeature>,
    sessions: &Arc<Mutex<SessionCache>>,
) -> LabelingResults {
    let mut map = MapSettings::new(extent);
    map.extent_buffer = 10.0;
    map.tile_level = Some(level);
    map.project_path = Some(project.to_path_buf());
    map.layer_order = vec!["towns".into()];
    let settings = EngineSettings {
        collect_unplaced_labels: true,
        ..EngineSettings::default()
    };
    let mut engine = LabelingEngine::new(map, settings).with_session_cache(Arc::clone(sessions));
    engine.add_provider(Box::new(
        StaticLabelProvider::new("towns", features).with_style(over_point()),
    ));
    let mut ctx = RenderContext::new(MapToPixel::default());
    engine.run(&mut ctx);
    engine.take_results()
}

#[test]
fn same_tile_twice_places_identical_labels() {
    let root = TempDir::new().unwrap();
    let project = project_in(root.path(), "city-1");
    let sessions = Arc::new(Mutex::new(SessionCache::new()));
    let features = vec![
        town(1, 20.0, 20.0, "Aston"),
        town(2, 24.0, 21.0, "Bexley"),
        town(3, 70.0, 70.0, "Colne"),
    ];
    let extent = Rect::new(0.0, 0.0, 100.0, 100.0);

    let first = render_tile(extent, 4, &project, features.clone(), &sessions);
    let second = render_tile(extent, 4, &project, features, &sessions);

    assert_eq!(first.placed_ids(), second.placed_ids());
    assert_eq!(first.placed().count(), 2);
    assert_eq!(first.unplaced().count(), 1);
    assert!(project.parent().unwrap().join("bbox.db").exists());
}

#[test]
fn seam_label_is_placed_in_both_tiles() {
    let root = TempDir::new().unwrap();
    let project = project_in(root.path(), "city-1");
    let sessions = Arc::new(Mutex::new(SessionCache::new()));

    let left = render_tile(
        Rect::new(0.0, 0.0, 100.0, 100.0),
        7,
        &project,
        vec![town(1, 98.0, 50.0, "Seamton")],
        &sessions,
    );
    // The neighbouring tile sees the same label plus a rival in its area.
    let right = render_tile(
        Rect::new(100.0, 0.0, 100.0, 100.0),
        7,
        &project,
        vec![town(1, 98.0, 50.0, "Seamton"), town(2, 100.0, 51.0, "Rival")],
        &sessions,
    );

    assert_eq!(left.placed_ids(), vec![FeatureId(1)]);
    assert_eq!(right.placed_ids(), vec![FeatureId(1)]);
    assert_eq!(right.unplaced().map(|r| r.feature_id).collect::<Vec<_>>(), vec![FeatureId(2)]);
}

#[test]
fn zoom_levels_do_not_interfere() {
    let root = TempDir::new().unwrap();
    let project = project_in(root.path(), "city-1");
    let sessions = Arc::new(Mutex::new(SessionCache::new()));
    let extent = Rect::new(0.0, 0.0, 100.0, 100.0);

    render_tile(extent, 3, &project, vec![town(1, 50.0, 50.0, "Low")], &sessions);
    let other = render_tile(extent, 4, &project, vec![town(2, 50.0, 50.0, "High")], &sessions);

    assert_eq!(other.placed_ids(), vec![FeatureId(2)]);
}

#[test]
fn version_rollover_forgets_previous_decisions() {
    let root = TempDir::new().unwrap();
    let sessions = Arc::new(Mutex::new(SessionCache::new()));
    let extent = Rect::new(0.0, 0.0, 100.0, 100.0);

    let v1 = project_in(root.path(), "city-1");
    render_tile(extent, 5, &v1, vec![town(1, 50.0, 50.0, "Old")], &sessions);
    let blocked = render_tile(extent, 5, &v1, vec![town(2, 50.0, 50.0, "New")], &sessions);
    assert!(blocked.placed_ids().is_empty());

    let v2 = project_in(root.path(), "city-2");
    let fresh = render_tile(extent, 5, &v2, vec![town(2, 50.0, 50.0, "New")], &sessions);
    assert_eq!(fresh.placed_ids(), vec![FeatureId(2)]);

    let prefix = SessionKey::from_workspace(&workspace_dir(&v2).unwrap()).unwrap().prefix;
    let cache = sessions.lock().unwrap();
    assert_eq!(cache.version(&prefix), Some(2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn failed_insert_keeps_partial_tile_and_prior_records() {
    let root = TempDir::new().unwrap();
    let project = project_in(root.path(), "city-4");
    let sessions = Arc::new(Mutex::new(SessionCache::new()));
    let extent = Rect::new(0.0, 0.0, 100.0, 100.0);
    let db_path = project.parent().unwrap().join("bbox.db");

    render_tile(extent, 6, &project, vec![town(9, 50.0, 90.0, "Keep")], &sessions);
    let before = BboxStore::open(&db_path).unwrap().record_count(6).unwrap();
    assert_eq!(before, 1);

    // Any insert of the "Breaker" label fails with a runtime error.
    rusqlite::Connection::open(&db_path)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER bbox_breaker BEFORE INSERT ON bbox
             WHEN NEW.key LIKE '%-Breaker'
             BEGIN SELECT abs(NEW.level * 0 - 9223372036854775807 - 1); END;",
        )
        .unwrap();

    let partial = render_tile(
        extent,
        6,
        &project,
        vec![
            town(1, 10.0, 20.0, "Early"),
            town(2, 50.0, 20.0, "Breaker"),
            town(3, 90.0, 20.0, "Late"),
        ],
        &sessions,
    );
    assert_eq!(partial.placed_ids(), vec![FeatureId(1)]);
    assert_eq!(BboxStore::open(&db_path).unwrap().record_count(6).unwrap(), before);

    let next = render_tile(extent, 6, &project, vec![town(3, 90.0, 20.0, "Late")], &sessions);
    assert_eq!(next.placed_ids(), vec![FeatureId(3)]);
    assert_eq!(BboxStore::open(&db_path).unwrap().record_count(6).unwrap(), before + 1);
}

#[test]
fn unversioned_workspace_falls_back_to_plain_solving() {
    let root = TempDir::new().unwrap();
    let project = project_in(root.path(), "plain");
    let sessions = Arc::new(Mutex::new(SessionCache::new()));

    let results = render_tile(
        Rect::new(0.0, 0.0, 100.0, 100.0),
        2,
        &project,
        vec![town(1, 50.0, 50.0, "Solo")],
        &sessions,
    );

    assert_eq!(results.placed_ids(), vec![FeatureId(1)]);
    assert!(!project.parent().unwrap().join("bbox.db").exists());
    assert!(sessions.lock().unwrap().is_empty());
}

#[test]
fn unopenable_store_falls_back_to_plain_solving() {
    let root = TempDir::new().unwrap();
    let project = root.path().join("missing-3").join("project.json");
    let sessions = Arc::new(Mutex::new(SessionCache::new()));

    let results = render_tile(
        Rect::new(0.0, 0.0, 100.0, 100.0),
        2,
        &project,
        vec![town(1, 50.0, 50.0, "Solo")],
        &sessions,
    );

    assert_eq!(results.placed_ids(), vec![FeatureId(1)]);
    assert!(sessions.lock().unwrap().is_empty());
}

#[test]
fn direct_resolve_records_one_box_per_logical_label() {
    let root = TempDir::new().unwrap();
    let project = project_in(root.path(), "atlas-9");
    let cache = Mutex::new(SessionCache::new());

    let mut solver = GreedySolver::new();
    let layer = solver.add_layer(LayerSpec {
        provider: maplabel::feature::ProviderId(0),
        layer_id: "towns".into(),
        name: "towns".into(),
        placement: Placement::AroundPoint,
        priority: 0.5,
        active: true,
        display_all: false,
        merge_connected_lines: false,
        obstacle_type: Default::default(),
        centroid_inside: false,
        upside_down: Default::default(),
        position_order: Vec::new(),
    });
    solver.register_feature(layer, town(1, 50.0, 50.0, "Many")).unwrap();
    let extent = Rect::new(0.0, 0.0, 100.0, 100.0);
    let problem = solver
        .extract_problem(extent, &LabelBoundary::new(extent.to_polygon()), &CancellationToken::new())
        .unwrap();
    assert!(problem.feature_candidate_count(0) > 1);

    let solution = solve_tile_consistent(&problem, 1, &project, false, &cache, &ConsistencyConfig::default())
        .unwrap()
        .unwrap();
    assert_eq!(solution.placed.len(), 1);

    let store = BboxStore::open(&project.parent().unwrap().join("bbox.db")).unwrap();
    let keys = store.keys(1).unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("-Many"));
}
