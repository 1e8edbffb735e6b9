use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use maplabel::config::{EngineSettings, RenderConfig};
use maplabel::context::{MapToPixel, RenderContext};
use maplabel::engine::LabelingEngine;
use maplabel::render::render_svg;
use maplabel::scene::Scene;
use std::hint::black_box;

/// A square map with `per_layer` point labels on each of `layers` layers,
/// laid out on a jittered grid so neighbours compete for space.
fn dense_scene_source(layers: usize, per_layer: usize) -> String {
    let side = (per_layer as f64).sqrt().ceil().max(1.0) as usize;
    let step = 1000.0 / side as f64;
    let mut out = String::from(r#"{"extent": [0, 0, 1000, 1000], "buffer": 20, "layers": ["#);
    for layer in 0..layers {
        if layer > 0 {
            out.push(',');
        }
        out.push_str(&format!(r#"{{"id": "layer{layer}", "style": {{"zIndex": {layer}}}, "features": ["#));
        for i in 0..per_layer {
            if i > 0 {
                out.push(',');
            }
            let jitter = (layer * 7 + i * 13) % 11;
            let x = (i % side) as f64 * step + jitter as f64;
            let y = (i / side) as f64 * step + (layer * 3) as f64;
            out.push_str(&format!(
                r#"{{"id": {id}, "geometry": {{"point": [{x:.1}, {y:.1}]}}, "text": "Place {id}"}}"#,
                id = layer * per_layer + i
            ));
        }
        out.push_str("]}");
    }
    out.push_str("]}");
    out
}

fn run_pass(scene: &Scene, settings: &EngineSettings) -> RenderContext {
    let map = scene.map_settings();
    let map_to_pixel = MapToPixel::fit(&map.visible_extent, 1200.0, 1200.0, 96.0);
    let mut ctx = RenderContext::new(map_to_pixel);
    let mut engine = LabelingEngine::new(map, settings.clone());
    for provider in scene.providers() {
        engine.add_provider(provider);
    }
    engine.run(&mut ctx);
    black_box(engine.results().len());
    ctx
}

fn bench_scene_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("scene_parse");
    for (layers, per_layer) in [(1, 100), (4, 250), (8, 500)] {
        let source = dense_scene_source(layers, per_layer);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{per_layer}")),
            &source,
            |b, data| {
                b.iter(|| {
                    let scene = Scene::parse(black_box(data)).expect("parse failed");
                    black_box(scene.layers.len());
                });
            },
        );
    }
    group.finish();
}

fn bench_labeling(c: &mut Criterion) {
    let mut group = c.benchmark_group("labeling");
    let settings = EngineSettings::default();
    for (layers, per_layer) in [(1, 100), (4, 250), (8, 500)] {
        let scene = Scene::parse(&dense_scene_source(layers, per_layer)).expect("parse failed");
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{per_layer}")),
            &scene,
            |b, scene| {
                b.iter(|| {
                    let ctx = run_pass(black_box(scene), &settings);
                    black_box(ctx.surface().len());
                });
            },
        );
    }
    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");
    let settings = EngineSettings {
        collect_unplaced_labels: true,
        draw_unplaced_labels: true,
        ..EngineSettings::default()
    };
    let render = RenderConfig::default();
    for (layers, per_layer) in [(2, 200), (6, 400)] {
        let source = dense_scene_source(layers, per_layer);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{per_layer}")),
            &source,
            |b, data| {
                b.iter(|| {
                    let scene = Scene::parse(black_box(data)).expect("parse failed");
                    let ctx = run_pass(&scene, &settings);
                    let svg = render_svg(ctx.surface(), ctx.debug_overlay(), ctx.map_to_pixel(), &render);
                    black_box(svg.len());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_scene_parse, bench_labeling, bench_end_to_end
);
criterion_main!(benches);
