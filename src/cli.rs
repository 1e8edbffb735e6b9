use crate::config::load_config;
use crate::context::{MapToPixel, RenderContext};
use crate::engine::LabelingEngine;
use crate::render::{render_svg, write_output_svg};
use crate::scene::Scene;
use crate::telemetry;
use anyhow::Result;
use clap::Parser;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "maplabel", version, about = "Automatic map label placement")]
pub struct Args {
    /// Scene file (.json) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output SVG file. Defaults to stdout if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Config file (JSON or JSON5)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Width
    #[arg(short = 'w', long = "width")]
    pub width: Option<f32>,

    /// Height
    #[arg(short = 'H', long = "height")]
    pub height: Option<f32>,

    /// Tile zoom level; enables tile-consistent placement with --project
    #[arg(short = 'l', long = "tileLevel")]
    pub tile_level: Option<u32>,

    /// Project file whose directory (`<name>-<version>`) holds the tile store
    #[arg(short = 'p', long = "project")]
    pub project: Option<PathBuf>,

    /// Write the labeling results as JSON to this file
    #[arg(short = 'd', long = "dumpResults")]
    pub dump: Option<PathBuf>,

    /// Include unplaced labels in the output
    #[arg(long = "unplaced")]
    pub unplaced: bool,

    /// Paint the labeling boundary and every candidate
    #[arg(long = "candidates")]
    pub candidates: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    telemetry::init(args.verbose);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(width) = args.width {
        config.render.width = width;
    }
    if let Some(height) = args.height {
        config.render.height = height;
    }
    if args.unplaced {
        config.engine.draw_unplaced_labels = true;
    }
    if args.candidates {
        config.engine.draw_candidates = true;
    }

    let input = read_input(args.input.as_deref())?;
    let scene = Scene::parse(&input)?;
    let mut map = scene.map_settings();
    if args.tile_level.is_some() {
        map.tile_level = args.tile_level;
    }
    if args.project.is_some() {
        map.project_path = args.project.clone();
    }

    let map_to_pixel = MapToPixel::fit(
        &map.visible_extent,
        f64::from(config.render.width),
        f64::from(config.render.height),
        f64::from(config.render.dpi),
    );
    let mut ctx = RenderContext::new(map_to_pixel);

    let mut engine =
        LabelingEngine::new(map, config.engine.clone()).with_consistency(config.consistency.clone());
    for provider in scene.providers() {
        engine.add_provider(provider);
    }
    engine.run(&mut ctx);
    let results = engine.take_results();
    info!(
        placed = results.placed().count(),
        unplaced = results.unplaced().count(),
        "labeling finished"
    );

    let svg = render_svg(ctx.surface(), ctx.debug_overlay(), ctx.map_to_pixel(), &config.render);
    write_output_svg(&svg, args.output.as_deref())?;

    if let Some(path) = &args.dump {
        std::fs::write(path, results.to_json()?)?;
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path
        && path != Path::new("-")
    {
        return Ok(std::fs::read_to_string(path)?);
    }

    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}
