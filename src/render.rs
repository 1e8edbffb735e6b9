use crate::config::RenderConfig;
use crate::context::{DebugOverlay, DrawCommand, DrawPass, MapToPixel, Surface};
use crate::geometry::Polygon;
use anyhow::Result;
use std::path::Path;

/// Turn the draw commands collected on `surface` into an SVG document.
/// Commands are painted in the order they were issued.
pub fn render_svg(
    surface: &Surface,
    overlay: &DebugOverlay,
    map_to_pixel: &MapToPixel,
    config: &RenderConfig,
) -> String {
    let mut svg = String::new();
    let width = config.width.max(1.0);
    let height = config.height.max(1.0);

    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">",
    ));
    svg.push_str(&format!(
        "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>",
        config.background
    ));

    if let Some(boundary) = &overlay.boundary {
        svg.push_str(&polygon_svg(&boundary.outer, map_to_pixel, &config.boundary_color));
        for exclusion in &boundary.exclusions {
            svg.push_str(&polygon_svg(exclusion, map_to_pixel, &config.boundary_color));
        }
    }
    for candidate in &overlay.candidates {
        let rect = map_to_pixel.transform_rect(candidate);
        svg.push_str(&format!(
            "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"none\" stroke=\"{}\" stroke-width=\"0.5\"/>",
            rect.x, rect.y, rect.width, rect.height, config.candidate_color
        ));
    }

    for command in surface.commands() {
        svg.push_str(&command_svg(command, config));
    }

    svg.push_str("</svg>");
    svg
}

fn command_svg(command: &DrawCommand, config: &RenderConfig) -> String {
    let rect = &command.rect;
    let center = rect.center();
    let transform = if command.angle.abs() > f64::EPSILON {
        format!(
            " transform=\"rotate({:.2} {:.2} {:.2})\"",
            -command.angle, center.x, center.y
        )
    } else {
        String::new()
    };

    match command.pass {
        DrawPass::Background => format!(
            "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\" rx=\"2\" ry=\"2\" fill=\"{}\" stroke=\"{}\" stroke-width=\"0.8\"{transform}/>",
            rect.x, rect.y, rect.width, rect.height, config.label_background, config.label_border
        ),
        DrawPass::Foreground | DrawPass::Unplaced => {
            let color = if command.pass == DrawPass::Unplaced {
                &config.unplaced_color
            } else {
                &config.text_color
            };
            let mut out = String::new();
            if let Some(symbol) = &command.symbol {
                out.push_str(&format!(
                    "<circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"3\" fill=\"{color}\"><title>{}</title></circle>",
                    rect.x,
                    center.y,
                    escape_xml(symbol)
                ));
            }
            out.push_str(&format!(
                "<text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\" dominant-baseline=\"central\" font-family=\"{}\" font-size=\"{}\" fill=\"{color}\" data-feature=\"{}\"{transform}>{}</text>",
                center.x,
                center.y,
                config.font_family,
                config.font_size,
                command.feature_id,
                escape_xml(&command.text)
            ));
            out
        }
    }
}

fn polygon_svg(polygon: &Polygon, map_to_pixel: &MapToPixel, stroke: &str) -> String {
    let points: Vec<String> = polygon
        .ring
        .iter()
        .map(|p| {
            let d = map_to_pixel.transform(*p);
            format!("{:.2},{:.2}", d.x, d.y)
        })
        .collect();
    format!(
        "<polygon points=\"{}\" fill=\"none\" stroke=\"{stroke}\" stroke-width=\"0.3\" stroke-linejoin=\"miter\"/>",
        points.join(" ")
    )
}

pub fn write_output_svg(svg: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, svg)?;
        }
        None => {
            print!("{}", svg);
        }
    }
    Ok(())
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
