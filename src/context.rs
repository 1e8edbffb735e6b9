use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::feature::FeatureId;
use crate::geometry::{LabelBoundary, Point, Rect};

const MM_PER_INCH: f64 = 25.4;

/// Shared, polled cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Named variables made visible to label expression evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionScope {
    pub name: String,
    pub variables: BTreeMap<String, Value>,
}

impl ExpressionScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    scopes: Vec<ExpressionScope>,
    feature: Option<FeatureId>,
}

impl ExpressionContext {
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn scopes(&self) -> &[ExpressionScope] {
        &self.scopes
    }

    /// Innermost scope wins.
    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.variables.get(key))
    }

    pub fn set_feature(&mut self, feature: Option<FeatureId>) {
        self.feature = feature;
    }

    pub fn feature(&self) -> Option<FeatureId> {
        self.feature
    }

    fn push(&mut self, scope: ExpressionScope) {
        self.scopes.push(scope);
    }

    fn pop(&mut self) -> Option<ExpressionScope> {
        self.scopes.pop()
    }
}

/// Map-to-device transform. Rotation is deliberately absent: label geometry
/// is solved in an unrotated frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapToPixel {
    pub map_units_per_pixel: f64,
    pub origin: Point,
    pub device_height: f64,
    pub dpi: f64,
}

impl Default for MapToPixel {
    fn default() -> Self {
        Self {
            map_units_per_pixel: 1.0,
            origin: Point::new(0.0, 0.0),
            device_height: 0.0,
            dpi: 96.0,
        }
    }
}

impl MapToPixel {
    /// Transform fitting `extent` into a `width` x `height` device.
    pub fn fit(extent: &Rect, width: f64, height: f64, dpi: f64) -> Self {
        let width = width.max(1.0);
        let height = height.max(1.0);
        let mupp = (extent.width / width).max(extent.height / height);
        let mupp = if mupp > 0.0 { mupp } else { 1.0 };
        Self {
            map_units_per_pixel: mupp,
            origin: Point::new(extent.x, extent.y_max()),
            device_height: height,
            dpi,
        }
    }

    pub fn transform(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.origin.x) / self.map_units_per_pixel,
            (self.origin.y - p.y) / self.map_units_per_pixel,
        )
    }

    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        let a = self.transform(Point::new(rect.x, rect.y));
        let b = self.transform(Point::new(rect.x_max(), rect.y_max()));
        Rect::from_corners(a.x, a.y, b.x, b.y)
    }

    pub fn millimeters_to_map_units(&self, mm: f64) -> f64 {
        mm / MM_PER_INCH * self.dpi * self.map_units_per_pixel
    }
}

/// Shapes recorded for the candidate debug overlay.
#[derive(Debug, Clone, Default)]
pub struct DebugOverlay {
    pub boundary: Option<LabelBoundary>,
    pub candidates: Vec<Rect>,
}

impl DebugOverlay {
    pub fn is_empty(&self) -> bool {
        self.boundary.is_none() && self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DrawPass {
    Background,
    Foreground,
    Unplaced,
}

/// One paint operation issued by a provider, in device coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawCommand {
    pub pass: DrawPass,
    pub layer_id: String,
    pub feature_id: FeatureId,
    pub text: String,
    pub rect: Rect,
    pub angle: f64,
    pub symbol: Option<String>,
}

/// Output surface. Providers append commands; a renderer turns them into
/// pixels or markup afterwards.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    commands: Vec<DrawCommand>,
}

impl Surface {
    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Per-render state handed to providers and the engine.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    cancel: CancellationToken,
    expression: ExpressionContext,
    map_to_pixel: MapToPixel,
    reference_scale: Option<f64>,
    debug: DebugOverlay,
    surface: Surface,
}

impl RenderContext {
    pub fn new(map_to_pixel: MapToPixel) -> Self {
        Self {
            map_to_pixel,
            ..Self::default()
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn rendering_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn expression_context(&self) -> &ExpressionContext {
        &self.expression
    }

    pub fn expression_context_mut(&mut self) -> &mut ExpressionContext {
        &mut self.expression
    }

    pub fn map_to_pixel(&self) -> &MapToPixel {
        &self.map_to_pixel
    }

    pub fn set_map_to_pixel(&mut self, map_to_pixel: MapToPixel) {
        self.map_to_pixel = map_to_pixel;
    }

    pub fn convert_to_map_units(&self, millimeters: f64) -> f64 {
        self.map_to_pixel.millimeters_to_map_units(millimeters)
    }

    pub fn reference_scale(&self) -> Option<f64> {
        self.reference_scale
    }

    pub fn debug_overlay(&self) -> &DebugOverlay {
        &self.debug
    }

    pub fn debug_overlay_mut(&mut self) -> &mut DebugOverlay {
        &mut self.debug
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    /// Run `f` with `scope` pushed onto the expression context. The scope is
    /// popped again however `f` returns.
    pub fn with_expression_scope<R>(
        &mut self,
        scope: ExpressionScope,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        struct Popper<'a>(&'a mut RenderContext);
        impl Drop for Popper<'_> {
            fn drop(&mut self) {
                self.0.expression.pop();
            }
        }

        self.expression.push(scope);
        let popper = Popper(self);
        f(&mut *popper.0)
    }

    /// Run `f` with the reference scale overridden, restoring the previous
    /// value afterwards. `None` leaves the current scale in place.
    pub fn with_reference_scale<R>(
        &mut self,
        scale: Option<f64>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        struct Restore<'a> {
            ctx: &'a mut RenderContext,
            previous: Option<f64>,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.ctx.reference_scale = self.previous;
            }
        }

        let previous = self.reference_scale;
        if scale.is_some() {
            self.reference_scale = scale;
        }
        let restore = Restore { ctx: self, previous };
        f(&mut *restore.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let ctx = RenderContext::default().with_cancellation(token.clone());
        assert!(!ctx.rendering_stopped());
        token.cancel();
        assert!(ctx.rendering_stopped());
    }

    #[test]
    fn expression_scope_is_popped_after_closure() {
        let mut ctx = RenderContext::default();
        let scope = ExpressionScope::new("layer").with_variable("layer_name", Value::from("roads"));
        let seen = ctx.with_expression_scope(scope, |ctx| {
            ctx.expression_context()
                .variable("layer_name")
                .and_then(|v| v.as_str().map(str::to_string))
        });
        assert_eq!(seen.as_deref(), Some("roads"));
        assert_eq!(ctx.expression_context().scope_count(), 0);
    }

    #[test]
    fn expression_scope_is_popped_on_early_return() {
        let mut ctx = RenderContext::default();
        let result: Result<(), &str> = ctx.with_expression_scope(ExpressionScope::new("a"), |ctx| {
            if ctx.expression_context().scope_count() == 1 {
                return Err("stopped");
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(ctx.expression_context().scope_count(), 0);
    }

    #[test]
    fn reference_scale_is_restored() {
        let mut ctx = RenderContext::default();
        ctx.with_reference_scale(Some(5000.0), |ctx| {
            assert_eq!(ctx.reference_scale(), Some(5000.0));
            ctx.with_reference_scale(None, |ctx| {
                assert_eq!(ctx.reference_scale(), Some(5000.0));
            });
        });
        assert_eq!(ctx.reference_scale(), None);
    }

    #[test]
    fn millimeters_follow_dpi_and_scale() {
        let m2p = MapToPixel {
            map_units_per_pixel: 2.0,
            dpi: 25.4,
            ..MapToPixel::default()
        };
        assert!((m2p.millimeters_to_map_units(10.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn transform_flips_y_axis() {
        let m2p = MapToPixel::fit(&Rect::new(0.0, 0.0, 100.0, 50.0), 200.0, 100.0, 96.0);
        let p = m2p.transform(Point::new(0.0, 50.0));
        assert!(p.x.abs() < 1e-9 && p.y.abs() < 1e-9);
        let q = m2p.transform(Point::new(100.0, 0.0));
        assert!((q.x - 200.0).abs() < 1e-9 && (q.y - 100.0).abs() < 1e-9);
    }
}
