use serde::{Deserialize, Serialize};

use crate::context::{DrawCommand, DrawPass, ExpressionScope, RenderContext};
use crate::feature::{LabelFeature, ObstacleType, Placement, UpsideDownLabels};
use crate::placement_codec::PredefinedPosition;
use crate::solver::LabelPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderFlags {
    pub draw_labels: bool,
    pub draw_all_labels: bool,
    pub merge_connected_lines: bool,
    pub centroid_must_be_inside: bool,
}

impl Default for ProviderFlags {
    fn default() -> Self {
        Self {
            draw_labels: true,
            draw_all_labels: false,
            merge_connected_lines: false,
            centroid_must_be_inside: false,
        }
    }
}

/// Location of a provider in the engine's tree: index of the top-level
/// provider, then the index of each nested sub-provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProviderPath(pub Vec<usize>);

impl ProviderPath {
    pub fn root(index: usize) -> Self {
        Self(vec![index])
    }

    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }
}

/// A source of labels for one map layer.
///
/// Providers own their sub-providers. The default `start_render` and
/// `stop_render` forward to them; draw hooks default to doing nothing.
pub trait LabelProvider {
    fn layer_id(&self) -> &str;

    fn name(&self) -> &str {
        self.layer_id()
    }

    fn flags(&self) -> ProviderFlags {
        ProviderFlags::default()
    }

    fn placement(&self) -> Placement {
        Placement::AroundPoint
    }

    fn priority(&self) -> f64 {
        0.5
    }

    fn obstacle_type(&self) -> ObstacleType {
        ObstacleType::PolygonInterior
    }

    fn upside_down_labels(&self) -> UpsideDownLabels {
        UpsideDownLabels::Upright
    }

    fn predefined_position_order(&self) -> Vec<PredefinedPosition> {
        Vec::new()
    }

    /// Layer-level z-index used to order participating layers.
    fn z_index(&self) -> f64 {
        0.0
    }

    fn layer_expression_scope(&self) -> Option<&ExpressionScope> {
        None
    }

    fn layer_reference_scale(&self) -> Option<f64> {
        None
    }

    fn label_features(&mut self, ctx: &mut RenderContext) -> Vec<LabelFeature>;

    fn sub_providers(&self) -> &[Box<dyn LabelProvider>] {
        &[]
    }

    fn sub_providers_mut(&mut self) -> &mut [Box<dyn LabelProvider>] {
        &mut []
    }

    fn start_render(&mut self, ctx: &mut RenderContext) {
        for sub in self.sub_providers_mut() {
            sub.start_render(ctx);
        }
    }

    fn stop_render(&mut self, ctx: &mut RenderContext) {
        for sub in self.sub_providers_mut() {
            sub.stop_render(ctx);
        }
    }

    fn draw_label_background(
        &self,
        _ctx: &mut RenderContext,
        _label: &LabelPosition,
        _feature: &LabelFeature,
    ) {
    }

    fn draw_label(&self, _ctx: &mut RenderContext, _label: &LabelPosition, _feature: &LabelFeature) {}

    fn draw_unplaced_label(
        &self,
        _ctx: &mut RenderContext,
        _label: &LabelPosition,
        _feature: &LabelFeature,
    ) {
    }
}

/// Walk `path` down from `roots`.
pub fn resolve<'a>(
    roots: &'a [Box<dyn LabelProvider>],
    path: &ProviderPath,
) -> Option<&'a dyn LabelProvider> {
    let (first, rest) = path.0.split_first()?;
    let mut current: &dyn LabelProvider = roots.get(*first)?.as_ref();
    for idx in rest {
        current = current.sub_providers().get(*idx)?.as_ref();
    }
    Some(current)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerStyle {
    pub placement: Placement,
    pub priority: f64,
    pub obstacle_type: ObstacleType,
    pub upside_down: UpsideDownLabels,
    pub flags: ProviderFlags,
    pub z_index: f64,
    pub draw_background: bool,
    pub reference_scale: Option<f64>,
    pub position_order: Vec<PredefinedPosition>,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            placement: Placement::AroundPoint,
            priority: 0.5,
            obstacle_type: ObstacleType::PolygonInterior,
            upside_down: UpsideDownLabels::Upright,
            flags: ProviderFlags::default(),
            z_index: 0.0,
            draw_background: true,
            reference_scale: None,
            position_order: Vec::new(),
        }
    }
}

/// Provider over a fixed set of features, painting into the context's
/// surface. Used for scene files and tests.
pub struct StaticLabelProvider {
    layer_id: String,
    name: String,
    style: LayerStyle,
    features: Vec<LabelFeature>,
    scope: ExpressionScope,
    sub_providers: Vec<Box<dyn LabelProvider>>,
    rendering: bool,
}

impl StaticLabelProvider {
    pub fn new(layer_id: impl Into<String>, features: Vec<LabelFeature>) -> Self {
        let layer_id = layer_id.into();
        let scope = ExpressionScope::new("layer")
            .with_variable("layer_id", serde_json::Value::from(layer_id.clone()));
        Self {
            name: layer_id.clone(),
            layer_id,
            style: LayerStyle::default(),
            features,
            scope,
            sub_providers: Vec::new(),
            rendering: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.scope = self
            .scope
            .with_variable("layer_name", serde_json::Value::from(self.name.clone()));
        self
    }

    pub fn with_style(mut self, style: LayerStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_sub_provider(mut self, provider: Box<dyn LabelProvider>) -> Self {
        self.sub_providers.push(provider);
        self
    }

    pub fn style(&self) -> &LayerStyle {
        &self.style
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    fn paint(&self, ctx: &mut RenderContext, pass: DrawPass, label: &LabelPosition, feature: &LabelFeature) {
        let rect = ctx.map_to_pixel().transform_rect(label.rect());
        ctx.surface_mut().push(DrawCommand {
            pass,
            layer_id: self.layer_id.clone(),
            feature_id: feature.id(),
            text: feature.label_text().to_string(),
            rect,
            angle: label.angle(),
            symbol: feature.symbol().map(str::to_string),
        });
    }
}

impl LabelProvider for StaticLabelProvider {
    fn layer_id(&self) -> &str {
        &self.layer_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> ProviderFlags {
        self.style.flags
    }

    fn placement(&self) -> Placement {
        self.style.placement
    }

    fn priority(&self) -> f64 {
        self.style.priority
    }

    fn obstacle_type(&self) -> ObstacleType {
        self.style.obstacle_type
    }

    fn upside_down_labels(&self) -> UpsideDownLabels {
        self.style.upside_down
    }

    fn predefined_position_order(&self) -> Vec<PredefinedPosition> {
        self.style.position_order.clone()
    }

    fn z_index(&self) -> f64 {
        self.style.z_index
    }

    fn layer_expression_scope(&self) -> Option<&ExpressionScope> {
        Some(&self.scope)
    }

    fn layer_reference_scale(&self) -> Option<f64> {
        self.style.reference_scale
    }

    fn label_features(&mut self, _ctx: &mut RenderContext) -> Vec<LabelFeature> {
        self.features.clone()
    }

    fn sub_providers(&self) -> &[Box<dyn LabelProvider>] {
        &self.sub_providers
    }

    fn sub_providers_mut(&mut self) -> &mut [Box<dyn LabelProvider>] {
        &mut self.sub_providers
    }

    fn start_render(&mut self, ctx: &mut RenderContext) {
        self.rendering = true;
        for sub in &mut self.sub_providers {
            sub.start_render(ctx);
        }
    }

    fn stop_render(&mut self, ctx: &mut RenderContext) {
        self.rendering = false;
        for sub in &mut self.sub_providers {
            sub.stop_render(ctx);
        }
    }

    fn draw_label_background(&self, ctx: &mut RenderContext, label: &LabelPosition, feature: &LabelFeature) {
        if self.style.draw_background {
            self.paint(ctx, DrawPass::Background, label, feature);
        }
    }

    fn draw_label(&self, ctx: &mut RenderContext, label: &LabelPosition, feature: &LabelFeature) {
        self.paint(ctx, DrawPass::Foreground, label, feature);
    }

    fn draw_unplaced_label(&self, ctx: &mut RenderContext, label: &LabelPosition, feature: &LabelFeature) {
        self.paint(ctx, DrawPass::Unplaced, label, feature);
    }
}
