use crate::context::{DrawPass, RenderContext};
use crate::provider::{LabelProvider, resolve};
use crate::registry::LabelFeatureRegistry;
use crate::solver::{LabelPosition, Problem};

/// Where the labels of one draw call go.
pub(crate) struct DrawTarget<'a> {
    pub providers: &'a [Box<dyn LabelProvider>],
    pub registry: &'a LabelFeatureRegistry,
    /// Restrict drawing to the labels of this layer.
    pub layer: Option<&'a str>,
}

/// Hand every label in `labels` to its provider for `pass`. Stops at the
/// first label drawn after cancellation; returns how many were drawn.
pub(crate) fn draw_pass(
    ctx: &mut RenderContext,
    target: &DrawTarget<'_>,
    problem: &mut Problem,
    labels: &[LabelPosition],
    pass: DrawPass,
) -> usize {
    let mut drawn = 0;
    for label in labels {
        if ctx.rendering_stopped() {
            break;
        }

        let Some(feature) = problem.position_feature(label) else {
            continue;
        };
        let Some(provider) = feature
            .provider()
            .and_then(|id| target.registry.provider_path(id))
            .and_then(|path| resolve(target.providers, path))
        else {
            continue;
        };
        if let Some(layer) = target.layer
            && provider.layer_id() != layer
        {
            continue;
        }

        ctx.expression_context_mut().set_feature(Some(feature.id()));
        ctx.with_reference_scale(provider.layer_reference_scale(), |ctx| match pass {
            DrawPass::Background => provider.draw_label_background(ctx, label, feature),
            DrawPass::Foreground => provider.draw_label(ctx, label, feature),
            DrawPass::Unplaced => provider.draw_unplaced_label(ctx, label, feature),
        });
        drawn += 1;

        if pass != DrawPass::Background
            && let Some(feature) = problem.feature_mut(label.feature_index())
        {
            feature.clear_symbol();
        }
    }
    ctx.expression_context_mut().set_feature(None);
    drawn
}
