// Turns provider output into solver registrations, one provider tree at a
// time. Rejections are recorded and logged; they never stop the pass.

use tracing::{debug, trace};

use crate::context::RenderContext;
use crate::feature::{FeatureId, LabelFeature, ProviderId};
use crate::geometry::Point;
use crate::provider::{LabelProvider, ProviderPath};
use crate::solver::{LayerSpec, PlacementSolver, RegistrationError};

/// Rotation applied to incoming geometry so the solver works in the
/// screen-aligned frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRotation {
    pub degrees: f64,
    pub center: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFeature {
    pub layer_id: String,
    pub feature: FeatureId,
    pub reason: RegistrationError,
}

#[derive(Debug, Default)]
pub struct LabelFeatureRegistry {
    providers: Vec<ProviderPath>,
    layer_ids: Vec<String>,
    active_sub_providers: Vec<ProviderPath>,
    skipped: Vec<SkippedFeature>,
    registered: usize,
    rotation: Option<FrameRotation>,
}

impl LabelFeatureRegistry {
    pub fn new(rotation: Option<FrameRotation>) -> Self {
        Self {
            rotation,
            ..Self::default()
        }
    }

    /// Register a top-level provider and everything below it, with the
    /// layer's expression scope pushed for the duration.
    pub fn register_root(
        &mut self,
        provider: &mut dyn LabelProvider,
        index: usize,
        ctx: &mut RenderContext,
        solver: &mut dyn PlacementSolver,
    ) {
        match provider.layer_expression_scope().cloned() {
            Some(scope) => ctx.with_expression_scope(scope, |ctx| {
                self.process_provider(provider, ProviderPath::root(index), ctx, solver)
            }),
            None => self.process_provider(provider, ProviderPath::root(index), ctx, solver),
        }
    }

    pub fn process_provider(
        &mut self,
        provider: &mut dyn LabelProvider,
        path: ProviderPath,
        ctx: &mut RenderContext,
        solver: &mut dyn PlacementSolver,
    ) {
        if ctx.rendering_stopped() {
            return;
        }

        let flags = provider.flags();
        let provider_id = self.assign(&path, provider.layer_id());
        let layer = solver.add_layer(LayerSpec {
            provider: provider_id,
            layer_id: provider.layer_id().to_string(),
            name: provider.name().to_string(),
            placement: provider.placement(),
            priority: provider.priority(),
            active: flags.draw_labels,
            display_all: flags.draw_all_labels,
            merge_connected_lines: flags.merge_connected_lines,
            obstacle_type: provider.obstacle_type(),
            centroid_inside: flags.centroid_must_be_inside,
            upside_down: provider.upside_down_labels(),
            position_order: provider.predefined_position_order(),
        });

        for feature in self.collect(provider, provider_id, ctx) {
            let id = feature.id();
            match solver.register_feature(layer, feature) {
                Ok(()) => self.registered += 1,
                Err(reason) => {
                    debug!(
                        feature = %id,
                        layer = provider.layer_id(),
                        %reason,
                        "ignoring feature rejected by solver"
                    );
                    self.skipped.push(SkippedFeature {
                        layer_id: provider.layer_id().to_string(),
                        feature: id,
                        reason,
                    });
                }
            }
        }

        let sub_count = provider.sub_providers().len();
        for idx in 0..sub_count {
            let sub_path = path.child(idx);
            self.active_sub_providers.push(sub_path.clone());
            if let Some(sub) = provider.sub_providers_mut().get_mut(idx) {
                self.process_provider(sub.as_mut(), sub_path, ctx, solver);
            }
        }
    }

    /// Fetch one provider's features, tagged with their provider and moved
    /// into the solver frame.
    pub fn collect(
        &mut self,
        provider: &mut dyn LabelProvider,
        provider_id: ProviderId,
        ctx: &mut RenderContext,
    ) -> Vec<LabelFeature> {
        let rotation = self.rotation;
        let mut features = provider.label_features(ctx);
        for feature in &mut features {
            feature.set_provider(provider_id);
            if let Some(rotation) = rotation {
                let rotated = feature.geometry().rotated(rotation.degrees, rotation.center);
                feature.replace_geometry(rotated);
            }
        }
        trace!(
            layer = provider.layer_id(),
            count = features.len(),
            "collected label features"
        );
        features
    }

    fn assign(&mut self, path: &ProviderPath, layer_id: &str) -> ProviderId {
        if let Some(pos) = self.providers.iter().position(|p| p == path) {
            return ProviderId(pos);
        }
        self.providers.push(path.clone());
        self.layer_ids.push(layer_id.to_string());
        ProviderId(self.providers.len() - 1)
    }

    pub fn provider_path(&self, id: ProviderId) -> Option<&ProviderPath> {
        self.providers.get(id.0)
    }

    pub fn provider_layer_id(&self, id: ProviderId) -> Option<&str> {
        self.layer_ids.get(id.0).map(String::as_str)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn active_sub_providers(&self) -> &[ProviderPath] {
        &self.active_sub_providers
    }

    pub fn skipped(&self) -> &[SkippedFeature] {
        &self.skipped
    }

    pub fn registered_count(&self) -> usize {
        self.registered
    }
}
