use crate::context::RenderContext;
use crate::results::LabelingResults;

use super::{EngineState, LabelingEngine};

/// Engine whose drawing is split across several calls, one per output
/// layer, while placement is computed once.
pub struct StagedLabelingEngine {
    engine: LabelingEngine,
}

impl StagedLabelingEngine {
    pub fn new(engine: LabelingEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &LabelingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut LabelingEngine {
        &mut self.engine
    }

    /// Register and solve. Labels are not drawn until
    /// `render_labels_for_layer` is called.
    pub fn run(&mut self, ctx: &mut RenderContext) {
        self.engine.register_labels(ctx);
        if ctx.rendering_stopped() {
            self.engine.cleanup();
            return;
        }

        self.engine.solve(ctx);
        if ctx.rendering_stopped() {
            self.engine.cleanup();
        }
    }

    pub fn render_labels_for_layer(&mut self, ctx: &mut RenderContext, layer_id: &str) {
        self.engine.draw_labels(ctx, Some(layer_id));
    }

    /// Whether solved labels are still available for drawing.
    pub fn is_ready(&self) -> bool {
        matches!(self.engine.state(), EngineState::Solved | EngineState::Drawn)
    }

    pub fn finalize(&mut self) -> LabelingResults {
        self.engine.cleanup();
        self.engine.take_results()
    }
}
