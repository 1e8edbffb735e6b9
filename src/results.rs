use serde::{Deserialize, Serialize};

use crate::feature::FeatureId;
use crate::geometry::Rect;

/// One solved label as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRecord {
    pub layer_id: String,
    pub feature_id: FeatureId,
    pub text: String,
    /// Label rectangle in map units, in the solver's unrotated frame.
    pub rect: Rect,
    pub angle: f64,
    pub z_index: f64,
    pub unplaced: bool,
}

/// Outcome of one labeling pass. Placed labels come first in draw order,
/// followed by the unplaced ones when they were requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelingResults {
    pub records: Vec<LabelRecord>,
}

impl LabelingResults {
    pub fn placed(&self) -> impl Iterator<Item = &LabelRecord> {
        self.records.iter().filter(|r| !r.unplaced)
    }

    pub fn unplaced(&self) -> impl Iterator<Item = &LabelRecord> {
        self.records.iter().filter(|r| r.unplaced)
    }

    pub fn placed_ids(&self) -> Vec<FeatureId> {
        self.placed().map(|r| r.feature_id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
