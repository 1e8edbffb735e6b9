use std::cmp::Ordering;
use std::collections::HashMap;

/// The attributes a solved label is ordered by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey<'a> {
    pub z_index: f64,
    pub layer_id: Option<&'a str>,
    /// Label width times height.
    pub area: f64,
}

/// Draw order for solved labels.
///
/// Lower z-index draws first. z-indexes are grouped into buckets `epsilon`
/// wide, so near-equal values compare equal without breaking transitivity.
/// Within one bucket, labels from layers further down the configured layer
/// order draw first; layers missing from the order rank below every listed
/// layer. Within one layer larger labels draw before smaller ones.
#[derive(Debug, Clone)]
pub struct LabelSorter {
    positions: HashMap<String, usize>,
    epsilon: f64,
}

impl LabelSorter {
    pub fn new(layer_order: &[String], epsilon: f64) -> Self {
        let mut positions = HashMap::new();
        for (idx, id) in layer_order.iter().enumerate() {
            positions.entry(id.clone()).or_insert(idx);
        }
        Self {
            positions,
            epsilon: epsilon.abs(),
        }
    }

    pub fn layer_position(&self, layer_id: &str) -> Option<usize> {
        self.positions.get(layer_id).copied()
    }

    /// Higher ranks draw first. Unlisted layers share the highest rank.
    fn layer_rank(&self, layer_id: Option<&str>) -> usize {
        layer_id
            .and_then(|id| self.layer_position(id))
            .unwrap_or(usize::MAX)
    }

    fn z_bucket(&self, z_index: f64) -> f64 {
        if self.epsilon > 0.0 && z_index.is_finite() {
            (z_index / self.epsilon).floor()
        } else {
            z_index
        }
    }

    pub fn compare(&self, a: &SortKey<'_>, b: &SortKey<'_>) -> Ordering {
        self.z_bucket(a.z_index)
            .total_cmp(&self.z_bucket(b.z_index))
            .then_with(|| self.layer_rank(b.layer_id).cmp(&self.layer_rank(a.layer_id)))
            .then_with(|| b.area.total_cmp(&a.area))
    }

    /// Stable sort of `items` by the keys `key` extracts.
    pub fn sort<'k, T>(&self, items: &mut [T], key: impl Fn(&T) -> SortKey<'k>) {
        items.sort_by(|a, b| self.compare(&key(a), &key(b)));
    }
}
