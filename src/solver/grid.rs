use std::collections::{HashMap, HashSet};

use crate::geometry::Rect;

const MIN_CELL: f64 = 1e-6;

/// Uniform grid over rectangles for fast overlap queries while placing.
pub(crate) struct ObstacleGrid {
    cell: f64,
    /// Maps grid cell (ix, iy) to indices into the caller's rectangle list.
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl ObstacleGrid {
    pub(crate) fn new(cell: f64) -> Self {
        let cell = if cell.is_finite() { cell.max(MIN_CELL) } else { 1.0 };
        Self {
            cell,
            cells: HashMap::new(),
        }
    }

    fn span(&self, rect: &Rect) -> (i64, i64, i64, i64) {
        (
            (rect.x / self.cell).floor() as i64,
            (rect.y / self.cell).floor() as i64,
            (rect.x_max() / self.cell).floor() as i64,
            (rect.y_max() / self.cell).floor() as i64,
        )
    }

    pub(crate) fn insert(&mut self, idx: usize, rect: &Rect) {
        let (x0, y0, x1, y1) = self.span(rect);
        for ix in x0..=x1 {
            for iy in y0..=y1 {
                self.cells.entry((ix, iy)).or_default().push(idx);
            }
        }
    }

    /// Indices of rectangles that could overlap `rect`, each reported once.
    pub(crate) fn query(&self, rect: &Rect) -> impl Iterator<Item = usize> + '_ {
        let (x0, y0, x1, y1) = self.span(rect);
        let mut seen = HashSet::new();
        (x0..=x1)
            .flat_map(move |ix| (y0..=y1).map(move |iy| (ix, iy)))
            .flat_map(move |key| {
                self.cells
                    .get(&key)
                    .map(|v| v.as_slice())
                    .unwrap_or(&[])
                    .iter()
                    .copied()
            })
            .filter(move |idx| seen.insert(*idx))
    }
}
