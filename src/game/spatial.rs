//! Uniform-grid spatial hash for broad-phase pair finding

use std::collections::{BTreeSet, HashMap};

use super::entities::EntityId;
use super::math::Vec2;

/// Buckets circles by grid cell. Pairs come out sorted by id so iteration
/// order never depends on hash-map layout.
#[derive(Debug)]
pub struct SpatialHash {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<EntityId>>,
}

impl SpatialHash {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: cell_size.max(1.0),
            cells: HashMap::new(),
        }
    }

    fn cell_of(&self, v: f64) -> i64 {
        (v / self.cell_size).floor() as i64
    }

    /// Insert a circle into every cell its bounding box touches
    pub fn insert(&mut self, id: EntityId, pos: Vec2, radius: f64) {
        let (x0, x1) = (self.cell_of(pos.x - radius), self.cell_of(pos.x + radius));
        let (y0, y1) = (self.cell_of(pos.y - radius), self.cell_of(pos.y + radius));
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                self.cells.entry((cx, cy)).or_default().push(id);
            }
        }
    }

    /// Candidate pairs `(a, b)` with `a < b`, deduplicated and sorted
    pub fn candidate_pairs(&self) -> BTreeSet<(EntityId, EntityId)> {
        let mut pairs = BTreeSet::new();
        for ids in self.cells.values() {
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    if a == b {
                        continue;
                    }
                    pairs.insert(((*a).min(*b), (*a).max(*b)));
                }
            }
        }
        pairs
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_circles_pair_far_circles_do_not() {
        let mut hash = SpatialHash::new(100.0);
        hash.insert(1, Vec2::new(10.0, 10.0), 20.0);
        hash.insert(2, Vec2::new(30.0, 10.0), 20.0);
        hash.insert(3, Vec2::new(900.0, 900.0), 20.0);
        let pairs = hash.candidate_pairs();
        assert!(pairs.contains(&(1, 2)));
        assert!(!pairs.iter().any(|(a, b)| *a == 3 || *b == 3));
    }

    #[test]
    fn test_pairs_spanning_cells_deduplicated() {
        let mut hash = SpatialHash::new(50.0);
        hash.insert(7, Vec2::new(49.0, 49.0), 30.0);
        hash.insert(4, Vec2::new(51.0, 51.0), 30.0);
        let pairs: Vec<_> = hash.candidate_pairs().into_iter().collect();
        assert_eq!(pairs, vec![(4, 7)]);
    }
}
