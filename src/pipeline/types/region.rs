use serde::Serialize;

/// Axis-aligned rectangle marking detected motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Non-overlapping rectangles for one frame, finalized by
/// [`merge_overlapping`]. May be empty.
pub type RegionSet = Vec<Region>;

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Projections intersect on both axes. Touching edges count as overlap
    /// so adjacent detections coalesce.
    pub fn overlaps(&self, other: &Region) -> bool {
        !(self.right() < other.x
            || other.right() < self.x
            || self.bottom() < other.y
            || other.bottom() < self.y)
    }

    /// Bounding union of two rectangles.
    pub fn union(&self, other: &Region) -> Region {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Region::new(left, top, right - left, bottom - top)
    }
}

/// Merge overlapping rectangles into their bounding unions until no pair
/// overlaps. The fixed point is independent of input order; the result is
/// returned sorted by position for determinism.
pub fn merge_overlapping(regions: Vec<Region>) -> RegionSet {
    let mut pending = regions;
    loop {
        let mut merged_any = false;
        let mut result: Vec<Region> = Vec::with_capacity(pending.len());
        while let Some(mut current) = pending.pop() {
            let mut i = 0;
            while i < pending.len() {
                if current.overlaps(&pending[i]) {
                    current = current.union(&pending.swap_remove(i));
                    merged_any = true;
                } else {
                    i += 1;
                }
            }
            result.push(current);
        }
        if !merged_any {
            result.sort_by_key(|r| (r.x, r.y, r.width, r.height));
            return result;
        }
        pending = result;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_overlapping_pair_and_keeps_disjoint() {
        let regions = vec![
            Region::new(0, 0, 10, 10),
            Region::new(5, 5, 10, 10),
            Region::new(100, 100, 5, 5),
        ];
        let merged = merge_overlapping(regions);
        assert_eq!(
            merged,
            vec![Region::new(0, 0, 15, 15), Region::new(100, 100, 5, 5)]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let regions = vec![
            Region::new(0, 0, 10, 10),
            Region::new(5, 5, 10, 10),
            Region::new(12, 12, 10, 10),
            Region::new(100, 100, 5, 5),
        ];
        let once = merge_overlapping(regions);
        let twice = merge_overlapping(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_is_order_independent() {
        let regions = vec![
            Region::new(0, 0, 10, 10),
            Region::new(5, 5, 10, 10),
            Region::new(12, 12, 10, 10),
            Region::new(40, 40, 3, 3),
            Region::new(41, 38, 4, 4),
        ];
        let expected = merge_overlapping(regions.clone());
        // A handful of rotations stands in for arbitrary shuffles.
        for shift in 1..regions.len() {
            let mut rotated = regions.clone();
            rotated.rotate_left(shift);
            assert_eq!(merge_overlapping(rotated), expected);
        }
    }

    #[test]
    fn chained_overlaps_collapse_to_one_component() {
        // a-b overlap, b-c overlap, a-c do not: the union must still
        // collapse all three.
        let regions = vec![
            Region::new(0, 0, 6, 6),
            Region::new(5, 0, 6, 6),
            Region::new(10, 0, 6, 6),
        ];
        let merged = merge_overlapping(regions);
        assert_eq!(merged, vec![Region::new(0, 0, 16, 6)]);
    }

    #[test]
    fn touching_edges_count_as_overlap() {
        let regions = vec![Region::new(0, 0, 10, 10), Region::new(10, 0, 10, 10)];
        assert_eq!(merge_overlapping(regions), vec![Region::new(0, 0, 20, 10)]);
    }

    #[test]
    fn empty_input_yields_empty_set() {
        assert!(merge_overlapping(Vec::new()).is_empty());
    }
}
