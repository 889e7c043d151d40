//! UV island records

use serde::{Deserialize, Serialize};

/// A connected group of faces unwrapped without internal seams.
///
/// `min`/`max` bound the island's UVs in atlas space. `margin` is the
/// spacing that was actually applied around the island; it can be smaller
/// than the requested one when the islands would not fit otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvIsland {
    pub faces: Vec<usize>,
    pub min: [f32; 2],
    pub max: [f32; 2],
    pub margin: f32,
}

impl UvIsland {
    pub fn width(&self) -> f32 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    /// Bounding box grown by half the margin on every side
    pub fn inflated(&self) -> ([f32; 2], [f32; 2]) {
        let h = self.margin * 0.5;
        (
            [self.min[0] - h, self.min[1] - h],
            [self.max[0] + h, self.max[1] + h],
        )
    }

    /// Whether the inflated boxes of two islands share interior area.
    /// Touching edges within `tolerance` do not count as overlap.
    pub fn overlaps(&self, other: &UvIsland, tolerance: f32) -> bool {
        let (a_min, a_max) = self.inflated();
        let (b_min, b_max) = other.inflated();
        (0..2).all(|k| a_min[k] + tolerance < b_max[k] && b_min[k] + tolerance < a_max[k])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn island(min: [f32; 2], max: [f32; 2], margin: f32) -> UvIsland {
        UvIsland {
            faces: vec![0],
            min,
            max,
            margin,
        }
    }

    #[test]
    fn test_touching_islands_do_not_overlap() {
        let a = island([0.05, 0.05], [0.45, 0.45], 0.1);
        let b = island([0.55, 0.05], [0.95, 0.45], 0.1);
        assert!(!a.overlaps(&b, 1e-6));
    }

    #[test]
    fn test_margin_creates_overlap() {
        let a = island([0.0, 0.0], [0.5, 0.5], 0.2);
        let b = island([0.55, 0.0], [1.0, 0.5], 0.2);
        assert!(a.overlaps(&b, 1e-6));
        assert!(b.overlaps(&a, 1e-6));
    }
}
