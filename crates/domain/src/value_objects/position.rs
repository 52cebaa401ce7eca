//! Block positions and axis-aligned areas

use serde::{Deserialize, Serialize};
use std::fmt;

/// A block coordinate in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between two block positions.
    ///
    /// Differences are taken in `i128` so extreme coordinates cannot overflow.
    pub fn distance_to(&self, other: &BlockPos) -> f64 {
        let axis = |a: i64, b: i64| (i128::from(a) - i128::from(b)) as f64;
        let dx = axis(self.x, other.x);
        let dy = axis(self.y, other.y);
        let dz = axis(self.z, other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// True if `other` lies within `radius` blocks (inclusive).
    pub fn is_within(&self, other: &BlockPos, radius: u32) -> bool {
        self.distance_to(other) <= f64::from(radius)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// An axis-aligned box of blocks, inclusive on both corners.
///
/// The corners are normalized on construction so `min` is always the
/// smaller coordinate on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AreaCorners")]
pub struct Area {
    min: BlockPos,
    max: BlockPos,
}

#[derive(Deserialize)]
struct AreaCorners {
    min: BlockPos,
    max: BlockPos,
}

impl From<AreaCorners> for Area {
    fn from(corners: AreaCorners) -> Self {
        Area::new(corners.min, corners.max)
    }
}

impl Area {
    pub fn new(a: BlockPos, b: BlockPos) -> Self {
        Self {
            min: BlockPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: BlockPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn min(&self) -> BlockPos {
        self.min
    }

    pub fn max(&self) -> BlockPos {
        self.max
    }

    pub fn contains(&self, pos: &BlockPos) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x)
            && (self.min.y..=self.max.y).contains(&pos.y)
            && (self.min.z..=self.max.z).contains(&pos.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = BlockPos::new(0, 0, 0);
        let b = BlockPos::new(3, 4, 0);
        assert!((a.distance_to(&b) - 5.0).abs() < f64::EPSILON);
        assert!(a.is_within(&b, 5));
        assert!(!a.is_within(&b, 4));
    }

    #[test]
    fn distance_handles_extreme_coordinates() {
        let low = BlockPos::new(i64::MIN, 0, 0);
        let high = BlockPos::new(i64::MAX, 0, 0);
        assert!(low.distance_to(&high) > 1.8e19);
        assert!(!low.is_within(&BlockPos::new(0, 0, 0), u32::MAX));
    }

    #[test]
    fn area_normalizes_corners() {
        let area = Area::new(BlockPos::new(10, 70, -5), BlockPos::new(0, 60, 5));
        assert_eq!(area.min(), BlockPos::new(0, 60, -5));
        assert_eq!(area.max(), BlockPos::new(10, 70, 5));
        assert!(area.contains(&BlockPos::new(10, 60, 0)));
        assert!(!area.contains(&BlockPos::new(11, 60, 0)));
    }

    #[test]
    fn area_deserializes_unordered_corners() {
        let area: Area = serde_json::from_str(
            r#"{"min":{"x":5,"y":5,"z":5},"max":{"x":0,"y":0,"z":0}}"#,
        )
        .unwrap();
        assert_eq!(area.min(), BlockPos::new(0, 0, 0));
    }
}
