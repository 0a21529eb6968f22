//! Chunk coordinates.

use std::fmt;

use crate::math::Vector2;

/// The position of a chunk column, in chunk coordinates.
///
/// `0.x` is the chunk x coordinate and `0.y` the chunk z coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkPos(pub Vector2<i32>);

impl ChunkPos {
    /// Creates a new chunk position.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self(Vector2::new(x, z))
    }

    /// The chunk x coordinate.
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.0.x
    }

    /// The chunk z coordinate.
    #[must_use]
    pub const fn z(&self) -> i32 {
        self.0.y
    }

    /// Returns `max(|dx|, |dz|)` between this position and `(x, z)`.
    #[must_use]
    pub const fn get_chessboard_distance(&self, x: i32, z: i32) -> u32 {
        let dx = self.0.x.abs_diff(x);
        let dz = self.0.y.abs_diff(z);
        if dx > dz { dx } else { dz }
    }

    /// Chessboard distance to another chunk position.
    #[must_use]
    pub const fn chessboard_distance_to(&self, other: Self) -> u32 {
        self.get_chessboard_distance(other.0.x, other.0.y)
    }

    /// Packs the position into a single `i64`, x in the low bits.
    #[must_use]
    pub const fn to_long(&self) -> i64 {
        (self.0.x as i64 & 0xFFFF_FFFF) | ((self.0.y as i64 & 0xFFFF_FFFF) << 32)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.0.x, self.0.y)
    }
}
