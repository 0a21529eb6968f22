//! A chunk that is still going through the generation stages.

use std::sync::atomic::{AtomicBool, Ordering};

use chunkgen_utils::ChunkPos;
use parking_lot::RwLock;

use crate::chunk::chunk_access::ChunkStatus;
use crate::chunk::chunk_storage::SavedChunk;

/// Number of block columns in a chunk.
pub const COLUMN_COUNT: usize = 16 * 16;

/// Index of the column at local `(x, z)`.
#[inline]
#[must_use]
pub const fn column_index(x: usize, z: usize) -> usize {
    (z << 4) | x
}

/// A chunk under construction.
///
/// Stage tasks run on worker threads and only ever hold a shared reference,
/// so all mutable state sits behind locks or atomics.
pub struct ProtoChunk {
    pos: ChunkPos,
    min_y: i32,
    height: i32,
    status: RwLock<ChunkStatus>,
    heights: RwLock<Box<[i32]>>,
    dirty: AtomicBool,
}

impl ProtoChunk {
    /// Creates an empty proto chunk. Every column starts at `min_y`.
    #[must_use]
    pub fn new(pos: ChunkPos, min_y: i32, height: i32) -> Self {
        Self {
            pos,
            min_y,
            height,
            status: RwLock::new(ChunkStatus::Empty),
            heights: RwLock::new(vec![min_y; COLUMN_COUNT].into_boxed_slice()),
            dirty: AtomicBool::new(true),
        }
    }

    /// Restores a proto chunk from saved data.
    #[must_use]
    pub fn from_saved(pos: ChunkPos, saved: SavedChunk, min_y: i32, height: i32) -> Self {
        let mut heights = saved.heights;
        if heights.len() != COLUMN_COUNT {
            log::warn!(
                "Saved chunk {pos} has {} columns, resetting its heights",
                heights.len()
            );
            heights = vec![min_y; COLUMN_COUNT].into_boxed_slice();
        }

        Self {
            pos,
            min_y,
            height,
            status: RwLock::new(saved.status),
            heights: RwLock::new(heights),
            dirty: AtomicBool::new(false),
        }
    }

    /// The position of this chunk.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The lowest block y of this chunk.
    #[must_use]
    pub const fn min_y(&self) -> i32 {
        self.min_y
    }

    /// The height of this chunk in blocks.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// The status this chunk has reached and would be saved with.
    #[must_use]
    pub fn persisted_status(&self) -> ChunkStatus {
        *self.status.read()
    }

    /// Moves the chunk to `status`. Statuses never move backwards.
    pub fn set_persisted_status(&self, status: ChunkStatus) {
        let mut current = self.status.write();
        if status.is_after(*current) {
            *current = status;
            self.mark_dirty();
        }
    }

    /// Height of the highest generated block in the column at local `(x, z)`.
    #[must_use]
    pub fn get_height(&self, x: usize, z: usize) -> i32 {
        self.heights.read()[column_index(x, z)]
    }

    /// Sets the column height at local `(x, z)`, clamped to the chunk bounds.
    pub fn set_height(&self, x: usize, z: usize, y: i32) {
        let y = y.clamp(self.min_y, self.min_y + self.height);
        self.heights.write()[column_index(x, z)] = y;
        self.mark_dirty();
    }

    /// Copies the column heights out.
    #[must_use]
    pub fn heights(&self) -> Box<[i32]> {
        self.heights.read().clone()
    }

    /// Marks the chunk as modified since it was last saved.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Returns true if the chunk changed since it was last saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Snapshots the chunk for storage and clears its dirty flag.
    #[must_use]
    pub fn to_saved(&self) -> SavedChunk {
        self.dirty.store(false, Ordering::Relaxed);
        SavedChunk {
            status: self.persisted_status(),
            heights: self.heights(),
        }
    }
}
