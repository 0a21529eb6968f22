//! A fully generated chunk.

use std::sync::atomic::{AtomicBool, Ordering};

use chunkgen_utils::ChunkPos;

use crate::chunk::chunk_access::ChunkStatus;
use crate::chunk::chunk_storage::SavedChunk;
use crate::chunk::proto_chunk::{ProtoChunk, column_index};

/// A chunk that reached [`ChunkStatus::Full`]. Its terrain no longer changes.
pub struct LevelChunk {
    pos: ChunkPos,
    heights: Box<[i32]>,
    dirty: AtomicBool,
}

impl LevelChunk {
    /// Builds the level chunk from a finished proto chunk.
    #[must_use]
    pub fn from_proto(proto: &ProtoChunk) -> Self {
        Self {
            pos: proto.pos(),
            heights: proto.heights(),
            dirty: AtomicBool::new(true),
        }
    }

    /// The position of this chunk.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Height of the highest block in the column at local `(x, z)`.
    #[must_use]
    pub fn get_height(&self, x: usize, z: usize) -> i32 {
        self.heights[column_index(x, z)]
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub(crate) fn to_saved(&self) -> SavedChunk {
        self.dirty.store(false, Ordering::Relaxed);
        SavedChunk {
            status: ChunkStatus::Full,
            heights: self.heights.clone(),
        }
    }
}
