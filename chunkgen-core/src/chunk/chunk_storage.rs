//! Chunk persistence.
//!
//! The on-disk format is not part of this crate; [`ChunkStorage`] is the seam a
//! region-file backend plugs into. [`MemoryChunkStorage`] keeps everything in memory
//! and is what tests and the pregeneration binary use.

use chunkgen_utils::ChunkPos;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::chunk::chunk_access::ChunkStatus;

/// The persisted form of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedChunk {
    /// The status the chunk had reached when saved.
    pub status: ChunkStatus,
    /// Column heights, indexed by `(z << 4) | x`.
    pub heights: Box<[i32]>,
}

/// A place chunks are saved to and loaded from.
pub trait ChunkStorage: Send + Sync {
    /// Loads the chunk at `pos`, `Ok(None)` if it was never saved.
    ///
    /// # Errors
    /// Returns an error if the stored data exists but cannot be read.
    fn load(&self, pos: ChunkPos) -> anyhow::Result<Option<SavedChunk>>;

    /// Saves the chunk at `pos`, replacing any previous data.
    ///
    /// # Errors
    /// Returns an error if the data cannot be written.
    fn save(&self, pos: ChunkPos, chunk: SavedChunk) -> anyhow::Result<()>;
}

/// Chunk storage backed by a hash map.
#[derive(Default)]
pub struct MemoryChunkStorage {
    chunks: Mutex<FxHashMap<ChunkPos, SavedChunk>>,
}

impl MemoryChunkStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Returns true if no chunk was saved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// The status of the saved chunk at `pos`, if any.
    #[must_use]
    pub fn saved_status(&self, pos: ChunkPos) -> Option<ChunkStatus> {
        self.chunks.lock().get(&pos).map(|chunk| chunk.status)
    }
}

impl ChunkStorage for MemoryChunkStorage {
    fn load(&self, pos: ChunkPos) -> anyhow::Result<Option<SavedChunk>> {
        Ok(self.chunks.lock().get(&pos).cloned())
    }

    fn save(&self, pos: ChunkPos, chunk: SavedChunk) -> anyhow::Result<()> {
        self.chunks.lock().insert(pos, chunk);
        Ok(())
    }
}
