//! The stage work a world generator provides.

use enum_dispatch::enum_dispatch;

use crate::chunk::chunk_access::ChunkAccess;
use crate::chunk::flat_chunk_generator::FlatChunkGenerator;

/// Produces the content of a chunk, one generation stage at a time.
///
/// Every method runs on a worker thread with the chunk at the status right before
/// the stage. Chunks that are already full are left untouched.
#[enum_dispatch]
pub trait ChunkGenerator {
    /// Places structure starts.
    fn create_structures(&self, _chunk: &ChunkAccess) {}

    /// Picks the biomes of the chunk.
    fn create_biomes(&self, _chunk: &ChunkAccess) {}

    /// Fills the base terrain.
    fn fill_from_noise(&self, chunk: &ChunkAccess);

    /// Replaces the top of the terrain with surface blocks.
    fn build_surface(&self, chunk: &ChunkAccess);

    /// Carves caves into the terrain.
    fn apply_carvers(&self, _chunk: &ChunkAccess) {}

    /// Places features such as trees and ores.
    fn apply_biome_decorations(&self, _chunk: &ChunkAccess) {}
}

#[allow(missing_docs)]
#[enum_dispatch(ChunkGenerator)]
pub enum ChunkGeneratorType {
    Flat(FlatChunkGenerator),
}
