//! A generator producing flat terrain.

use crate::chunk::chunk_access::ChunkAccess;
use crate::chunk::chunk_generator::ChunkGenerator;
use crate::chunk::proto_chunk::COLUMN_COUNT;

/// Generates the same column everywhere: stone up to one block below
/// `surface_height`, then a single surface block.
#[derive(Debug, Clone, Copy)]
pub struct FlatChunkGenerator {
    surface_height: i32,
}

impl FlatChunkGenerator {
    /// Creates a generator whose terrain tops out at `surface_height`.
    #[must_use]
    pub const fn new(surface_height: i32) -> Self {
        Self { surface_height }
    }

    /// The height of every column once the surface is built.
    #[must_use]
    pub const fn surface_height(&self) -> i32 {
        self.surface_height
    }
}

impl ChunkGenerator for FlatChunkGenerator {
    fn fill_from_noise(&self, chunk: &ChunkAccess) {
        let Some(proto) = chunk.as_proto() else {
            return;
        };
        for index in 0..COLUMN_COUNT {
            proto.set_height(index & 15, index >> 4, self.surface_height - 1);
        }
    }

    fn build_surface(&self, chunk: &ChunkAccess) {
        let Some(proto) = chunk.as_proto() else {
            return;
        };
        for index in 0..COLUMN_COUNT {
            let (x, z) = (index & 15, index >> 4);
            if proto.get_height(x, z) > proto.min_y() {
                proto.set_height(x, z, proto.get_height(x, z) + 1);
            }
        }
    }
}
