//! This module contains the `WorldGenContext` struct, which is used to provide context for chunk generation.

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::chunk::chunk_generator::ChunkGeneratorType;
use crate::chunk::chunk_storage::ChunkStorage;

/// Context for world generation.
pub struct WorldGenContext {
    /// The chunk generator to use.
    pub generator: Arc<ChunkGeneratorType>,
    /// Where chunks are loaded from and saved to.
    pub storage: Arc<dyn ChunkStorage>,
    min_y: i32,
    height: i32,
    pool: ThreadPool,
}

impl WorldGenContext {
    /// Creates a context with its own worker pool. `worker_threads == 0` lets rayon pick.
    ///
    /// # Errors
    /// Returns an error if the worker pool cannot be built.
    pub fn new(
        generator: ChunkGeneratorType,
        storage: Arc<dyn ChunkStorage>,
        min_y: i32,
        height: i32,
        worker_threads: usize,
    ) -> anyhow::Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("Chunk Worker - {index}"))
            .panic_handler(|_| log::error!("A chunk generation step panicked"))
            .build()?;

        Ok(Self {
            generator: Arc::new(generator),
            storage,
            min_y,
            height,
            pool,
        })
    }

    /// The lowest block y of the world.
    #[must_use]
    pub const fn min_y(&self) -> i32 {
        self.min_y
    }

    /// The height of the world in blocks.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// Number of 16 block sections in a chunk.
    #[must_use]
    pub const fn section_count(&self) -> usize {
        (self.height / 16) as usize
    }

    /// The pool stage tasks run on.
    #[must_use]
    pub const fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}
