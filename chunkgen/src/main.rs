//! Pregenerates the chunks around the origin of a flat world.
//!
//! Usage: `chunkgen [config.json]`. Without an argument `chunkgen.json` is read
//! if it exists.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use chunkgen_core::chunk::chunk_generator::ChunkGeneratorType;
use chunkgen_core::chunk::chunk_map::ChunkMap;
use chunkgen_core::chunk::chunk_storage::MemoryChunkStorage;
use chunkgen_core::chunk::flat_chunk_generator::FlatChunkGenerator;
use chunkgen_core::chunk::world_gen_context::WorldGenContext;

use crate::config::{ChunkGenConfig, DEFAULT_CONFIG_PATH};

mod config;
mod logger;
mod spawn_progress;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = ChunkGenConfig::load(&path)?;
    let logger = logger::init(config.log_level()?)?;

    let storage = Arc::new(MemoryChunkStorage::new());
    let context = WorldGenContext::new(
        ChunkGeneratorType::Flat(FlatChunkGenerator::new(config.surface_height)),
        storage.clone(),
        config.min_y,
        config.height,
        config.worker_threads,
    )
    .context("Failed to create the chunk worker pool")?;
    let map = ChunkMap::new(context);

    spawn_progress::generate_spawn_chunks(&map, &config, logger).await;

    let saved = map.save_all()?;
    log::info!("Saved {saved} chunks, {} in storage", storage.len());
    Ok(())
}
