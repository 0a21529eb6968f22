#![allow(missing_docs)]

use std::sync::Arc;

use anyhow::anyhow;

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus},
    chunk_generation_task::StaticCache2D,
    chunk_generator::ChunkGenerator,
    chunk_holder::ChunkHolder,
    chunk_pyramid::ChunkStep,
    proto_chunk::ProtoChunk,
    world_gen_context::WorldGenContext,
};

pub struct ChunkStatusTasks;

/// Fetches the chunk of `holder` at the status right before `step`.
fn parent_chunk(holder: &ChunkHolder, step: &ChunkStep) -> anyhow::Result<Arc<ChunkAccess>> {
    let parent = step
        .target_status
        .get_parent()
        .ok_or_else(|| anyhow!("{} has no parent status", step.target_status))?;
    holder
        .try_chunk(parent)
        .ok_or_else(|| anyhow!("Chunk {} not found at status {parent}", holder.get_pos()))
}

/// All these functions are blocking.
impl ChunkStatusTasks {
    /// Loads the chunk from storage, or creates an empty one.
    pub fn empty(
        context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let pos = holder.get_pos();
        let proto_chunk = match context.storage.load(pos)? {
            Some(saved) => {
                log::trace!("Loaded chunk {pos} at {}", saved.status);
                ProtoChunk::from_saved(pos, saved, context.min_y(), context.height())
            }
            None => ProtoChunk::new(pos, context.min_y(), context.height()),
        };

        holder.insert_chunk(ChunkAccess::Proto(proto_chunk));
        Ok(())
    }

    pub fn generate_structure_starts(
        context: Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let chunk = parent_chunk(&holder, step)?;
        context.generator.create_structures(&chunk);
        Ok(())
    }

    pub fn generate_structure_references(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        _holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    pub fn load_structure_starts(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        _holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    pub fn generate_biomes(
        context: Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let chunk = parent_chunk(&holder, step)?;
        context.generator.create_biomes(&chunk);
        Ok(())
    }

    pub fn generate_noise(
        context: Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let chunk = parent_chunk(&holder, step)?;
        context.generator.fill_from_noise(&chunk);
        Ok(())
    }

    pub fn generate_surface(
        context: Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let chunk = parent_chunk(&holder, step)?;
        context.generator.build_surface(&chunk);
        Ok(())
    }

    pub fn generate_carvers(
        context: Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let chunk = parent_chunk(&holder, step)?;
        context.generator.apply_carvers(&chunk);
        Ok(())
    }

    /// Decorates the chunk. Neighbours within the write radius are at
    /// [`ChunkStatus::Carvers`] or later.
    pub fn generate_features(
        context: Arc<WorldGenContext>,
        step: &ChunkStep,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        let pos = holder.get_pos();
        let radius = step.block_state_write_radius;
        for x in pos.x() - radius..=pos.x() + radius {
            for z in pos.z() - radius..=pos.z() + radius {
                let neighbour = cache
                    .try_get(x, z)
                    .ok_or_else(|| anyhow!("Chunk ({x}, {z}) is outside the cache of {pos}"))?;
                if neighbour.try_chunk(ChunkStatus::Carvers).is_none() {
                    anyhow::bail!("Neighbour {} of {pos} is not carved", neighbour.get_pos());
                }
            }
        }

        let chunk = parent_chunk(&holder, step)?;
        context.generator.apply_biome_decorations(&chunk);
        Ok(())
    }

    pub fn initialize_light(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        _holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    pub fn light(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        _holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    pub fn generate_spawn(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        _holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    pub fn full(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        holder.upgrade_to_full()?;
        log::trace!("Chunk {} upgraded to full", holder.get_pos());
        Ok(())
    }

    /// Steps that only move the status forward.
    pub fn pass_through(
        _context: Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        _holder: Arc<ChunkHolder>,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
