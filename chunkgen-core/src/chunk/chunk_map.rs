//! The chunk map manages chunk loading, generation and unloading.
//!
//! Holders live in a concurrent map keyed by position. Generation tasks are
//! queued by [`ChunkMap::schedule_generation_task`] and advanced on every
//! [`ChunkMap::tick`], while their stage work runs on the worker pool.

use std::mem;
use std::sync::Arc;

use chunkgen_utils::ChunkPos;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::chunk::chunk_access::{ChunkAccess, ChunkStatus};
use crate::chunk::chunk_generation_task::{
    ChunkGenerationTask, GenerationTaskHandle, StaticCache2D,
};
use crate::chunk::chunk_holder::ChunkHolder;
use crate::chunk::chunk_pyramid::ChunkStep;
use crate::chunk::chunk_result::{ChunkResult, ChunkStepFuture, completed_future, get_now};
use crate::chunk::world_gen_context::WorldGenContext;

/// What a generation task needs from the map that owns its chunks.
pub trait GeneratingChunkMap: Send + Sync {
    /// Returns the holder at `pos`, creating it if needed, and counts one more
    /// task depending on it.
    fn acquire_generation(&self, pos: ChunkPos) -> Arc<ChunkHolder>;

    /// Undoes one [`Self::acquire_generation`].
    fn release_generation(&self, holder: &ChunkHolder);

    /// Starts `step` for `holder` and returns the future of its result.
    fn apply_step(
        &self,
        holder: Arc<ChunkHolder>,
        step: &'static ChunkStep,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    ) -> ChunkStepFuture;
}

/// A task together with the future it is waiting for.
struct RunningTask {
    task: ChunkGenerationTask,
    waiting: Option<ChunkStepFuture>,
}

/// Owns the chunk holders of a world and drives their generation.
///
/// Tasks are advanced by [`Self::tick`]; stage work runs on the worker pool of the
/// [`WorldGenContext`].
///
/// Tasks keep the map alive. Let every scheduled task finish, or [`Self::unload`]
/// its chunks and keep ticking, before dropping the map.
pub struct ChunkMap {
    chunks: scc::HashMap<ChunkPos, Arc<ChunkHolder>>,
    pending_generation_tasks: Mutex<Vec<ChunkGenerationTask>>,
    running_generation_tasks: Mutex<Vec<RunningTask>>,
    world_gen_context: Arc<WorldGenContext>,
}

impl ChunkMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new(world_gen_context: WorldGenContext) -> Arc<Self> {
        Arc::new(Self {
            chunks: scc::HashMap::new(),
            pending_generation_tasks: Mutex::new(Vec::new()),
            running_generation_tasks: Mutex::new(Vec::new()),
            world_gen_context: Arc::new(world_gen_context),
        })
    }

    /// The generation context.
    #[must_use]
    pub const fn world_gen_context(&self) -> &Arc<WorldGenContext> {
        &self.world_gen_context
    }

    /// Creates a task bringing `pos` to `status` and queues it for the next tick.
    pub fn schedule_generation_task(
        self: &Arc<Self>,
        status: ChunkStatus,
        pos: ChunkPos,
    ) -> Arc<GenerationTaskHandle> {
        let task = ChunkGenerationTask::create(self.clone(), status, pos);
        let handle = task.handle().clone();
        log::debug!("Scheduled generation of {pos} to {status}");
        self.pending_generation_tasks.lock().push(task);
        handle
    }

    /// Makes sure `pos` is on its way to `status`.
    ///
    /// A live task already aiming at `status` or later is reused. Otherwise a new
    /// task is scheduled and the ones it supersedes are cancelled.
    pub fn schedule_chunk_generation(
        self: &Arc<Self>,
        pos: ChunkPos,
        status: ChunkStatus,
    ) -> Arc<GenerationTaskHandle> {
        if let Some(holder) = self.chunks.read_sync(&pos, |_, holder| holder.clone()) {
            if let Some(task) = holder.covering_task(status) {
                return task;
            }
            holder.cancel_tasks(status);
        }
        self.schedule_generation_task(status, pos)
    }

    /// Starts queued tasks and advances every task whose wait is over.
    pub fn run_generation_tasks(&self) {
        let new_tasks = mem::take(&mut *self.pending_generation_tasks.lock());
        let mut running = self.running_generation_tasks.lock();
        running.extend(
            new_tasks
                .into_iter()
                .map(|task| RunningTask { task, waiting: None }),
        );

        running.retain_mut(|entry| {
            if let Some(waiting) = &entry.waiting
                && get_now(waiting).is_none()
            {
                return true;
            }
            entry.waiting = entry.task.run_until_wait();
            entry.waiting.is_some()
        });
    }

    /// Advances generation, then drops unloaded chunks no task depends on anymore.
    ///
    /// Modified chunks are saved before they are dropped. A chunk that fails to save
    /// stays loaded and is retried on the next tick.
    pub fn tick(&self) {
        self.run_generation_tasks();

        let storage = &self.world_gen_context.storage;
        self.chunks.retain_sync(|pos, holder| {
            if holder.highest_allowed_status().is_some() || holder.generation_ref_count() > 0 {
                return true;
            }
            let Some(chunk) = holder.latest_chunk() else {
                return false;
            };
            if !chunk.is_dirty() {
                return false;
            }
            match storage.save(*pos, chunk.to_saved()) {
                Ok(()) => {
                    log::trace!("Saved and unloaded chunk {pos}");
                    false
                }
                Err(err) => {
                    chunk.mark_dirty();
                    log::error!("Failed to save chunk {pos}: {err:#}");
                    true
                }
            }
        });
    }

    /// Stops `pos` from progressing any further and cancels the tasks targeting it.
    ///
    /// The holder is dropped by [`Self::tick`] once no task depends on it.
    /// Returns false if the chunk is not loaded.
    pub fn unload(&self, pos: ChunkPos) -> bool {
        self.chunks
            .read_sync(&pos, |_, holder| holder.set_highest_allowed_status(None))
            .is_some()
    }

    /// Saves every loaded chunk. Returns how many were written.
    ///
    /// # Errors
    /// Returns the first storage error.
    pub fn save_all(&self) -> anyhow::Result<usize> {
        let mut chunks = Vec::new();
        self.chunks.retain_sync(|pos, holder| {
            if let Some(chunk) = holder.latest_chunk() {
                chunks.push((*pos, chunk));
            }
            true
        });

        for (pos, chunk) in &chunks {
            self.world_gen_context.storage.save(*pos, chunk.to_saved())?;
        }
        log::debug!("Saved {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// The status of the chunk data at `pos`, if loaded.
    #[must_use]
    pub fn persisted_status(&self, pos: ChunkPos) -> Option<ChunkStatus> {
        self.chunks
            .read_sync(&pos, |_, holder| holder.persisted_status())
            .flatten()
    }

    /// The chunk data at `pos`, if loaded.
    #[must_use]
    pub fn chunk(&self, pos: ChunkPos) -> Option<Arc<ChunkAccess>> {
        self.chunks
            .read_sync(&pos, |_, holder| holder.latest_chunk())
            .flatten()
    }

    /// Number of tasks depending on the chunk at `pos`.
    #[must_use]
    pub fn generation_ref_count(&self, pos: ChunkPos) -> usize {
        self.chunks
            .read_sync(&pos, |_, holder| holder.generation_ref_count())
            .unwrap_or(0)
    }

    /// Number of loaded holders.
    #[must_use]
    pub fn loaded_chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of tasks waiting for their first tick.
    #[must_use]
    pub fn pending_task_count(&self) -> usize {
        self.pending_generation_tasks.lock().len()
    }

    /// Number of started tasks that have not terminated.
    #[must_use]
    pub fn running_task_count(&self) -> usize {
        self.running_generation_tasks.lock().len()
    }
}

impl GeneratingChunkMap for ChunkMap {
    fn acquire_generation(&self, pos: ChunkPos) -> Arc<ChunkHolder> {
        let entry = self
            .chunks
            .entry_sync(pos)
            .or_insert_with(|| Arc::new(ChunkHolder::new(pos)));
        let holder = entry.get().clone();
        // Counted before the entry is released so `tick` cannot drop the holder in between.
        holder.increase_generation_ref_count();
        holder
    }

    fn release_generation(&self, holder: &ChunkHolder) {
        holder.decrease_generation_ref_count();
    }

    fn apply_step(
        &self,
        holder: Arc<ChunkHolder>,
        step: &'static ChunkStep,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    ) -> ChunkStepFuture {
        let status = step.target_status;
        let pos = holder.get_pos();

        if let Some(parent) = status.get_parent()
            && holder.try_chunk(parent).is_none()
        {
            log::error!("Chunk {pos} is not at {parent} before stepping to {status}");
            return completed_future(ChunkResult::fail(format!(
                "Chunk {pos} is not at {parent}"
            )));
        }

        let (sender, receiver) = oneshot::channel();
        let context = self.world_gen_context.clone();
        let cache = cache.clone();
        self.world_gen_context.pool().spawn(move || {
            let result = match step.apply(context, &cache, holder) {
                Ok(chunk) => ChunkResult::success(chunk),
                Err(err) => {
                    log::warn!("Failed to step chunk {pos} to {status}: {err:#}");
                    ChunkResult::fail(format!("{err:#}"))
                }
            };
            // The receiver may already be gone if the holder was dropped.
            let _ = sender.send(result);
        });

        receiver
            .map(|result| {
                result.unwrap_or_else(|_| ChunkResult::fail("Generation worker dropped"))
            })
            .boxed()
            .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_generator::ChunkGeneratorType;
    use crate::chunk::chunk_storage::MemoryChunkStorage;
    use crate::chunk::flat_chunk_generator::FlatChunkGenerator;

    fn test_map() -> Arc<ChunkMap> {
        let context = WorldGenContext::new(
            ChunkGeneratorType::Flat(FlatChunkGenerator::new(4)),
            Arc::new(MemoryChunkStorage::new()),
            0,
            16,
            1,
        )
        .unwrap();
        ChunkMap::new(context)
    }

    #[test]
    fn test_acquire_and_release() {
        let map = test_map();
        let pos = ChunkPos::new(5, 5);
        let first = map.acquire_generation(pos);
        let second = map.acquire_generation(pos);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(map.generation_ref_count(pos), 2);
        assert_eq!(map.loaded_chunk_count(), 1);

        map.release_generation(&first);
        map.release_generation(&second);
        assert_eq!(map.generation_ref_count(pos), 0);
    }

    #[test]
    fn test_step_without_parent_fails() {
        let map = test_map();
        let holder = map.acquire_generation(ChunkPos::new(0, 0));
        let cache = Arc::new(StaticCache2D::create(0, 0, 0, |_, _| holder.clone()));
        let step = crate::chunk::chunk_pyramid::GENERATION_PYRAMID.get_step_to(ChunkStatus::Noise);

        let result = get_now(&map.apply_step(holder.clone(), step, &cache)).unwrap();
        assert!(!result.is_success());
        assert!(holder.latest_chunk().is_none());
    }

    #[test]
    fn test_unload_marks_holder() {
        let map = test_map();
        assert!(!map.unload(ChunkPos::new(1, 1)));

        let holder = map.acquire_generation(ChunkPos::new(1, 1));
        assert!(map.unload(ChunkPos::new(1, 1)));
        assert!(holder.is_status_disallowed(ChunkStatus::Empty));

        // Still referenced, so it survives the tick.
        map.tick();
        assert_eq!(map.loaded_chunk_count(), 1);

        map.release_generation(&holder);
        map.tick();
        assert_eq!(map.loaded_chunk_count(), 0);
    }

    #[test]
    fn test_reschedule_reuses_covering_task() {
        let map = test_map();
        let pos = ChunkPos::new(0, 0);
        let noise = map.schedule_chunk_generation(pos, ChunkStatus::Noise);
        let biomes = map.schedule_chunk_generation(pos, ChunkStatus::Biomes);
        assert!(Arc::ptr_eq(&noise, &biomes));
        assert_eq!(map.pending_task_count(), 1);

        let full = map.schedule_chunk_generation(pos, ChunkStatus::Full);
        assert!(noise.is_cancelled());
        assert!(!full.is_cancelled());
        assert_eq!(map.pending_task_count(), 2);

        map.run_generation_tasks();
        assert_eq!(map.pending_task_count(), 0);
    }
}
