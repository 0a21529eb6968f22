//! Per-chunk generation state shared between the chunk map, generation tasks and workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chunkgen_utils::ChunkPos;
use parking_lot::{Mutex, RwLock};

use crate::chunk::chunk_access::{ChunkAccess, ChunkStatus};
use crate::chunk::chunk_generation_task::{GenerationTaskHandle, StaticCache2D};
use crate::chunk::chunk_map::GeneratingChunkMap;
use crate::chunk::chunk_pyramid::ChunkStep;
use crate::chunk::chunk_result::{
    ChunkResult, ChunkStepFuture, UNLOADED_CHUNK, completed_future, get_now,
};
use crate::chunk::level_chunk::LevelChunk;

/// Holds a chunk and the futures for each status it has been asked to reach.
///
/// A status is started at most once per holder, unless its step failed. Every task
/// that needs the same status of the same chunk gets a clone of the same future.
pub struct ChunkHolder {
    pos: ChunkPos,
    chunk: RwLock<Option<Arc<ChunkAccess>>>,
    /// One slot per status. A slot stays locked while its step is being started.
    futures: [Mutex<Option<ChunkStepFuture>>; ChunkStatus::COUNT],
    highest_allowed_status: RwLock<Option<ChunkStatus>>,
    generation_ref_count: AtomicUsize,
    tasks: Mutex<Vec<Arc<GenerationTaskHandle>>>,
}

impl ChunkHolder {
    /// Creates a holder with no chunk data that may progress up to [`ChunkStatus::Full`].
    #[must_use]
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            chunk: RwLock::new(None),
            futures: std::array::from_fn(|_| Mutex::new(None)),
            highest_allowed_status: RwLock::new(Some(ChunkStatus::Full)),
            generation_ref_count: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The position of the chunk.
    #[must_use]
    pub const fn get_pos(&self) -> ChunkPos {
        self.pos
    }

    /// The status of the chunk data, `None` until the chunk was loaded or created.
    #[must_use]
    pub fn persisted_status(&self) -> Option<ChunkStatus> {
        self.chunk
            .read()
            .as_ref()
            .map(|chunk| chunk.persisted_status())
    }

    /// The current chunk data, whatever status it is at.
    #[must_use]
    pub fn latest_chunk(&self) -> Option<Arc<ChunkAccess>> {
        self.chunk.read().clone()
    }

    /// The chunk, if the step to `status` has completed successfully on this holder.
    #[must_use]
    pub fn try_chunk(&self, status: ChunkStatus) -> Option<Arc<ChunkAccess>> {
        let future = self.futures[status.get_index()].lock().clone()?;
        match get_now(&future)? {
            ChunkResult::Success(_) => self.latest_chunk(),
            ChunkResult::Fail(_) => None,
        }
    }

    /// Stores freshly loaded or created chunk data.
    ///
    /// Does not complete any future; the step that inserted the chunk does that
    /// when it returns.
    pub fn insert_chunk(&self, chunk: ChunkAccess) {
        *self.chunk.write() = Some(Arc::new(chunk));
    }

    /// Replaces the proto chunk with its level chunk.
    ///
    /// # Errors
    /// Returns an error if the holder has no chunk.
    pub fn upgrade_to_full(&self) -> anyhow::Result<()> {
        let mut chunk = self.chunk.write();
        let Some(current) = chunk.as_ref() else {
            anyhow::bail!("Chunk {} has no data to upgrade", self.pos);
        };
        if let ChunkAccess::Proto(proto) = &**current {
            *chunk = Some(Arc::new(ChunkAccess::Full(LevelChunk::from_proto(proto))));
        }
        Ok(())
    }

    /// Starts the step to `step.target_status` unless it was already started, and returns
    /// the future for that status.
    ///
    /// Concurrent callers for the same status all get the future of the first one.
    /// A step that failed is started again by the next caller.
    ///
    /// A status above [`Self::highest_allowed_status`] fails immediately with
    /// [`UNLOADED_CHUNK`].
    pub fn apply_step(
        self: &Arc<Self>,
        step: &'static ChunkStep,
        map: &dyn GeneratingChunkMap,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    ) -> ChunkStepFuture {
        let status = step.target_status;
        if self.is_status_disallowed(status) {
            return completed_future(ChunkResult::fail(UNLOADED_CHUNK));
        }

        // The map only reads lower slots of this holder while starting the step, so
        // holding this slot's lock across the call cannot deadlock.
        let mut slot = self.futures[status.get_index()].lock();
        if let Some(future) = slot.as_ref() {
            match get_now(future) {
                Some(ChunkResult::Fail(err)) => {
                    log::debug!("Retrying failed step of {} to {status}: {err}", self.pos);
                }
                _ => return future.clone(),
            }
        }

        let future = map.apply_step(self.clone(), step, cache);
        *slot = Some(future.clone());
        future
    }

    /// Returns true if this holder may not reach `status`.
    #[must_use]
    pub fn is_status_disallowed(&self, status: ChunkStatus) -> bool {
        self.highest_allowed_status()
            .is_none_or(|highest| status.is_after(highest))
    }

    /// The highest status this holder may reach, `None` once it is being unloaded.
    #[must_use]
    pub fn highest_allowed_status(&self) -> Option<ChunkStatus> {
        *self.highest_allowed_status.read()
    }

    /// Changes the highest status this holder may reach. Registered tasks aiming
    /// above it are cancelled.
    pub fn set_highest_allowed_status(&self, status: Option<ChunkStatus>) {
        *self.highest_allowed_status.write() = status;
        for task in self.tasks.lock().iter() {
            if status.is_none_or(|highest| task.target_status().is_after(highest)) {
                task.mark_for_cancellation();
            }
        }
    }

    /// Called once per generation task that caches this holder.
    pub fn increase_generation_ref_count(&self) {
        self.generation_ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Called once when such a task finishes. Returns the remaining count.
    pub fn decrease_generation_ref_count(&self) -> usize {
        match self
            .generation_ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            }) {
            Ok(previous) => previous - 1,
            Err(_) => {
                log::error!("Generation ref count of {} released below zero", self.pos);
                0
            }
        }
    }

    /// Number of generation tasks currently holding this chunk.
    #[must_use]
    pub fn generation_ref_count(&self) -> usize {
        self.generation_ref_count.load(Ordering::Acquire)
    }

    /// Registers a task targeting this chunk.
    pub fn add_task(&self, task: Arc<GenerationTaskHandle>) {
        self.tasks.lock().push(task);
    }

    /// Forgets a task targeting this chunk.
    pub fn remove_task(&self, task: &Arc<GenerationTaskHandle>) {
        self.tasks.lock().retain(|t| !Arc::ptr_eq(t, task));
    }

    /// A live registered task whose target is at or after `status`.
    #[must_use]
    pub fn covering_task(&self, status: ChunkStatus) -> Option<Arc<GenerationTaskHandle>> {
        self.tasks
            .lock()
            .iter()
            .find(|task| !task.is_cancelled() && task.target_status().is_or_after(status))
            .cloned()
    }

    /// Cancels every registered task, superseded by a new task to `target`.
    /// Returns how many were still live.
    pub fn cancel_tasks(&self, target: ChunkStatus) -> usize {
        let tasks = self.tasks.lock();
        let mut cancelled = 0;
        for old in tasks.iter().filter(|task| !task.is_cancelled()) {
            log::debug!(
                "Task for {} to {} superseded by a task to {}",
                self.pos,
                old.target_status(),
                target
            );
            old.mark_for_cancellation();
            cancelled += 1;
        }
        cancelled
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}
