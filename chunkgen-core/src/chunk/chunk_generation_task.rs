//! Brings one chunk, and the neighbourhood it depends on, to a target status.
//!
//! A [`ChunkGenerationTask`] works layer by layer: every chunk that must reach
//! a status is scheduled before the next status is attempted. The task never
//! blocks. [`ChunkGenerationTask::run_until_wait`] returns the first future it
//! finds still pending, and the caller runs the task again once it resolved.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use chunkgen_utils::ChunkPos;

use crate::chunk::chunk_access::ChunkStatus;
use crate::chunk::chunk_holder::ChunkHolder;
use crate::chunk::chunk_map::GeneratingChunkMap;
use crate::chunk::chunk_pyramid::{ChunkPyramid, GENERATION_PYRAMID, LOADING_PYRAMID};
use crate::chunk::chunk_result::{ChunkStepFuture, get_now};

/// A square grid of values around a center, filled once on creation.
pub struct StaticCache2D<T> {
    min_x: i32,
    min_z: i32,
    radius: usize,
    size: usize,
    cache: Box<[T]>,
}

impl<T> StaticCache2D<T> {
    /// Calls `factory` exactly once for every `(x, z)` within `radius` (chessboard) of the
    /// center, x outer and z inner.
    ///
    /// # Panics
    /// Panics if the radius does not fit the coordinate range.
    pub fn create<F>(center_x: i32, center_z: i32, radius: usize, mut factory: F) -> Self
    where
        F: FnMut(i32, i32) -> T,
    {
        let offset = i32::try_from(radius).expect("cache radius out of range");
        let size = radius * 2 + 1;
        let min_x = center_x - offset;
        let min_z = center_z - offset;

        let mut cache = Vec::with_capacity(size * size);
        for x in min_x..=center_x + offset {
            for z in min_z..=center_z + offset {
                cache.push(factory(x, z));
            }
        }

        Self {
            min_x,
            min_z,
            radius,
            size,
            cache: cache.into_boxed_slice(),
        }
    }

    fn index_of(&self, x: i32, z: i32) -> Option<usize> {
        let dx = usize::try_from(x - self.min_x).ok()?;
        let dz = usize::try_from(z - self.min_z).ok()?;
        (dx < self.size && dz < self.size).then_some(dx * self.size + dz)
    }

    /// The value at `(x, z)`.
    ///
    /// # Panics
    /// Panics if `(x, z)` lies outside the cache.
    #[must_use]
    pub fn get(&self, x: i32, z: i32) -> &T {
        let Some(index) = self.index_of(x, z) else {
            panic!(
                "Requested position ({x}, {z}) is out of cache range around ({}, {}) with radius {}",
                self.center_x(),
                self.center_z(),
                self.radius
            );
        };
        &self.cache[index]
    }

    /// The value at `(x, z)`, `None` outside the cache.
    #[must_use]
    pub fn try_get(&self, x: i32, z: i32) -> Option<&T> {
        self.index_of(x, z).map(|index| &self.cache[index])
    }

    /// Visits every value.
    pub fn for_each<F: FnMut(&T)>(&self, consumer: F) {
        self.cache.iter().for_each(consumer);
    }

    /// The chessboard radius of the cache.
    #[must_use]
    pub const fn radius(&self) -> usize {
        self.radius
    }

    /// Center x.
    #[must_use]
    pub const fn center_x(&self) -> i32 {
        self.min_x + self.radius as i32
    }

    /// Center z.
    #[must_use]
    pub const fn center_z(&self) -> i32 {
        self.min_z + self.radius as i32
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Always false, a cache holds at least its center.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

const RUNNING: u8 = 0;
const SUCCEEDED: u8 = 1;
const CANCELLED: u8 = 2;

/// The part of a generation task other threads may see.
///
/// Registered on the center chunk's holder, so the map can cancel a task it
/// does not drive itself.
pub struct GenerationTaskHandle {
    pos: ChunkPos,
    target_status: ChunkStatus,
    cancelled: AtomicBool,
    state: AtomicU8,
}

impl GenerationTaskHandle {
    /// Creates the handle of a running task.
    #[must_use]
    pub const fn new(pos: ChunkPos, target_status: ChunkStatus) -> Self {
        Self {
            pos,
            target_status,
            cancelled: AtomicBool::new(false),
            state: AtomicU8::new(RUNNING),
        }
    }

    /// The chunk the task generates.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The status the task brings its chunk to.
    #[must_use]
    pub const fn target_status(&self) -> ChunkStatus {
        self.target_status
    }

    /// Asks the task to stop. It stops after the layer in flight has drained.
    pub fn mark_for_cancellation(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns true once the task terminated and released its chunks.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    /// Returns true if the task terminated after reaching its target.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state.load(Ordering::Acquire) == SUCCEEDED
    }

    fn finish(&self, success: bool) {
        let state = if success { SUCCEEDED } else { CANCELLED };
        self.state.store(state, Ordering::Release);
    }
}

impl fmt::Debug for GenerationTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationTaskHandle")
            .field("pos", &self.pos)
            .field("target_status", &self.target_status)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Drives one chunk to a target status.
///
/// Owned and run by a single driver. Every chunk of the cache is acquired from
/// the map on creation and released exactly once when the task terminates.
pub struct ChunkGenerationTask {
    map: Arc<dyn GeneratingChunkMap>,
    pos: ChunkPos,
    target_status: ChunkStatus,
    handle: Arc<GenerationTaskHandle>,
    cache: Arc<StaticCache2D<Arc<ChunkHolder>>>,
    center: Arc<ChunkHolder>,
    scheduled_status: Option<ChunkStatus>,
    needs_generation: bool,
    /// Set once a step failed or a layer was cut short.
    interrupted: bool,
    scheduled_layer: Vec<ChunkStepFuture>,
}

impl ChunkGenerationTask {
    /// Creates a task and acquires every chunk it could need.
    ///
    /// The cache covers the generation radius of [`ChunkStatus::Empty`], the worst case, so
    /// no later layer reaches outside it.
    #[must_use]
    pub fn create(
        map: Arc<dyn GeneratingChunkMap>,
        target_status: ChunkStatus,
        pos: ChunkPos,
    ) -> Self {
        let radius = GENERATION_PYRAMID
            .get_step_to(target_status)
            .get_accumulated_radius_of(ChunkStatus::Empty);
        let cache = StaticCache2D::create(pos.x(), pos.z(), radius, |x, z| {
            map.acquire_generation(ChunkPos::new(x, z))
        });
        let center = cache.get(pos.x(), pos.z()).clone();

        let handle = Arc::new(GenerationTaskHandle::new(pos, target_status));
        center.add_task(handle.clone());

        Self {
            map,
            pos,
            target_status,
            handle,
            cache: Arc::new(cache),
            center,
            scheduled_status: None,
            needs_generation: false,
            interrupted: false,
            scheduled_layer: Vec::new(),
        }
    }

    /// Schedules layers until one of them has to be waited for.
    ///
    /// Returns the pending future to wait for, or `None` once the task terminated,
    /// successfully or cancelled. Calling it again at any time is safe.
    pub fn run_until_wait(&mut self) -> Option<ChunkStepFuture> {
        if self.handle.is_finished() {
            return None;
        }

        loop {
            if let Some(future) = self.wait_for_scheduled_layer() {
                return Some(future);
            }

            let reached = self.scheduled_status == Some(self.target_status);
            if reached || self.handle.is_cancelled() {
                self.release_claim(reached && !self.interrupted);
                return None;
            }

            self.schedule_next_layer();
        }
    }

    /// Requests cancellation. The task still drains the layer in flight.
    pub fn mark_for_cancellation(&self) {
        self.handle.mark_for_cancellation();
    }

    /// The holder of the chunk this task generates.
    #[must_use]
    pub const fn center(&self) -> &Arc<ChunkHolder> {
        &self.center
    }

    /// The position of the chunk this task generates.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The status this task brings its chunk to.
    #[must_use]
    pub const fn target_status(&self) -> ChunkStatus {
        self.target_status
    }

    /// The last status a layer was scheduled for.
    #[must_use]
    pub const fn scheduled_status(&self) -> Option<ChunkStatus> {
        self.scheduled_status
    }

    /// Returns true once the saved data turned out to be insufficient.
    #[must_use]
    pub const fn needs_generation(&self) -> bool {
        self.needs_generation
    }

    /// The handle shared with the center holder.
    #[must_use]
    pub const fn handle(&self) -> &Arc<GenerationTaskHandle> {
        &self.handle
    }

    /// The chunks acquired by this task.
    #[must_use]
    pub const fn cache(&self) -> &Arc<StaticCache2D<Arc<ChunkHolder>>> {
        &self.cache
    }

    fn schedule_next_layer(&mut self) {
        let scheduled = self.scheduled_status;
        let next = match scheduled {
            None => ChunkStatus::Empty,
            Some(ChunkStatus::Empty)
                if !self.needs_generation && !self.can_load_without_generation() =>
            {
                log::trace!(
                    "Chunk {} cannot reach {} from saved data, generating",
                    self.pos,
                    self.target_status
                );
                self.needs_generation = true;
                ChunkStatus::Empty
            }
            Some(status) => status
                .next()
                .expect("scheduled status is always before the target"),
        };

        self.schedule_layer(next);
        self.scheduled_status = Some(next);
    }

    fn can_load_without_generation(&self) -> bool {
        if self.target_status == ChunkStatus::Empty {
            return true;
        }

        let Some(persisted) = self.center.persisted_status() else {
            return false;
        };
        if persisted.is_before(self.target_status) {
            return false;
        }

        let dependencies = &LOADING_PYRAMID
            .get_step_to(self.target_status)
            .accumulated_dependencies;
        let radius = dependencies.get_radius() as i32;
        for x in self.pos.x() - radius..=self.pos.x() + radius {
            for z in self.pos.z() - radius..=self.pos.z() + radius {
                let distance = self.pos.get_chessboard_distance(x, z) as usize;
                let required = dependencies.get(distance);
                match self.cache.get(x, z).persisted_status() {
                    Some(status) if status.is_or_after(required) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    fn pyramid(&self) -> &'static ChunkPyramid {
        if self.needs_generation {
            &GENERATION_PYRAMID
        } else {
            &LOADING_PYRAMID
        }
    }

    fn schedule_layer(&mut self, status: ChunkStatus) {
        let radius = self
            .pyramid()
            .get_step_to(self.target_status)
            .get_accumulated_radius_of(status) as i32;
        log::trace!(
            "Scheduling {} for {} chunks around {} (target {}, generating: {})",
            status,
            (radius * 2 + 1) * (radius * 2 + 1),
            self.pos,
            self.target_status,
            self.needs_generation
        );

        for x in self.pos.x() - radius..=self.pos.x() + radius {
            for z in self.pos.z() - radius..=self.pos.z() + radius {
                let holder = self.cache.get(x, z).clone();
                if self.handle.is_cancelled() || !self.schedule_chunk_in_layer(status, &holder) {
                    self.interrupted = true;
                    return;
                }
            }
        }
    }

    /// Returns false if the step failed right away.
    fn schedule_chunk_in_layer(&mut self, status: ChunkStatus, holder: &Arc<ChunkHolder>) -> bool {
        let generate = holder
            .persisted_status()
            .is_some_and(|persisted| status.is_after(persisted));
        if generate && !self.needs_generation {
            panic!(
                "Can't load chunk, but didn't expect to need to generate: {} at {:?} for {}",
                holder.get_pos(),
                holder.persisted_status(),
                status
            );
        }

        let pyramid: &'static ChunkPyramid = if generate {
            &GENERATION_PYRAMID
        } else {
            &LOADING_PYRAMID
        };
        let future = holder.apply_step(pyramid.get_step_to(status), self.map.as_ref(), &self.cache);

        match get_now(&future) {
            None => {
                self.scheduled_layer.push(future);
                true
            }
            Some(result) if result.is_success() => true,
            Some(result) => {
                log::debug!(
                    "Step to {} failed for {}: {}, cancelling task for {}",
                    status,
                    holder.get_pos(),
                    result.error().unwrap_or_default(),
                    self.pos
                );
                self.mark_for_cancellation();
                false
            }
        }
    }

    /// Drains the layer in flight, latest first. Returns the first future still pending.
    fn wait_for_scheduled_layer(&mut self) -> Option<ChunkStepFuture> {
        while let Some(future) = self.scheduled_layer.last() {
            let Some(result) = get_now(future) else {
                return Some(future.clone());
            };
            self.scheduled_layer.pop();
            if !result.is_success() {
                self.interrupted = true;
                self.mark_for_cancellation();
            }
        }
        None
    }

    fn release_claim(&mut self, success: bool) {
        self.cache
            .for_each(|holder| self.map.release_generation(holder));
        self.center.remove_task(&self.handle);
        self.handle.finish(success);

        log::debug!(
            "Generation task for {} to {} {}",
            self.pos,
            self.target_status,
            if success { "finished" } else { "cancelled" }
        );
    }
}

impl Drop for ChunkGenerationTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            log::warn!(
                "Generation task for {} dropped while running, releasing its chunks",
                self.pos
            );
            self.handle.mark_for_cancellation();
            self.release_claim(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use futures::FutureExt;
    use parking_lot::Mutex;
    use rustc_hash::{FxHashMap, FxHashSet};
    use tokio::sync::oneshot;

    use super::*;
    use crate::chunk::chunk_access::ChunkAccess;
    use crate::chunk::chunk_pyramid::ChunkStep;
    use crate::chunk::chunk_result::{ChunkResult, completed_future};
    use crate::chunk::proto_chunk::ProtoChunk;

    type StepResult = ChunkResult<Arc<ChunkAccess>>;

    struct PendingStep {
        pos: ChunkPos,
        future: ChunkStepFuture,
        sender: oneshot::Sender<StepResult>,
        result: StepResult,
    }

    /// A map whose chunks come from a table of saved statuses. Steps complete
    /// synchronously unless scripted otherwise.
    #[derive(Default)]
    struct TestChunkMap {
        saved: Mutex<FxHashMap<ChunkPos, ChunkStatus>>,
        holders: Mutex<FxHashMap<ChunkPos, Arc<ChunkHolder>>>,
        acquired: Mutex<FxHashMap<ChunkPos, usize>>,
        released: Mutex<FxHashMap<ChunkPos, usize>>,
        applied: Mutex<Vec<(ChunkPos, ChunkStatus, bool)>>,
        fail_on: Mutex<FxHashSet<(ChunkPos, ChunkStatus)>>,
        pending_on: Mutex<FxHashSet<(ChunkPos, ChunkStatus)>>,
        pending: Mutex<Vec<PendingStep>>,
        downgrade: Mutex<Option<((ChunkPos, ChunkStatus), ChunkPos)>>,
    }

    impl TestChunkMap {
        fn with_saved_square(radius: i32, status: ChunkStatus) -> Arc<Self> {
            let map = Self::default();
            {
                let mut saved = map.saved.lock();
                for x in -radius..=radius {
                    for z in -radius..=radius {
                        saved.insert(ChunkPos::new(x, z), status);
                    }
                }
            }
            Arc::new(map)
        }

        fn applied_at(&self, status: ChunkStatus) -> usize {
            self.applied
                .lock()
                .iter()
                .filter(|(_, s, _)| *s == status)
                .count()
        }

        fn generated_steps(&self) -> usize {
            self.applied.lock().iter().filter(|(_, _, g)| *g).count()
        }

        fn resolve(&self, pos: ChunkPos) {
            let mut pending = self.pending.lock();
            let index = pending
                .iter()
                .position(|step| step.pos == pos)
                .expect("no pending step at pos");
            let step = pending.remove(index);
            step.sender.send(step.result).ok();
        }

        fn assert_balanced(&self, expected_cells: usize) {
            let acquired = self.acquired.lock();
            let released = self.released.lock();
            assert_eq!(acquired.len(), expected_cells);
            assert!(acquired.values().all(|count| *count == 1));
            assert_eq!(*released, *acquired);
            assert!(
                self.holders
                    .lock()
                    .values()
                    .all(|holder| holder.generation_ref_count() == 0)
            );
        }
    }

    impl GeneratingChunkMap for TestChunkMap {
        fn acquire_generation(&self, pos: ChunkPos) -> Arc<ChunkHolder> {
            *self.acquired.lock().entry(pos).or_default() += 1;
            let holder = self
                .holders
                .lock()
                .entry(pos)
                .or_insert_with(|| Arc::new(ChunkHolder::new(pos)))
                .clone();
            holder.increase_generation_ref_count();
            holder
        }

        fn release_generation(&self, holder: &ChunkHolder) {
            *self.released.lock().entry(holder.get_pos()).or_default() += 1;
            holder.decrease_generation_ref_count();
        }

        fn apply_step(
            &self,
            holder: Arc<ChunkHolder>,
            step: &'static ChunkStep,
            _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        ) -> ChunkStepFuture {
            let pos = holder.get_pos();
            let status = step.target_status;
            let generated = ptr::eq(step, GENERATION_PYRAMID.get_step_to(status));
            self.applied.lock().push((pos, status, generated));

            if status == ChunkStatus::Empty {
                let chunk = ProtoChunk::new(pos, 0, 256);
                if let Some(saved) = self.saved.lock().get(&pos) {
                    chunk.set_persisted_status(*saved);
                }
                holder.insert_chunk(ChunkAccess::Proto(chunk));
            } else if let Some(chunk) = holder.latest_chunk()
                && let Some(proto) = chunk.as_proto()
            {
                proto.set_persisted_status(status);
            }

            if let Some((trigger, victim)) = *self.downgrade.lock()
                && trigger == (pos, status)
            {
                let victim = self.holders.lock()[&victim].clone();
                victim.insert_chunk(ChunkAccess::Proto(ProtoChunk::new(
                    victim.get_pos(),
                    0,
                    256,
                )));
            }

            let result = if self.fail_on.lock().contains(&(pos, status)) {
                ChunkResult::fail("injected failure")
            } else {
                ChunkResult::success(holder.latest_chunk().expect("chunk was inserted"))
            };

            if self.pending_on.lock().contains(&(pos, status)) {
                let (sender, receiver) = oneshot::channel();
                let future = receiver
                    .map(|r| r.unwrap_or_else(|_| ChunkResult::fail("dropped")))
                    .boxed()
                    .shared();
                self.pending.lock().push(PendingStep {
                    pos,
                    future: future.clone(),
                    sender,
                    result,
                });
                return future;
            }
            completed_future(result)
        }
    }

    fn side(radius: usize) -> usize {
        (radius * 2 + 1) * (radius * 2 + 1)
    }

    #[test]
    fn test_static_cache_calls_factory_once_per_cell() {
        let mut calls = Vec::new();
        let cache = StaticCache2D::create(10, -4, 2, |x, z| {
            calls.push((x, z));
            x * 100 + z
        });
        assert_eq!(cache.len(), 25);
        assert_eq!(calls.len(), 25);
        assert_eq!(calls[0], (8, -6));
        assert_eq!(calls[1], (8, -5));
        assert_eq!(*cache.get(12, -2), 1198);
        assert_eq!(*cache.get(10, -4), 996);
        assert_eq!(cache.try_get(13, -4), None);
        assert_eq!((cache.center_x(), cache.center_z()), (10, -4));

        let mut sum = 0;
        cache.for_each(|v| sum += v);
        assert_eq!(sum, calls.iter().map(|(x, z)| x * 100 + z).sum::<i32>());
    }

    #[test]
    #[should_panic(expected = "out of cache range")]
    fn test_static_cache_out_of_range() {
        let cache = StaticCache2D::create(0, 0, 1, |x, z| (x, z));
        let _ = cache.get(2, 0);
    }

    #[test]
    fn test_loads_saved_chunks_without_generation() {
        let map = TestChunkMap::with_saved_square(11, ChunkStatus::Full);
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Full, ChunkPos::new(0, 0));

        assert!(task.run_until_wait().is_none());
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::Full));
        assert!(!task.needs_generation());
        assert!(task.handle().is_success());
        assert_eq!(map.generated_steps(), 0);
        assert_eq!(task.center().task_count(), 0);
        map.assert_balanced(side(11));
    }

    #[test]
    fn test_every_target_loads_from_saved_data() {
        for target in ChunkStatus::ALL {
            let map = TestChunkMap::with_saved_square(11, target);
            let mut task = ChunkGenerationTask::create(map.clone(), target, ChunkPos::new(0, 0));
            assert!(task.run_until_wait().is_none());
            assert_eq!(task.scheduled_status(), Some(target));
            assert!(!task.needs_generation(), "{target} needed generation");
            assert_eq!(map.generated_steps(), 0);
            map.assert_balanced(task.cache().len());
        }
    }

    #[test]
    fn test_empty_target_finishes_on_first_run() {
        let map = TestChunkMap::with_saved_square(0, ChunkStatus::Empty);
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Empty, ChunkPos::new(0, 0));

        assert_eq!(task.cache().len(), 1);
        assert!(task.run_until_wait().is_none());
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::Empty));
        assert_eq!(map.applied.lock().len(), 1);
        map.assert_balanced(1);
    }

    #[test]
    fn test_missing_neighbour_forces_generation() {
        let map = TestChunkMap::with_saved_square(11, ChunkStatus::Full);
        map.saved.lock().remove(&ChunkPos::new(1, 0));
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Full, ChunkPos::new(0, 0));

        assert!(task.run_until_wait().is_none());
        assert!(task.needs_generation());
        assert!(task.handle().is_success());
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::Full));

        let generated: FxHashSet<ChunkPos> = map
            .applied
            .lock()
            .iter()
            .filter(|(_, status, generated)| *generated && *status != ChunkStatus::Empty)
            .map(|(pos, _, _)| *pos)
            .collect();
        assert_eq!(generated, FxHashSet::from_iter([ChunkPos::new(1, 0)]));
        // The second Empty layer covers the whole cache.
        assert_eq!(map.applied_at(ChunkStatus::Empty), side(11));
        map.assert_balanced(side(11));
    }

    #[test]
    fn test_behind_center_forces_generation() {
        let map = TestChunkMap::with_saved_square(11, ChunkStatus::Full);
        map.saved
            .lock()
            .insert(ChunkPos::new(0, 0), ChunkStatus::Features);
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Full, ChunkPos::new(0, 0));

        assert!(task.run_until_wait().is_none());
        assert!(task.needs_generation());
        assert_eq!(
            task.center().persisted_status(),
            Some(ChunkStatus::Full)
        );
        map.assert_balanced(side(11));
    }

    #[test]
    fn test_failure_cancels_rest_of_layer() {
        let map = Arc::new(TestChunkMap::default());
        // Noise needs structure starts within 9, second cell of that layer fails.
        map.fail_on
            .lock()
            .insert((ChunkPos::new(-9, -8), ChunkStatus::StructureStarts));
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Noise, ChunkPos::new(0, 0));

        assert!(task.run_until_wait().is_none());
        assert!(task.handle().is_cancelled());
        assert!(task.handle().is_finished());
        assert!(!task.handle().is_success());
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::StructureStarts));
        assert_eq!(map.applied_at(ChunkStatus::StructureStarts), 2);
        assert_eq!(map.applied_at(ChunkStatus::StructureReferences), 0);
        map.assert_balanced(side(9));
    }

    #[test]
    fn test_pending_failure_cancels_after_drain() {
        let map = Arc::new(TestChunkMap::default());
        let failing = ChunkPos::new(0, 0);
        let other = ChunkPos::new(1, 1);
        map.fail_on.lock().insert((failing, ChunkStatus::Empty));
        map.pending_on.lock().insert((failing, ChunkStatus::Empty));
        map.pending_on.lock().insert((other, ChunkStatus::Empty));
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::StructureStarts, failing);

        // Starts only need the center.
        assert_eq!(task.cache().len(), 1);
        let waiting = task.run_until_wait().expect("center is pending");
        assert!(!task.handle().is_cancelled());

        map.resolve(failing);
        assert!(get_now(&waiting).is_some());
        assert!(task.run_until_wait().is_none());
        assert!(task.handle().is_cancelled());
        assert!(!task.handle().is_success());
        map.assert_balanced(1);
    }

    #[test]
    fn test_suspends_on_latest_pending_step() {
        let map = TestChunkMap::with_saved_square(11, ChunkStatus::Full);
        let pending = [ChunkPos::new(-1, -1), ChunkPos::new(0, 0), ChunkPos::new(1, 1)];
        for pos in pending {
            map.pending_on
                .lock()
                .insert((pos, ChunkStatus::StructureStarts));
        }
        // Loading to Light covers 9 chunks up to InitializeLight.
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Light, ChunkPos::new(0, 0));

        let waiting = task.run_until_wait().expect("layer is pending");
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::StructureStarts));
        assert_eq!(map.applied_at(ChunkStatus::StructureStarts), 9);
        let latest = map.pending.lock()[2].future.clone();
        assert!(waiting.ptr_eq(&latest));

        // Running again without progress is harmless.
        let again = task.run_until_wait().expect("still pending");
        assert!(again.ptr_eq(&latest));
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::StructureStarts));

        map.resolve(ChunkPos::new(1, 1));
        let next = task.run_until_wait().expect("two still pending");
        let middle = map.pending.lock()[1].future.clone();
        assert_eq!(map.pending.lock()[1].pos, ChunkPos::new(0, 0));
        assert!(next.ptr_eq(&middle));

        map.resolve(ChunkPos::new(0, 0));
        map.resolve(ChunkPos::new(-1, -1));
        assert!(task.run_until_wait().is_none());
        assert_eq!(task.scheduled_status(), Some(ChunkStatus::Light));
        assert!(task.handle().is_success());
        assert!(!task.needs_generation());
        map.assert_balanced(side(11));
    }

    #[test]
    fn test_cache_radius_bounds_every_layer() {
        for target in ChunkStatus::ALL {
            let map = Arc::new(TestChunkMap::default());
            let mut task = ChunkGenerationTask::create(map.clone(), target, ChunkPos::new(3, -7));
            let radius = task.cache().radius();
            assert_eq!(
                radius,
                GENERATION_PYRAMID
                    .get_step_to(target)
                    .get_accumulated_radius_of(ChunkStatus::Empty)
            );
            for status in ChunkStatus::ALL.into_iter().take(target.get_index() + 1) {
                for pyramid in [&GENERATION_PYRAMID, &LOADING_PYRAMID] {
                    assert!(pyramid.get_step_to(target).get_accumulated_radius_of(status) <= radius);
                }
            }

            // Nothing is saved, so every layer uses the generation radius.
            assert!(task.run_until_wait().is_none());
            assert!(task.handle().is_success());
            assert_eq!(task.needs_generation(), target != ChunkStatus::Empty);
            map.assert_balanced(side(radius));
        }
    }

    #[test]
    fn test_external_cancellation_drains_layer() {
        let map = Arc::new(TestChunkMap::default());
        let pos = ChunkPos::new(0, 0);
        map.pending_on.lock().insert((pos, ChunkStatus::Empty));
        let mut task = ChunkGenerationTask::create(map.clone(), ChunkStatus::Noise, pos);

        assert!(task.run_until_wait().is_some());
        let handle = task.handle().clone();
        std::thread::spawn(move || handle.mark_for_cancellation())
            .join()
            .unwrap();

        // Still waiting for the launched step.
        assert!(task.run_until_wait().is_some());
        assert!(!task.handle().is_finished());

        map.resolve(pos);
        assert!(task.run_until_wait().is_none());
        assert!(task.handle().is_finished());
        assert!(!task.handle().is_success());
        assert_eq!(map.applied_at(ChunkStatus::StructureStarts), 0);
        map.assert_balanced(side(9));
    }

    #[test]
    fn test_cancelling_after_last_layer_launched_keeps_success() {
        let map = TestChunkMap::with_saved_square(0, ChunkStatus::Empty);
        let pos = ChunkPos::new(0, 0);
        map.pending_on.lock().insert((pos, ChunkStatus::Empty));
        let mut task = ChunkGenerationTask::create(map.clone(), ChunkStatus::Empty, pos);

        assert!(task.run_until_wait().is_some());
        task.mark_for_cancellation();
        map.resolve(pos);

        assert!(task.run_until_wait().is_none());
        assert!(task.handle().is_cancelled());
        assert!(task.handle().is_success());
        map.assert_balanced(1);
    }

    #[test]
    fn test_run_after_termination_releases_nothing() {
        let map = TestChunkMap::with_saved_square(1, ChunkStatus::Noise);
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Biomes, ChunkPos::new(0, 0));
        assert!(task.run_until_wait().is_none());
        assert!(task.run_until_wait().is_none());
        drop(task);
        map.assert_balanced(side(8));
    }

    #[test]
    fn test_dropping_running_task_releases_chunks() {
        let map = Arc::new(TestChunkMap::default());
        map.pending_on
            .lock()
            .insert((ChunkPos::new(0, 0), ChunkStatus::Empty));
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Biomes, ChunkPos::new(0, 0));
        assert!(task.run_until_wait().is_some());
        let center = task.center().clone();
        drop(task);
        assert_eq!(center.task_count(), 0);
        map.assert_balanced(side(8));
    }

    #[test]
    #[should_panic(expected = "Can't load chunk, but didn't expect to need to generate")]
    fn test_loading_a_chunk_that_needs_generation_panics() {
        let map = TestChunkMap::with_saved_square(11, ChunkStatus::Full);
        *map.downgrade.lock() = Some((
            (ChunkPos::new(-1, -1), ChunkStatus::StructureStarts),
            ChunkPos::new(-1, 0),
        ));
        let mut task =
            ChunkGenerationTask::create(map.clone(), ChunkStatus::Light, ChunkPos::new(0, 0));
        let _ = task.run_until_wait();
    }
}
