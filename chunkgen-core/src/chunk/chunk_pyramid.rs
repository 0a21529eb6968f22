//! Chunk steps and the pyramids that hold them.
//!
//! A [`ChunkStep`] describes how to bring one chunk to a target status: which
//! statuses its neighbours need at each chessboard distance (the dependencies)
//! and the task to run. A [`ChunkPyramid`] holds one step per status.
//!
//! Two pyramids exist. [`GENERATION_PYRAMID`] is used when a chunk has to be
//! computed; [`LOADING_PYRAMID`] when saved data can be reused, so most of its
//! steps have no neighbour requirements at all.
//!
//! Both are built by `const` evaluation, so a broken table fails the build.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::chunk::chunk_access::{ChunkAccess, ChunkStatus};
use crate::chunk::chunk_generation_task::StaticCache2D;
use crate::chunk::chunk_holder::ChunkHolder;
use crate::chunk::chunk_status_tasks::ChunkStatusTasks;
use crate::chunk::world_gen_context::WorldGenContext;

/// Upper bound for the length of a dependency table.
pub const MAX_DEPENDENCY_SIZE: usize = 16;

/// The work done for a single step. Runs on a worker thread and may block.
pub type ChunkStatusTask = fn(
    Arc<WorldGenContext>,
    &ChunkStep,
    &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    Arc<ChunkHolder>,
) -> Result<(), anyhow::Error>;

/// Minimal status required of a neighbour, by chessboard distance.
///
/// Entries never increase with distance: closer neighbours need at least as much.
#[derive(Clone, Copy)]
pub struct ChunkDependencies {
    dependency_by_radius: [ChunkStatus; MAX_DEPENDENCY_SIZE],
    size: usize,
    radius_by_dependency: [usize; ChunkStatus::COUNT],
    dependency_count: usize,
}

impl ChunkDependencies {
    const fn new(dependency_by_radius: [ChunkStatus; MAX_DEPENDENCY_SIZE], size: usize) -> Self {
        let dependency_count = if size == 0 {
            0
        } else {
            dependency_by_radius[0].get_index() + 1
        };

        let mut radius_by_dependency = [0; ChunkStatus::COUNT];
        let mut radius = 0;
        while radius < size {
            let index = dependency_by_radius[radius].get_index();
            let mut i = 0;
            while i <= index {
                radius_by_dependency[i] = radius;
                i += 1;
            }
            radius += 1;
        }

        Self {
            dependency_by_radius,
            size,
            radius_by_dependency,
            dependency_count,
        }
    }

    /// The largest distance at which a neighbour still needs `status`.
    ///
    /// # Panics
    /// Panics if `status` is after every entry of the table.
    #[must_use]
    pub const fn get_radius_of(&self, status: ChunkStatus) -> usize {
        let index = status.get_index();
        assert!(
            index < self.dependency_count,
            "Requesting a ChunkStatus that is not a dependency"
        );
        self.radius_by_dependency[index]
    }

    /// The largest distance referenced by the table.
    #[must_use]
    pub const fn get_radius(&self) -> usize {
        self.size.saturating_sub(1)
    }

    /// Number of entries.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// The status required at `distance`.
    ///
    /// # Panics
    /// Panics if `distance` is larger than [`Self::get_radius`].
    #[must_use]
    pub const fn get(&self, distance: usize) -> ChunkStatus {
        assert!(distance < self.size, "Distance out of dependency range");
        self.dependency_by_radius[distance]
    }

    /// The entries, index = distance.
    #[must_use]
    pub fn as_slice(&self) -> &[ChunkStatus] {
        &self.dependency_by_radius[..self.size]
    }
}

impl fmt::Debug for ChunkDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// How to bring a chunk to [`ChunkStep::target_status`].
#[derive(Clone, Copy)]
pub struct ChunkStep {
    /// The status the chunk has after this step.
    pub target_status: ChunkStatus,
    /// What this step alone needs from neighbours.
    pub direct_dependencies: ChunkDependencies,
    /// What this step and every step before it need from neighbours.
    pub accumulated_dependencies: ChunkDependencies,
    /// How far away this step may write blocks, `-1` if it only writes its own chunk.
    pub block_state_write_radius: i32,
    /// The work to run.
    pub task: ChunkStatusTask,
}

impl ChunkStep {
    /// The neighbour radius that must reach `status` before the target can be computed
    /// at the center.
    #[must_use]
    pub const fn get_accumulated_radius_of(&self, status: ChunkStatus) -> usize {
        if status as u8 == self.target_status as u8 {
            0
        } else {
            self.accumulated_dependencies.get_radius_of(status)
        }
    }

    /// Runs the step task for `holder` and returns its chunk.
    ///
    /// A proto chunk that is still behind the target afterwards is promoted to it.
    ///
    /// # Errors
    /// Returns the task's error, or an error if the holder has no chunk afterwards.
    pub fn apply(
        &self,
        context: Arc<WorldGenContext>,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        holder: Arc<ChunkHolder>,
    ) -> Result<Arc<ChunkAccess>, anyhow::Error> {
        (self.task)(context, self, cache, holder.clone())?;

        let chunk = holder.latest_chunk().ok_or_else(|| {
            anyhow!(
                "Chunk {} has no data after {}",
                holder.get_pos(),
                self.target_status
            )
        })?;
        if let Some(proto) = chunk.as_proto()
            && proto.persisted_status().is_before(self.target_status)
        {
            proto.set_persisted_status(self.target_status);
        }
        Ok(chunk)
    }
}

impl fmt::Debug for ChunkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStep")
            .field("target_status", &self.target_status)
            .field("direct_dependencies", &self.direct_dependencies)
            .field("accumulated_dependencies", &self.accumulated_dependencies)
            .field("block_state_write_radius", &self.block_state_write_radius)
            .finish_non_exhaustive()
    }
}

/// Raises every entry up to `radius` to at least `status`, growing the table if needed.
const fn add_dependency(
    deps: &mut [ChunkStatus; MAX_DEPENDENCY_SIZE],
    size: &mut usize,
    status: ChunkStatus,
    radius: usize,
) {
    let len = radius + 1;
    assert!(len <= MAX_DEPENDENCY_SIZE, "Dependency radius too large");
    let mut i = 0;
    while i < len {
        deps[i] = if i < *size {
            ChunkStatus::max(deps[i], status)
        } else {
            status
        };
        i += 1;
    }
    if len > *size {
        *size = len;
    }
}

/// Builder for a single [`ChunkStep`].
pub struct ChunkStepBuilder {
    status: ChunkStatus,
    direct: [ChunkStatus; MAX_DEPENDENCY_SIZE],
    direct_size: usize,
    block_state_write_radius: i32,
    task: ChunkStatusTask,
}

impl ChunkStepBuilder {
    /// Starts a step to `status` that only depends on its parent and passes the chunk through.
    #[must_use]
    pub const fn new(status: ChunkStatus) -> Self {
        Self {
            status,
            direct: [ChunkStatus::Empty; MAX_DEPENDENCY_SIZE],
            direct_size: 0,
            block_state_write_radius: -1,
            task: ChunkStatusTasks::pass_through,
        }
    }

    /// Requires every neighbour within `radius` to be at least at `status`.
    ///
    /// # Panics
    /// Panics if `status` is not before the status this step builds.
    #[must_use]
    pub const fn add_requirement(mut self, status: ChunkStatus, radius: usize) -> Self {
        assert!(
            status.is_before(self.status),
            "Status should be before the step's target status"
        );
        add_dependency(&mut self.direct, &mut self.direct_size, status, radius);
        self
    }

    /// Sets how far this step may write blocks outside its own chunk.
    #[must_use]
    pub const fn block_state_write_radius(mut self, radius: i32) -> Self {
        self.block_state_write_radius = radius;
        self
    }

    /// Sets the task run by this step.
    #[must_use]
    pub const fn set_task(mut self, task: ChunkStatusTask) -> Self {
        self.task = task;
        self
    }

    /// Largest distance whose direct requirement covers the parent status.
    const fn radius_of_parent(&self, parent: ChunkStatus) -> usize {
        let mut radius = self.direct_size;
        while radius > 0 {
            radius -= 1;
            if self.direct[radius].is_or_after(parent) {
                return radius;
            }
        }
        0
    }

    const fn build(mut self, parent: Option<ChunkStep>) -> ChunkStep {
        let Some(parent) = parent else {
            assert!(
                self.status.get_parent().is_none(),
                "Only the first status may have no parent step"
            );
            let deps = ChunkDependencies::new(self.direct, self.direct_size);
            return ChunkStep {
                target_status: self.status,
                direct_dependencies: deps,
                accumulated_dependencies: deps,
                block_state_write_radius: self.block_state_write_radius,
                task: self.task,
            };
        };

        match self.status.get_parent() {
            Some(expected) if expected as u8 == parent.target_status as u8 => {}
            _ => panic!("Parent step does not target the parent status"),
        }
        add_dependency(
            &mut self.direct,
            &mut self.direct_size,
            parent.target_status,
            0,
        );

        let offset = self.radius_of_parent(parent.target_status);
        let parent_deps = parent.accumulated_dependencies;
        let size = if offset + parent_deps.size > self.direct_size {
            offset + parent_deps.size
        } else {
            self.direct_size
        };
        assert!(size <= MAX_DEPENDENCY_SIZE, "Accumulated dependencies too large");

        let mut accumulated = [ChunkStatus::Empty; MAX_DEPENDENCY_SIZE];
        let mut j = 0;
        while j < size {
            accumulated[j] = if j < offset || j - offset >= parent_deps.size {
                self.direct[j]
            } else if j >= self.direct_size {
                parent_deps.dependency_by_radius[j - offset]
            } else {
                ChunkStatus::max(
                    self.direct[j],
                    parent_deps.dependency_by_radius[j - offset],
                )
            };
            j += 1;
        }

        ChunkStep {
            target_status: self.status,
            direct_dependencies: ChunkDependencies::new(self.direct, self.direct_size),
            accumulated_dependencies: ChunkDependencies::new(accumulated, size),
            block_state_write_radius: self.block_state_write_radius,
            task: self.task,
        }
    }
}

/// One step per status.
pub struct ChunkPyramid {
    steps: [Option<ChunkStep>; ChunkStatus::COUNT],
}

impl ChunkPyramid {
    /// Starts an empty pyramid.
    #[must_use]
    pub const fn builder() -> ChunkPyramidBuilder {
        ChunkPyramidBuilder {
            steps: [None; ChunkStatus::COUNT],
            count: 0,
        }
    }

    /// The step that brings a chunk to `status`.
    #[must_use]
    pub const fn get_step_to(&self, status: ChunkStatus) -> &ChunkStep {
        match &self.steps[status.get_index()] {
            Some(step) => step,
            None => panic!("Pyramid is missing a step"),
        }
    }
}

/// Builder for a [`ChunkPyramid`]. Steps must be added in status order.
pub struct ChunkPyramidBuilder {
    steps: [Option<ChunkStep>; ChunkStatus::COUNT],
    count: usize,
}

impl ChunkPyramidBuilder {
    /// Adds the next step.
    ///
    /// # Panics
    /// Panics if the step's status is not the next one in order.
    #[must_use]
    pub const fn step(mut self, builder: ChunkStepBuilder) -> Self {
        let index = builder.status.get_index();
        assert!(index == self.count, "Steps must be added in status order");
        let parent = if index == 0 {
            None
        } else {
            self.steps[index - 1]
        };
        self.steps[index] = Some(builder.build(parent));
        self.count += 1;
        self
    }

    /// Finishes the pyramid.
    ///
    /// # Panics
    /// Panics unless every status has a step.
    #[must_use]
    pub const fn build(self) -> ChunkPyramid {
        assert!(
            self.count == ChunkStatus::COUNT,
            "Not all statuses have a step"
        );
        ChunkPyramid { steps: self.steps }
    }
}

/// Steps used when a chunk has to be generated.
pub static GENERATION_PYRAMID: ChunkPyramid = ChunkPyramid::builder()
    .step(ChunkStepBuilder::new(ChunkStatus::Empty).set_task(ChunkStatusTasks::empty))
    .step(
        ChunkStepBuilder::new(ChunkStatus::StructureStarts)
            .set_task(ChunkStatusTasks::generate_structure_starts),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::StructureReferences)
            .add_requirement(ChunkStatus::StructureStarts, 8)
            .set_task(ChunkStatusTasks::generate_structure_references),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Biomes)
            .add_requirement(ChunkStatus::StructureStarts, 8)
            .set_task(ChunkStatusTasks::generate_biomes),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Noise)
            .add_requirement(ChunkStatus::StructureStarts, 8)
            .add_requirement(ChunkStatus::Biomes, 1)
            .set_task(ChunkStatusTasks::generate_noise),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Surface)
            .add_requirement(ChunkStatus::StructureStarts, 8)
            .add_requirement(ChunkStatus::Biomes, 1)
            .set_task(ChunkStatusTasks::generate_surface),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Carvers)
            .add_requirement(ChunkStatus::StructureStarts, 8)
            .set_task(ChunkStatusTasks::generate_carvers),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Features)
            .add_requirement(ChunkStatus::StructureStarts, 8)
            .add_requirement(ChunkStatus::Carvers, 1)
            .block_state_write_radius(1)
            .set_task(ChunkStatusTasks::generate_features),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::InitializeLight)
            .set_task(ChunkStatusTasks::initialize_light),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Light)
            .add_requirement(ChunkStatus::InitializeLight, 1)
            .set_task(ChunkStatusTasks::light),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Spawn)
            .add_requirement(ChunkStatus::Biomes, 1)
            .set_task(ChunkStatusTasks::generate_spawn),
    )
    .step(ChunkStepBuilder::new(ChunkStatus::Full).set_task(ChunkStatusTasks::full))
    .build();

/// Steps used when saved chunk data is reused.
pub static LOADING_PYRAMID: ChunkPyramid = ChunkPyramid::builder()
    .step(ChunkStepBuilder::new(ChunkStatus::Empty).set_task(ChunkStatusTasks::empty))
    .step(
        ChunkStepBuilder::new(ChunkStatus::StructureStarts)
            .set_task(ChunkStatusTasks::load_structure_starts),
    )
    .step(ChunkStepBuilder::new(ChunkStatus::StructureReferences))
    .step(ChunkStepBuilder::new(ChunkStatus::Biomes))
    .step(ChunkStepBuilder::new(ChunkStatus::Noise))
    .step(ChunkStepBuilder::new(ChunkStatus::Surface))
    .step(ChunkStepBuilder::new(ChunkStatus::Carvers))
    .step(ChunkStepBuilder::new(ChunkStatus::Features))
    .step(
        ChunkStepBuilder::new(ChunkStatus::InitializeLight)
            .set_task(ChunkStatusTasks::initialize_light),
    )
    .step(
        ChunkStepBuilder::new(ChunkStatus::Light)
            .add_requirement(ChunkStatus::InitializeLight, 1)
            .set_task(ChunkStatusTasks::light),
    )
    .step(ChunkStepBuilder::new(ChunkStatus::Spawn))
    .step(ChunkStepBuilder::new(ChunkStatus::Full).set_task(ChunkStatusTasks::full))
    .build();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_access::ChunkStatus::{
        Biomes, Carvers, Empty, Features, Full, InitializeLight, Light, Noise, Spawn,
        StructureReferences, StructureStarts,
    };

    #[test]
    fn test_generation_radii() {
        let full = GENERATION_PYRAMID.get_step_to(Full);
        assert_eq!(full.get_accumulated_radius_of(Empty), 11);
        assert_eq!(full.get_accumulated_radius_of(Full), 0);
        assert_eq!(full.get_accumulated_radius_of(Light), 0);
        assert_eq!(full.get_accumulated_radius_of(InitializeLight), 1);
        assert_eq!(full.get_accumulated_radius_of(Carvers), 2);
        assert_eq!(full.get_accumulated_radius_of(Biomes), 3);

        let features = GENERATION_PYRAMID.get_step_to(Features);
        assert_eq!(features.get_accumulated_radius_of(Empty), 10);
        assert_eq!(features.block_state_write_radius, 1);

        let noise = GENERATION_PYRAMID.get_step_to(Noise);
        assert_eq!(noise.get_accumulated_radius_of(Biomes), 1);
        assert_eq!(noise.get_accumulated_radius_of(Empty), 9);

        let references = GENERATION_PYRAMID.get_step_to(StructureReferences);
        assert_eq!(references.get_accumulated_radius_of(StructureStarts), 8);

        let starts = GENERATION_PYRAMID.get_step_to(StructureStarts);
        assert_eq!(starts.get_accumulated_radius_of(Empty), 0);
        assert_eq!(
            GENERATION_PYRAMID
                .get_step_to(Empty)
                .get_accumulated_radius_of(Empty),
            0
        );
    }

    #[test]
    fn test_full_accumulated_table() {
        let deps = GENERATION_PYRAMID.get_step_to(Full).accumulated_dependencies;
        assert_eq!(deps.size(), 12);
        assert_eq!(deps.get_radius(), 11);
        assert_eq!(
            &deps.as_slice()[..4],
            &[Spawn, InitializeLight, Carvers, Biomes]
        );
        assert!(deps.as_slice()[4..].iter().all(|s| *s == StructureStarts));
    }

    #[test]
    fn test_direct_dependencies() {
        let noise = GENERATION_PYRAMID.get_step_to(Noise).direct_dependencies;
        assert_eq!(noise.get(0), Biomes);
        assert_eq!(noise.get(1), Biomes);
        assert_eq!(noise.get(2), StructureStarts);
        assert_eq!(noise.get_radius(), 8);

        let empty = GENERATION_PYRAMID.get_step_to(Empty).direct_dependencies;
        assert_eq!(empty.size(), 0);
    }

    #[test]
    fn test_loading_radii() {
        let light = LOADING_PYRAMID.get_step_to(Light);
        assert_eq!(light.get_accumulated_radius_of(InitializeLight), 1);

        let full = LOADING_PYRAMID.get_step_to(Full);
        assert_eq!(full.get_accumulated_radius_of(Empty), 1);
        assert_eq!(full.accumulated_dependencies.get_radius(), 1);

        let noise = LOADING_PYRAMID.get_step_to(Noise);
        assert_eq!(noise.get_accumulated_radius_of(Empty), 0);
        assert_eq!(noise.accumulated_dependencies.get_radius(), 0);
    }

    #[test]
    fn test_radii_shrink_towards_target() {
        for pyramid in [&GENERATION_PYRAMID, &LOADING_PYRAMID] {
            for target in ChunkStatus::ALL {
                let step = pyramid.get_step_to(target);
                let mut previous = usize::MAX;
                for status in ChunkStatus::ALL.into_iter().take(target.get_index() + 1) {
                    let radius = step.get_accumulated_radius_of(status);
                    assert!(radius <= previous, "{target}: radius grew at {status}");
                    previous = radius;
                }
            }
        }
    }

    #[test]
    fn test_loading_never_needs_more_than_generation() {
        for target in ChunkStatus::ALL {
            for status in ChunkStatus::ALL.into_iter().take(target.get_index() + 1) {
                assert!(
                    LOADING_PYRAMID
                        .get_step_to(target)
                        .get_accumulated_radius_of(status)
                        <= GENERATION_PYRAMID
                            .get_step_to(target)
                            .get_accumulated_radius_of(status)
                );
            }
        }
    }

    #[test]
    #[should_panic(expected = "Status should be before the step's target status")]
    fn test_requirement_must_be_earlier() {
        let _ = ChunkStepBuilder::new(Noise).add_requirement(Noise, 1);
    }

    #[test]
    fn test_steps_target_their_status() {
        for status in ChunkStatus::ALL {
            assert_eq!(GENERATION_PYRAMID.get_step_to(status).target_status, status);
            assert_eq!(LOADING_PYRAMID.get_step_to(status).target_status, status);
        }
    }
}
