//! Spawn chunk generation with optional terminal progress display.
//!
//! Generates chunks around the origin until the configured square of `Full`
//! chunks is complete. When the `spawn_chunk_display` feature is enabled, a
//! colored ANSI grid shows real-time progress including the surrounding
//! dependency rings.
//!
//! Set `PREGEN_RADIUS` environment variable to generate a larger area (e.g., 128).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use chunkgen_core::chunk::chunk_access::ChunkStatus;
use chunkgen_core::chunk::chunk_generation_task::GenerationTaskHandle;
use chunkgen_core::chunk::chunk_map::ChunkMap;
use chunkgen_core::chunk::chunk_pyramid::GENERATION_PYRAMID;
use chunkgen_utils::ChunkPos;

use crate::config::{ChunkGenConfig, SPAWN_RADIUS};
use crate::logger::CommandLogger;

/// How many times a spawn chunk is scheduled before it is given up on.
const MAX_ATTEMPTS: u32 = 5;

/// A spawn chunk and the task currently generating it.
struct SpawnTask {
    pos: ChunkPos,
    handle: Arc<GenerationTaskHandle>,
    attempts: u32,
    abandoned: bool,
}

impl SpawnTask {
    fn schedule(map: &Arc<ChunkMap>, pos: ChunkPos) -> Self {
        Self {
            pos,
            handle: map.schedule_chunk_generation(pos, ChunkStatus::Full),
            attempts: 1,
            abandoned: false,
        }
    }
}

type TaskList = Vec<SpawnTask>;

/// Dependency margin: extra rings required for Full chunk generation.
fn dependency_margin() -> i32 {
    GENERATION_PYRAMID
        .get_step_to(ChunkStatus::Full)
        .accumulated_dependencies
        .get_radius_of(ChunkStatus::Empty) as i32
}

const fn area(radius: i32) -> usize {
    ((radius * 2 + 1) * (radius * 2 + 1)) as usize
}

/// Generates spawn chunks, optionally displaying progress in the terminal.
///
/// Every chunk within `pregen_radius` of the origin is scheduled to reach `Full`.
/// The chunk map is ticked in a loop until all of them did. With the
/// `spawn_chunk_display` feature, small areas are shown as a colored terminal
/// grid that includes the surrounding dependency chunks.
pub async fn generate_spawn_chunks(
    map: &Arc<ChunkMap>,
    config: &ChunkGenConfig,
    #[allow(unused)] logger: &CommandLogger,
) {
    let center_chunk = ChunkPos::new(0, 0);
    let radius = config.pregen_radius;
    let total_chunks = area(radius);

    log::info!(
        "Preparing spawn area: {total_chunks} chunks (radius {radius}) around chunk {center_chunk}",
    );

    let mut tasks = TaskList::with_capacity(total_chunks);
    for z in -radius..=radius {
        for x in -radius..=radius {
            let pos = ChunkPos::new(center_chunk.x() + x, center_chunk.z() + z);
            tasks.push(SpawnTask::schedule(map, pos));
        }
    }

    #[cfg(feature = "spawn_chunk_display")]
    let elapsed = if radius > SPAWN_RADIUS {
        let start = Instant::now();
        generate_pregen(map, &mut tasks, center_chunk, config).await;
        start.elapsed()
    } else {
        generate_with_display(map, &mut tasks, center_chunk, radius, logger).await
    };

    #[cfg(not(feature = "spawn_chunk_display"))]
    let elapsed = {
        let start = Instant::now();
        generate_pregen(map, &mut tasks, center_chunk, config).await;
        start.elapsed()
    };

    log::info!(
        "Spawn area prepared: {} chunks in {:.2}s ({:.1} chunks/s)",
        total_chunks,
        elapsed.as_secs_f64(),
        total_chunks as f64 / elapsed.as_secs_f64(),
    );
}

/// Schedules the chunks whose task was cancelled again, up to [`MAX_ATTEMPTS`] times.
///
/// Returns how many chunks were given up on.
fn reschedule_failed(map: &Arc<ChunkMap>, tasks: &mut TaskList) -> usize {
    let mut abandoned = 0;
    for task in tasks.iter_mut() {
        if task.abandoned {
            abandoned += 1;
            continue;
        }
        if !task.handle.is_finished() || task.handle.is_success() {
            continue;
        }
        if task.attempts >= MAX_ATTEMPTS {
            log::error!(
                "Generation of {} failed {} times, giving up",
                task.pos,
                task.attempts
            );
            task.abandoned = true;
            abandoned += 1;
            continue;
        }
        log::warn!(
            "Generation of {} was cancelled, rescheduling (attempt {})",
            task.pos,
            task.attempts + 1
        );
        task.handle = map.schedule_chunk_generation(task.pos, ChunkStatus::Full);
        task.attempts += 1;
    }
    abandoned
}

/// Returns the elapsed generation time.
#[cfg(feature = "spawn_chunk_display")]
async fn generate_with_display(
    map: &Arc<ChunkMap>,
    tasks: &mut TaskList,
    center_chunk: ChunkPos,
    radius: i32,
    logger: &CommandLogger,
) -> Duration {
    let display_radius = radius + dependency_margin();
    let diameter = (display_radius * 2 + 1) as usize;
    let total_chunks = area(radius);

    logger.activate_spawn_display();
    let start = Instant::now();
    let mut grid = vec![vec![None; diameter]; diameter];
    let mut last_render = Instant::now();

    loop {
        map.tick();
        let abandoned = reschedule_failed(map, tasks);

        let mut completed = 0;
        for dz in -display_radius..=display_radius {
            for dx in -display_radius..=display_radius {
                let pos = ChunkPos::new(center_chunk.x() + dx, center_chunk.z() + dz);
                let status = map.persisted_status(pos);
                grid[(dz + display_radius) as usize][(dx + display_radius) as usize] = status;

                let in_spawn_area = dx.abs() <= radius && dz.abs() <= radius;
                if in_spawn_area && status == Some(ChunkStatus::Full) {
                    completed += 1;
                }
            }
        }

        // Always update grid state; throttle rendering to ~10fps
        let should_render = last_render.elapsed() >= Duration::from_millis(100);
        logger.update_spawn_grid(&grid, should_render);
        if should_render {
            last_render = Instant::now();
        }

        if completed + abandoned >= total_chunks {
            break;
        }

        sleep(Duration::from_millis(10)).await;
    }

    let elapsed = start.elapsed();

    logger.update_spawn_grid(&grid, true);
    logger.deactivate_spawn_display();

    elapsed
}

/// Generates chunks with progress reporting for pregeneration.
async fn generate_pregen(
    map: &Arc<ChunkMap>,
    tasks: &mut TaskList,
    center_chunk: ChunkPos,
    config: &ChunkGenConfig,
) {
    let radius = config.pregen_radius;
    let total_chunks = area(radius);
    let interval = Duration::from_secs(config.progress_interval_secs.max(1));
    let mut last_report = Instant::now();
    let mut last_completed = 0usize;

    log::debug!(
        "Full chunks need {} rings of dependencies, up to {} chunks in memory",
        dependency_margin(),
        area(radius + dependency_margin())
    );

    loop {
        map.tick();
        let abandoned = reschedule_failed(map, tasks);

        let completed = count_full_chunks(map, center_chunk, radius);

        if radius > SPAWN_RADIUS && last_report.elapsed() >= interval {
            let chunks_per_sec =
                completed.saturating_sub(last_completed) as f64 / last_report.elapsed().as_secs_f64();
            let percent = (completed as f64 / total_chunks as f64) * 100.0;
            let eta = if chunks_per_sec > 0.0 {
                (total_chunks - completed) as f64 / chunks_per_sec
            } else {
                0.0
            };
            log::info!(
                "Progress: {completed}/{total_chunks} ({percent:.1}%), {chunks_per_sec:.1} chunks/s, ETA: {eta:.0}s, {} loaded, {} tasks",
                map.loaded_chunk_count(),
                map.running_task_count(),
            );
            last_report = Instant::now();
            last_completed = completed;
        }

        if completed + abandoned >= total_chunks {
            if abandoned > 0 {
                log::error!("{abandoned} spawn chunks could not be generated");
            }
            break;
        }

        sleep(Duration::from_millis(10)).await;
    }
}

/// Counts how many chunks in the area have reached Full status.
fn count_full_chunks(map: &ChunkMap, center_chunk: ChunkPos, radius: i32) -> usize {
    let mut completed = 0;
    for dz in -radius..=radius {
        for dx in -radius..=radius {
            let pos = ChunkPos::new(center_chunk.x() + dx, center_chunk.z() + dz);
            if map.persisted_status(pos) == Some(ChunkStatus::Full) {
                completed += 1;
            }
        }
    }
    completed
}

#[cfg(test)]
mod tests {
    use chunkgen_core::chunk::chunk_generator::ChunkGeneratorType;
    use chunkgen_core::chunk::chunk_storage::{ChunkStorage, SavedChunk};
    use chunkgen_core::chunk::flat_chunk_generator::FlatChunkGenerator;
    use chunkgen_core::chunk::world_gen_context::WorldGenContext;

    use super::*;

    struct UnreadableStorage;

    impl ChunkStorage for UnreadableStorage {
        fn load(&self, pos: ChunkPos) -> anyhow::Result<Option<SavedChunk>> {
            anyhow::bail!("Cannot read {pos}")
        }

        fn save(&self, _pos: ChunkPos, _chunk: SavedChunk) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failing_chunk_is_given_up_on() {
        let context = WorldGenContext::new(
            ChunkGeneratorType::Flat(FlatChunkGenerator::new(4)),
            Arc::new(UnreadableStorage),
            0,
            16,
            1,
        )
        .unwrap();
        let map = ChunkMap::new(context);
        let mut tasks = vec![SpawnTask::schedule(&map, ChunkPos::new(0, 0))];

        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            assert!(Instant::now() < deadline, "chunk was never given up on");
            map.tick();
            if reschedule_failed(&map, &mut tasks) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(tasks[0].abandoned);
        assert_eq!(tasks[0].attempts, MAX_ATTEMPTS);
        assert_eq!(reschedule_failed(&map, &mut tasks), 1);
    }

    #[test]
    fn test_dependency_margin() {
        assert_eq!(dependency_margin(), 11);
        assert_eq!(area(SPAWN_RADIUS), 49);
        assert_eq!(area(0), 1);
    }
}
