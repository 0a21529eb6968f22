//! The logger of the binary.
//!
//! Writes timestamped lines to stderr. With the `spawn_chunk_display` feature it
//! can also keep a chunk status grid pinned below the log output.

use std::io::{self, Write};
use std::time::Instant;

use anyhow::anyhow;
use log::{LevelFilter, Log, Metadata, Record};
#[cfg(feature = "spawn_chunk_display")]
use parking_lot::Mutex;

#[cfg(feature = "spawn_chunk_display")]
use chunkgen_core::chunk::chunk_access::ChunkStatus;

/// Logs to stderr.
pub struct CommandLogger {
    level: LevelFilter,
    start: Instant,
    #[cfg(feature = "spawn_chunk_display")]
    display: Mutex<Option<SpawnDisplay>>,
}

/// A grid drawn at the bottom of the terminal. Log lines arriving while it is
/// shown are queued and printed above it on the next render.
#[cfg(feature = "spawn_chunk_display")]
#[derive(Default)]
struct SpawnDisplay {
    drawn_lines: usize,
    queued: Vec<String>,
}

impl CommandLogger {
    fn new(level: LevelFilter) -> Self {
        Self {
            level,
            start: Instant::now(),
            #[cfg(feature = "spawn_chunk_display")]
            display: Mutex::new(None),
        }
    }

    fn format(&self, record: &Record) -> String {
        format!(
            "[{:>9.3}s {:<5} {}] {}",
            self.start.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args()
        )
    }

    /// Starts pinning a grid below the log output.
    #[cfg(feature = "spawn_chunk_display")]
    pub fn activate_spawn_display(&self) {
        *self.display.lock() = Some(SpawnDisplay::default());
    }

    /// Queues the grid state and redraws it if `render` is set.
    #[cfg(feature = "spawn_chunk_display")]
    pub fn update_spawn_grid(&self, grid: &[Vec<Option<ChunkStatus>>], render: bool) {
        if !render {
            return;
        }
        let mut display = self.display.lock();
        let Some(display) = display.as_mut() else {
            return;
        };

        let mut out = String::new();
        if display.drawn_lines > 0 {
            out.push_str(&format!("\x1b[{}A\x1b[J", display.drawn_lines));
        }
        for line in display.queued.drain(..) {
            out.push_str(&line);
            out.push('\n');
        }
        for row in grid {
            for status in row {
                out.push_str(status_color(*status));
                out.push_str("██");
            }
            out.push_str("\x1b[0m\n");
        }
        display.drawn_lines = grid.len();

        let _ = io::stderr().lock().write_all(out.as_bytes());
    }

    /// Stops pinning the grid and prints what was queued meanwhile.
    #[cfg(feature = "spawn_chunk_display")]
    pub fn deactivate_spawn_display(&self) {
        let Some(display) = self.display.lock().take() else {
            return;
        };
        let mut stderr = io::stderr().lock();
        for line in display.queued {
            let _ = writeln!(stderr, "{line}");
        }
    }
}

#[cfg(feature = "spawn_chunk_display")]
const fn status_color(status: Option<ChunkStatus>) -> &'static str {
    match status {
        None => "\x1b[38;5;236m",
        Some(ChunkStatus::Empty) => "\x1b[38;5;240m",
        Some(ChunkStatus::StructureStarts | ChunkStatus::StructureReferences) => "\x1b[38;5;94m",
        Some(ChunkStatus::Biomes) => "\x1b[38;5;28m",
        Some(ChunkStatus::Noise | ChunkStatus::Surface) => "\x1b[38;5;130m",
        Some(ChunkStatus::Carvers | ChunkStatus::Features) => "\x1b[38;5;136m",
        Some(ChunkStatus::InitializeLight | ChunkStatus::Light) => "\x1b[38;5;220m",
        Some(ChunkStatus::Spawn) => "\x1b[38;5;153m",
        Some(ChunkStatus::Full) => "\x1b[38;5;255m",
    }
}

impl Log for CommandLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format(record);

        #[cfg(feature = "spawn_chunk_display")]
        if let Some(display) = self.display.lock().as_mut() {
            display.queued.push(line);
            return;
        }

        let _ = writeln!(io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Installs the logger for the whole process.
///
/// # Errors
/// Returns an error if a logger was already installed.
pub fn init(level: LevelFilter) -> anyhow::Result<&'static CommandLogger> {
    let logger: &'static CommandLogger = Box::leak(Box::new(CommandLogger::new(level)));
    log::set_logger(logger).map_err(|err| anyhow!("Failed to install the logger: {err}"))?;
    log::set_max_level(level);
    Ok(logger)
}
