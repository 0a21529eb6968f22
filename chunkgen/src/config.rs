//! Settings of the pregeneration binary.

use std::path::Path;
use std::{env, fs, io};

use anyhow::{Context, anyhow};
use log::LevelFilter;
use serde::Deserialize;

/// Config file read when no path is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "chunkgen.json";

/// Chunk radius pregenerated by default.
pub const SPAWN_RADIUS: i32 = 3;

/// Everything the binary can be configured with. Missing fields keep their default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkGenConfig {
    /// Chunks within this radius of the origin are brought to `Full`.
    pub pregen_radius: i32,
    /// Worker threads for stage tasks, `0` to use one per core.
    pub worker_threads: usize,
    /// Height of the flat terrain.
    pub surface_height: i32,
    /// The lowest block y of the world.
    pub min_y: i32,
    /// The height of the world in blocks, a multiple of 16.
    pub height: i32,
    /// `error`, `warn`, `info`, `debug`, `trace` or `off`.
    pub log_level: String,
    /// Seconds between progress reports.
    pub progress_interval_secs: u64,
}

impl Default for ChunkGenConfig {
    fn default() -> Self {
        Self {
            pregen_radius: SPAWN_RADIUS,
            worker_threads: 0,
            surface_height: 64,
            min_y: -64,
            height: 384,
            log_level: "info".to_owned(),
            progress_interval_secs: 5,
        }
    }
}

impl ChunkGenConfig {
    /// Reads the config at `path`, falling back to defaults if the file does not exist.
    /// `PREGEN_RADIUS` overrides the configured radius.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or holds invalid values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        config.apply_radius_override(env::var("PREGEN_RADIUS").ok().as_deref());
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON config.
    ///
    /// # Errors
    /// Returns an error if `contents` is not a valid config.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Replaces the radius with `value` if it is a number.
    pub fn apply_radius_override(&mut self, value: Option<&str>) {
        if let Some(radius) = value.and_then(|s| s.parse().ok()) {
            self.pregen_radius = radius;
        }
    }

    /// The configured log level.
    ///
    /// # Errors
    /// Returns an error if the level is not a known one.
    pub fn log_level(&self) -> anyhow::Result<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("Unknown log level `{}`", self.log_level))
    }

    /// Checks that the values describe a usable world.
    ///
    /// # Errors
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pregen_radius < 0 {
            anyhow::bail!("pregen_radius must not be negative, got {}", self.pregen_radius);
        }
        if self.height <= 0 || self.height % 16 != 0 {
            anyhow::bail!("height must be a positive multiple of 16, got {}", self.height);
        }
        if !(self.min_y..=self.min_y + self.height).contains(&self.surface_height) {
            anyhow::bail!(
                "surface_height {} is outside the world ({} to {})",
                self.surface_height,
                self.min_y,
                self.min_y + self.height
            );
        }
        self.log_level()?;
        Ok(())
    }
}
