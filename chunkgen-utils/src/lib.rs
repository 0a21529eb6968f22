//! Shared primitive types for the chunk generation crates.

pub mod math;

mod chunk_pos;

pub use chunk_pos::ChunkPos;
