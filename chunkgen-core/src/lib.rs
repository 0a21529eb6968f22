//! Staged chunk generation.
//!
//! Drives chunks and the neighbourhood they depend on through the ordered
//! [`ChunkStatus`](chunk::chunk_access::ChunkStatus) stages without blocking
//! the calling thread. See [`chunk::chunk_generation_task`] for the scheduler
//! and [`chunk::chunk_map`] for the map that owns it.

pub mod chunk;
