//! This module contains all the chunk related structures and logic.

pub mod chunk_access;
pub mod chunk_generation_task;
pub mod chunk_generator;
pub mod chunk_holder;
pub mod chunk_map;
pub mod chunk_pyramid;
pub mod chunk_result;
pub mod chunk_status_tasks;
/// Saving and loading of chunk data.
pub mod chunk_storage;
pub mod flat_chunk_generator;
pub mod level_chunk;
pub mod proto_chunk;
pub mod world_gen_context;
