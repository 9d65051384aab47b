//! Chunk cache shared by concurrent requests in long-lived processes.

mod chunk_cache;

pub use chunk_cache::{CacheStats, ChunkCache, ChunkKey};
