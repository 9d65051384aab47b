//! Chunked Execution Engine for Spatiotemporal Data Cubes
//!
//! This crate exposes gridded multi-band raster time series as lazy,
//! composable operators and evaluates them chunk by chunk. It provides:
//!
//! - **Spatiotemporal reference**: chunk addressing, bounds and derived references
//! - **Operator graph**: source, band, pixel, reduction, window and slicing operators
//! - **Queries**: point values, pixel time series and zonal statistics
//! - **Execution backends**: single-threaded, multithreaded and distributed (swarm)
//! - **Chunk cache**: single-flight, memory-bounded LRU shared by concurrent requests
//!
//! # Architecture
//!
//! ```text
//! CubeSpec (JSON)
//!      │
//!      ▼
//! CubeFactory::build ──► operator graph (Arc<dyn Cube>)
//!                              │
//!                              ▼
//!                  ChunkProcessor::run(chunks)
//!                              │
//!      ┌───────────────────────┼─────────────────────────┐
//!      ▼                       ▼                         ▼
//!  single thread        pool of N workers        remote workers (HTTP)
//!      │                       │                         │
//!      └───────────► ChunkCallback (serialized) ◄────────┘
//!                              │
//!                              ▼
//!                 ZarrExport / CollectChunks / ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cube_engine::{CubeFactory, CubeSpec, SingleThreadProcessor, ZarrExport};
//!
//! let spec = CubeSpec::from_json(&std::fs::read_to_string("ndvi.json")?)?;
//! let cube = CubeFactory::new(registry).build(&spec)?;
//! let export = Arc::new(ZarrExport::create("ndvi.zarr", cube.as_ref())?);
//! let outcome = SingleThreadProcessor
//!     .run(cube.clone(), cube.reference().all_chunks(), export, Arc::new(NoProgress), RunControl::new())
//!     .await?;
//! println!("{} chunks failed", outcome.failed_count());
//! ```

pub mod aggregate;
pub mod cache;
pub mod chunk;
pub mod collection;
pub mod config;
pub mod cube;
pub mod datetime;
pub mod error;
pub mod exec;
pub mod export;
pub mod expr;
pub mod geometry;
pub mod query;
pub mod reference;

// Re-export commonly used types at crate root
pub use aggregate::{reduce_series, AggregatorKind, PixelAccumulator};
pub use cache::{CacheStats, ChunkCache, ChunkKey};
pub use chunk::ChunkData;
pub use collection::{CollectionsFile, StaticCatalog, ZarrImageReader};
pub use config::{BackendKind, EdgePolicy, EngineConfig};
pub use cube::{
    read_window, Band, BandList, Cube, CubeFactory, CubeId, CubeRef, CubeSpec, ReducerSpec,
    SourceRegistry, WindowOp,
};
pub use datetime::{parse_datetime, TimeStep, TimeUnit};
pub use error::{CubeError, Result};
pub use exec::{
    ChunkCallback, ChunkFailure, ChunkProcessor, HttpWorkerEndpoint, LogProgress,
    MultiThreadProcessor, NoProgress, ProgressSink, RunControl, RunOutcome,
    SingleThreadProcessor, SwarmProcessor, WorkerEndpoint,
};
pub use export::{CollectChunks, ZarrExport};
pub use expr::PixelExpr;
pub use geometry::Polygon;
pub use query::{query_points, query_timeseries, zonal_statistics, PointSeries, ZoneStatistics};
pub use reference::{
    ChunkBounds, ChunkIndex, ChunkShape, CubeReference, PixelWindow, SpaceTimePoint,
    SpatialExtent, TargetGrid,
};
