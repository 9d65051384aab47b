//! Build cube graphs from their serialized descriptions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::{EdgePolicy, EngineConfig};
use crate::error::{CubeError, Result};

use super::{
    AggregateSpaceCube, AggregateTimeCube, ApplyPixelCube, Catalog, CropCube, CubeRef, CubeSpec,
    DummyCube, FillTimeCube, FilterGeomCube, FilterPixelCube, JoinBandsCube, RasterReader,
    ReduceSpaceCube, ReduceTimeCube, RenameBandsCube, SelectBandsCube, SelectTimeCube,
    SliceSpaceCube, SliceTimeCube, SourceCube, StreamCube, WindowTimeCube,
};

/// Image collections available to leaf cubes, by name.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, (Arc<dyn Catalog>, Arc<dyn RasterReader>)>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a collection.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        catalog: Arc<dyn Catalog>,
        reader: Arc<dyn RasterReader>,
    ) {
        self.sources.insert(name.into(), (catalog, reader));
    }

    /// Look up a collection; unknown names are configuration errors.
    pub fn get(&self, name: &str) -> Result<(Arc<dyn Catalog>, Arc<dyn RasterReader>)> {
        self.sources
            .get(name)
            .map(|(c, r)| (Arc::clone(c), Arc::clone(r)))
            .ok_or_else(|| CubeError::config(format!("unknown image collection '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Turns [`CubeSpec`] trees into operator graphs.
///
/// All validation happens here, so a successfully built graph has no
/// construction-time errors left.
#[derive(Clone, Default)]
pub struct CubeFactory {
    registry: SourceRegistry,
    edge_policy: EdgePolicy,
}

impl CubeFactory {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry,
            edge_policy: EdgePolicy::default(),
        }
    }

    /// Take defaults (window edge policy) from the engine configuration.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.edge_policy = config.window_edge_policy;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Build the graph described by `spec`.
    pub fn build(&self, spec: &CubeSpec) -> Result<CubeRef> {
        debug!(kind = spec.kind(), "Building cube");
        let cube: CubeRef = match spec {
            CubeSpec::Source {
                collection,
                reference,
                bands,
                resampling,
                aggregation,
            } => {
                let (catalog, reader) = self.registry.get(collection)?;
                Arc::new(SourceCube::new(
                    collection.clone(),
                    reference.clone(),
                    bands.clone(),
                    catalog,
                    reader,
                    *resampling,
                    *aggregation,
                )?)
            }
            CubeSpec::Dummy {
                reference,
                bands,
                fill,
            } => Arc::new(DummyCube::new(reference.clone(), bands.as_slice(), *fill)?),
            CubeSpec::SelectBands { input, bands } => {
                Arc::new(SelectBandsCube::new(self.build(input)?, bands.as_slice())?)
            }
            CubeSpec::RenameBands { input, names } => {
                Arc::new(RenameBandsCube::new(self.build(input)?, names.clone())?)
            }
            CubeSpec::FilterPixel { input, predicate } => {
                Arc::new(FilterPixelCube::new(self.build(input)?, predicate)?)
            }
            CubeSpec::FilterGeom { input, rings } => {
                Arc::new(FilterGeomCube::new(self.build(input)?, rings.clone())?)
            }
            CubeSpec::ApplyPixel {
                input,
                expressions,
                names,
                keep_bands,
            } => Arc::new(ApplyPixelCube::new(
                self.build(input)?,
                expressions,
                names,
                *keep_bands,
            )?),
            CubeSpec::ReduceTime { input, reducers } => {
                Arc::new(ReduceTimeCube::new(self.build(input)?, reducers.clone())?)
            }
            CubeSpec::ReduceSpace { input, reducers } => {
                Arc::new(ReduceSpaceCube::new(self.build(input)?, reducers.clone())?)
            }
            CubeSpec::WindowTime {
                input,
                left,
                right,
                op,
                edge_policy,
            } => Arc::new(WindowTimeCube::new(
                self.build(input)?,
                *left,
                *right,
                op.clone(),
                edge_policy.unwrap_or(self.edge_policy),
            )?),
            CubeSpec::JoinBands { inputs, prefixes } => {
                let children = inputs
                    .iter()
                    .map(|s| self.build(s))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(JoinBandsCube::new(children, prefixes.clone())?)
            }
            CubeSpec::FillTime { input, method } => {
                Arc::new(FillTimeCube::new(self.build(input)?, *method))
            }
            CubeSpec::Stream {
                input,
                command,
                args,
            } => Arc::new(StreamCube::new(
                self.build(input)?,
                command.clone(),
                args.clone(),
            )?),
            CubeSpec::Crop {
                input,
                extent,
                start,
                end,
            } => Arc::new(CropCube::new(self.build(input)?, *extent, *start, *end)?),
            CubeSpec::AggregateTime { input, dt, method } => {
                Arc::new(AggregateTimeCube::new(self.build(input)?, *dt, *method)?)
            }
            CubeSpec::AggregateSpace {
                input,
                factor,
                method,
            } => Arc::new(AggregateSpaceCube::new(self.build(input)?, *factor, *method)?),
            CubeSpec::SelectTime { input, instants } => {
                Arc::new(SelectTimeCube::new(self.build(input)?, instants.clone())?)
            }
            CubeSpec::SliceTime {
                input,
                index,
                datetime,
            } => Arc::new(SliceTimeCube::new(self.build(input)?, *index, *datetime)?),
            CubeSpec::SliceSpace {
                input,
                pixel,
                point,
            } => Arc::new(SliceSpaceCube::new(self.build(input)?, *pixel, *point)?),
        };
        Ok(cube)
    }
}
