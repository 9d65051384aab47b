//! Merge the bands of cubes sharing one reference.

use tracing::debug;

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference};

use super::{copy_bands, Band, BandList, Cube, CubeRef, CubeSpec};

pub struct JoinBandsCube {
    inputs: Vec<CubeRef>,
    prefixes: Option<Vec<String>>,
    bands: BandList,
}

impl JoinBandsCube {
    /// With `prefixes`, output bands are named `{prefix}.{band}`; without,
    /// band names must already be unique across inputs.
    pub fn new(inputs: Vec<CubeRef>, prefixes: Option<Vec<String>>) -> Result<Self> {
        if inputs.len() < 2 {
            return Err(CubeError::config("join_bands needs at least two inputs"));
        }
        let first = inputs[0].reference();
        for (i, other) in inputs.iter().enumerate().skip(1) {
            if other.reference() != first {
                debug!(left = ?first, right = ?other.reference(), "Reference mismatch");
                return Err(CubeError::reference_mismatch(format!(
                    "input {} of join_bands has a different spatiotemporal reference than input 0",
                    i
                )));
            }
        }
        if let Some(p) = &prefixes {
            if p.len() != inputs.len() {
                return Err(CubeError::config(format!(
                    "join_bands got {} prefixes for {} inputs",
                    p.len(),
                    inputs.len()
                )));
            }
        }

        let mut bands = Vec::new();
        for (i, input) in inputs.iter().enumerate() {
            for band in input.bands().iter() {
                let name = match &prefixes {
                    Some(p) => format!("{}.{}", p[i], band.name),
                    None => band.name.clone(),
                };
                bands.push(Band {
                    name,
                    unit: band.unit.clone(),
                });
            }
        }

        Ok(Self {
            bands: BandList::new(bands)?,
            inputs,
            prefixes,
        })
    }
}

impl Cube for JoinBandsCube {
    fn reference(&self) -> &CubeReference {
        self.inputs[0].reference()
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let mut out = ChunkData::nodata(self.chunk_shape(idx)?);
        let mut offset = 0;
        for input in &self.inputs {
            let chunk = input.compute_chunk(idx)?;
            copy_bands(&mut out, offset, &chunk);
            offset += chunk.nbands();
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::JoinBands {
            inputs: self.inputs.iter().map(|c| c.spec()).collect(),
            prefixes: self.prefixes.clone(),
        }
    }
}
