//! Pointwise band arithmetic.

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::expr::PixelExpr;
use crate::reference::{ChunkIndex, CubeReference};

use super::{copy_bands, Band, BandList, Cube, CubeRef, CubeSpec};

pub struct ApplyPixelCube {
    input: CubeRef,
    bands: BandList,
    expressions: Vec<PixelExpr>,
    names: Vec<String>,
    keep_bands: bool,
}

impl ApplyPixelCube {
    /// One output band per expression, named by `names`. With `keep_bands`
    /// the input bands come first.
    pub fn new(
        input: CubeRef,
        expressions: &[String],
        names: &[String],
        keep_bands: bool,
    ) -> Result<Self> {
        if expressions.is_empty() {
            return Err(CubeError::config("apply_pixel needs at least one expression"));
        }
        if expressions.len() != names.len() {
            return Err(CubeError::config(format!(
                "apply_pixel got {} expressions but {} names",
                expressions.len(),
                names.len()
            )));
        }
        let input_names = input.bands().names();
        let compiled = expressions
            .iter()
            .map(|e| PixelExpr::compile(e, &input_names))
            .collect::<Result<Vec<_>>>()?;

        let mut bands: Vec<Band> = if keep_bands {
            input.bands().iter().cloned().collect()
        } else {
            Vec::new()
        };
        bands.extend(names.iter().map(Band::new));

        Ok(Self {
            bands: BandList::new(bands)?,
            input,
            expressions: compiled,
            names: names.to_vec(),
            keep_bands,
        })
    }
}

impl Cube for ApplyPixelCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        &self.bands
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let input = self.input.compute_chunk(idx)?;
        let [nb_in, nt, ny, nx] = input.shape();
        let mut out = ChunkData::nodata([self.bands.len(), nt, ny, nx]);
        let offset = if self.keep_bands {
            copy_bands(&mut out, 0, &input);
            nb_in
        } else {
            0
        };

        let band_len = input.band_len();
        let mut pixel = vec![0.0; nb_in];
        for i in 0..band_len {
            for (b, v) in pixel.iter_mut().enumerate() {
                *v = input.values()[b * band_len + i];
            }
            for (e, expr) in self.expressions.iter().enumerate() {
                out.values_mut()[(offset + e) * band_len + i] = expr.eval(&pixel);
            }
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::ApplyPixel {
            input: Box::new(self.input.spec()),
            expressions: self
                .expressions
                .iter()
                .map(|e| e.source().to_string())
                .collect(),
            names: self.names.clone(),
            keep_bands: self.keep_bands,
        }
    }
}
