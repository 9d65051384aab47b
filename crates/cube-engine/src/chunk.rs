//! In-memory buffer for one materialized chunk.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CubeError, Result};

/// Size of the binary header: band, time, y and x counts as little-endian i32.
pub const HEADER_LEN: usize = 16;

/// A dense `[bands, t, y, x]` array of f64 values with NaN as nodata.
///
/// Rows are stored bottom-to-top, matching the reference's row order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    shape: [usize; 4],
    values: Vec<f64>,
}

impl ChunkData {
    /// A chunk filled with nodata.
    pub fn nodata(shape: [usize; 4]) -> Self {
        Self::filled(shape, f64::NAN)
    }

    /// A chunk filled with a constant.
    pub fn filled(shape: [usize; 4], value: f64) -> Self {
        Self {
            shape,
            values: vec![value; shape.iter().product()],
        }
    }

    /// Wrap existing values, checking the length.
    pub fn from_values(shape: [usize; 4], values: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(CubeError::Internal(format!(
                "chunk shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn nbands(&self) -> usize {
        self.shape[0]
    }

    pub fn nt(&self) -> usize {
        self.shape[1]
    }

    pub fn ny(&self) -> usize {
        self.shape[2]
    }

    pub fn nx(&self) -> usize {
        self.shape[3]
    }

    /// Number of values in one band-slice (`ny * nx`).
    pub fn plane_len(&self) -> usize {
        self.shape[2] * self.shape[3]
    }

    /// Number of values in one band (`nt * ny * nx`).
    pub fn band_len(&self) -> usize {
        self.shape[1] * self.plane_len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    #[inline]
    pub fn offset(&self, b: usize, t: usize, y: usize, x: usize) -> usize {
        ((b * self.shape[1] + t) * self.shape[2] + y) * self.shape[3] + x
    }

    #[inline]
    pub fn get(&self, b: usize, t: usize, y: usize, x: usize) -> f64 {
        self.values[self.offset(b, t, y, x)]
    }

    #[inline]
    pub fn set(&mut self, b: usize, t: usize, y: usize, x: usize, v: f64) {
        let i = self.offset(b, t, y, x);
        self.values[i] = v;
    }

    /// All values of one band.
    pub fn band(&self, b: usize) -> &[f64] {
        let n = self.band_len();
        &self.values[b * n..(b + 1) * n]
    }

    pub fn band_mut(&mut self, b: usize) -> &mut [f64] {
        let n = self.band_len();
        &mut self.values[b * n..(b + 1) * n]
    }

    /// One `ny * nx` plane of a band.
    pub fn plane(&self, b: usize, t: usize) -> &[f64] {
        let n = self.plane_len();
        let start = (b * self.shape[1] + t) * n;
        &self.values[start..start + n]
    }

    pub fn plane_mut(&mut self, b: usize, t: usize) -> &mut [f64] {
        let n = self.plane_len();
        let start = (b * self.shape[1] + t) * n;
        &mut self.values[start..start + n]
    }

    /// True if every value is nodata.
    pub fn all_nodata(&self) -> bool {
        self.values.iter().all(|v| v.is_nan())
    }

    /// Memory held by the values.
    pub fn size_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<f64>()
    }

    /// Serialize as four little-endian i32 counts followed by the values as
    /// little-endian f64 in `[bands, t, y, x]` order.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.size_bytes());
        for dim in self.shape {
            buf.put_i32_le(dim as i32);
        }
        for v in &self.values {
            buf.put_f64_le(*v);
        }
        buf.freeze()
    }

    /// Parse the layout written by [`encode`](Self::encode).
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(CubeError::Serialization(format!(
                "chunk buffer of {} bytes is shorter than its header",
                data.len()
            )));
        }
        let mut shape = [0usize; 4];
        for dim in shape.iter_mut() {
            let v = data.get_i32_le();
            if v <= 0 {
                return Err(CubeError::Serialization(format!(
                    "invalid chunk dimension {}",
                    v
                )));
            }
            *dim = v as usize;
        }
        let count = shape
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .ok_or_else(|| {
                CubeError::Serialization(format!("chunk shape {:?} overflows", shape))
            })?;
        let value_bytes = count.checked_mul(8).ok_or_else(|| {
            CubeError::Serialization(format!("chunk shape {:?} overflows", shape))
        })?;
        if data.remaining() != value_bytes {
            return Err(CubeError::Serialization(format!(
                "chunk of shape {:?} needs {} value bytes, got {}",
                shape,
                value_bytes,
                data.remaining()
            )));
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(data.get_f64_le());
        }
        Ok(Self { shape, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_row_major() {
        let mut c = ChunkData::nodata([2, 3, 4, 5]);
        c.set(1, 2, 3, 4, 7.0);
        assert_eq!(c.values()[c.values().len() - 1], 7.0);
        assert_eq!(c.get(1, 2, 3, 4), 7.0);
        assert_eq!(c.offset(0, 1, 0, 0), 20);
        assert_eq!(c.plane(1, 2)[19], 7.0);
    }

    #[test]
    fn test_encode_layout() {
        let c = ChunkData::from_values([1, 1, 1, 2], vec![1.5, f64::NAN]).unwrap();
        let bytes = c.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 16);
        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2i32.to_le_bytes());
        assert_eq!(&bytes[16..24], &1.5f64.to_le_bytes());

        let back = ChunkData::decode(&bytes).unwrap();
        assert_eq!(back.shape(), [1, 1, 1, 2]);
        assert_eq!(back.get(0, 0, 0, 0), 1.5);
        assert!(back.get(0, 0, 0, 1).is_nan());
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        let c = ChunkData::filled([1, 1, 2, 2], 0.0);
        let bytes = c.encode();
        assert!(ChunkData::decode(&bytes[..bytes.len() - 8]).is_err());
        assert!(ChunkData::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_headers() {
        let mut huge = Vec::new();
        for _ in 0..4 {
            huge.extend_from_slice(&i32::MAX.to_le_bytes());
        }
        assert!(matches!(
            ChunkData::decode(&huge),
            Err(CubeError::Serialization(_))
        ));

        let mut empty = Vec::new();
        for dim in [1i32, 0, 2, 2] {
            empty.extend_from_slice(&dim.to_le_bytes());
        }
        assert!(matches!(
            ChunkData::decode(&empty),
            Err(CubeError::Serialization(_))
        ));
    }

    #[test]
    fn test_from_values_checks_length() {
        assert!(ChunkData::from_values([1, 1, 2, 2], vec![0.0; 3]).is_err());
        assert!(ChunkData::nodata([1, 1, 2, 2]).all_nodata());
        assert_eq!(ChunkData::nodata([1, 2, 2, 2]).size_bytes(), 64);
    }
}
