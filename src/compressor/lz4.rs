//! LZ4 backend, via `lz4_flex`'s block format (no frame headers, so sizing stays exactly under
//! this crate's control).

use super::{Compressor, CompressorError};

#[derive(Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CompressorError> {
        let bound = lz4_flex::block::get_maximum_output_size(src.len());
        if dst.len() < bound {
            return Err(CompressorError::Overflow);
        }
        lz4_flex::block::compress_into(src, dst).map_err(|_| CompressorError::Overflow)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), CompressorError> {
        let n = lz4_flex::block::decompress_into(src, dst).map_err(|_| CompressorError::Corrupt)?;
        if n != dst.len() {
            return Err(CompressorError::Corrupt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_compressible_data() {
        let compressor = Lz4Compressor;
        let payload = vec![0xABu8; 4096];
        let mut compressed = vec![0u8; lz4_flex::block::get_maximum_output_size(payload.len())];
        let n = compressor.compress(&payload, &mut compressed).unwrap();
        assert!(n < payload.len(), "highly repetitive input should compress");

        let mut out = vec![0u8; payload.len()];
        compressor.decompress(&compressed[..n], &mut out).unwrap();
        assert_eq!(out, payload);
    }
}
