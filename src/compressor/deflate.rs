//! DEFLATE backend, via `flate2`, for hosts that prefer ratio over speed.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::read::DeflateDecoder;
use flate2::Compression;
use std::io::Read;

use super::{Compressor, CompressorError};

#[derive(Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CompressorError> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(dst.len()), Compression::fast());
        encoder.write_all(src).map_err(|_| CompressorError::Overflow)?;
        let out = encoder.finish().map_err(|_| CompressorError::Overflow)?;
        if out.len() > dst.len() {
            return Err(CompressorError::Overflow);
        }
        dst[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), CompressorError> {
        let mut decoder = DeflateDecoder::new(src);
        // `read` is allowed to return short even when more output remains, so filling `dst` takes
        // `read_exact` rather than trusting a single call to saturate the buffer.
        decoder
            .read_exact(dst)
            .map_err(|_| CompressorError::Corrupt)?;
        // Any trailing bytes mean the stream decoded to more than `dst` can hold.
        let mut trailing = [0u8; 1];
        if decoder.read(&mut trailing).map_err(|_| CompressorError::Corrupt)? != 0 {
            return Err(CompressorError::Corrupt);
        }
        Ok(())
    }
}
