// Compression seam for encoded batches.
//
// The codec joins records into one string and hands it to a `Compressor`
// before framing. Any implementation satisfying
// `decompress(compress(s)) == s` is interchangeable, as long as both ends of
// a connection agree. The relay uses `Zlib` on the wire; `Uncompressed` keeps
// the batch readable, which is what the codec tests use to inspect layout.
//
// Decompression stops at `MAX_BATCH_LEN` bytes of output, so a small frame
// cannot inflate into an unbounded allocation.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::CodecError;

/// Largest decompressed batch either side will produce or accept (64 MiB).
pub const MAX_BATCH_LEN: usize = 64 * 1024 * 1024;

pub trait Compressor {
    fn compress(&self, text: &str) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, bytes: &[u8]) -> Result<String, CodecError>;
}

/// zlib via `flate2`.
#[derive(Clone, Copy, Debug)]
pub struct Zlib {
    level: Compression,
}

impl Zlib {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Zlib {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for Zlib {
    fn compress(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        check_batch_len(text.len())?;
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(text.as_bytes())
            .map_err(CodecError::Compress)?;
        encoder.finish().map_err(CodecError::Compress)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<String, CodecError> {
        // One byte past the cap is enough to tell "at the limit" from "over".
        let mut decoder = ZlibDecoder::new(bytes).take(MAX_BATCH_LEN as u64 + 1);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(CodecError::Decompress)?;
        check_batch_len(out.len())?;
        Ok(String::from_utf8(out)?)
    }
}

/// UTF-8 passthrough.
#[derive(Clone, Copy, Debug, Default)]
pub struct Uncompressed;

impl Compressor for Uncompressed {
    fn compress(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        check_batch_len(text.len())?;
        Ok(text.as_bytes().to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> Result<String, CodecError> {
        check_batch_len(bytes.len())?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

fn check_batch_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_BATCH_LEN {
        return Err(CodecError::TooLarge { max: MAX_BATCH_LEN });
    }
    Ok(())
}
