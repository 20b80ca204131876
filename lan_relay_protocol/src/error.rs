// Error type for the wire codec.
//
// Whole-batch failures (compression, decompression, size cap) and per-record failures
// (too short, wrong field count, unknown integer code) share one enum. The
// batch decoder turns per-record failures into a logged skip; only the
// whole-batch kinds ever reach a caller of `decode_batch`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("batch exceeds {max} bytes uncompressed")]
    TooLarge { max: usize },

    #[error("decompressed batch is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("record too short: {len} chars (min {min})")]
    TooShort { len: usize, min: usize },

    #[error("record has {found} fields, expected 6")]
    FieldCount { found: usize },

    #[error("invalid {field} code: {value:?}")]
    InvalidCode { field: &'static str, value: String },
}
