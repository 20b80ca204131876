// Length-delimited framing for compressed batches over a byte stream.
//
// A frame is a 4-byte big-endian length followed by that many bytes of
// encoded batch (see `codec.rs`). TCP gives us a byte stream, not messages,
// so this is what turns one `encode_batch` call into one `OnReceived` on the
// other side. Frames carry opaque bytes; decoding is the caller's job.
//
// `MAX_FRAME_SIZE` bounds the allocation a bogus length prefix can cause.

use std::io::{self, Read, Write};

/// Largest frame either side will write or accept (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, batch: &[u8]) -> io::Result<()> {
    let prefix = frame_len(batch.len(), io::ErrorKind::InvalidInput)?.to_be_bytes();
    writer.write_all(&prefix)?;
    writer.write_all(batch)?;
    writer.flush()
}

/// Read one frame.
///
/// A stream that closes before or inside a frame yields `UnexpectedEof`; a
/// length over `MAX_FRAME_SIZE` yields `InvalidData` without reading the body.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = frame_len(u32::from_be_bytes(prefix) as usize, io::ErrorKind::InvalidData)?;

    let mut body = Vec::with_capacity(len as usize);
    reader.by_ref().take(u64::from(len)).read_to_end(&mut body)?;
    if body.len() < len as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame cut short: {} of {len} bytes", body.len()),
        ));
    }
    Ok(body)
}

/// Validate a body length against `MAX_FRAME_SIZE`. Writers report an
/// oversized batch as `InvalidInput`, readers a bogus prefix as `InvalidData`.
fn frame_len(len: usize, kind: io::ErrorKind) -> io::Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                kind,
                format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
            )
        })
}
