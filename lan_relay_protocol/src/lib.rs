// lan_relay_protocol: wire protocol for the LAN peer relay.
//
// Shared by the relay server and its clients (`lan_relay`). Pure data and
// byte handling: no threads, no sockets, no role state.
//
// Module overview:
// - `types.rs`:       `SessionHandle`, the per-connection identifier.
// - `message.rs`:     `Message`, `Receivers`, `Classification`, `Origin`, and
//                     the constructors for protocol-internal messages.
// - `codec.rs`:       Separator-delimited records, batch encode/decode with
//                     the malformed-fragment guard, roster sub-encoding.
// - `compression.rs`: `Compressor` seam; zlib on the wire.
// - `framing.rs`:     4-byte big-endian length prefix per batch.
// - `error.rs`:       `CodecError`.
//
// Design decisions:
// - **Text records, compressed.** Each batch is one string of control-char
//   separated records, zlib-compressed as a unit, so a roster snapshot plus
//   its announcements cost one frame.
// - **Classification is stamped, not chosen.** Applications pick
//   `Receivers`; the relay derives the routing kind from its own role when
//   sending.

pub mod codec;
pub mod compression;
pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use codec::{
    FIELD_SEP, MIN_RECORD_LEN, REC_SEP, SUB_SEP, decode_batch, decode_batch_with, decode_record,
    encode_batch, encode_batch_with, encode_record, is_valid_unique_id, join_roster, split_roster,
};
pub use compression::{Compressor, MAX_BATCH_LEN, Uncompressed, Zlib};
pub use error::CodecError;
pub use framing::{MAX_FRAME_SIZE, read_frame, write_frame};
pub use message::{Classification, Message, Origin, Receivers};
pub use types::SessionHandle;
