// Batch codec: messages to one transmission unit and back.
//
// Decompressed layout of a batch:
//
//   REC_SEP class FIELD_SEP sender FIELD_SEP receiver FIELD_SEP receivers
//           FIELD_SEP tag FIELD_SEP content   (repeated per message)
//
// `class` and `receivers` are decimal codes (see `message.rs`); absent IDs
// are empty strings. Roster snapshots put a SUB_SEP-joined ID list in
// `content`. The separators are ASCII control characters; payloads that
// contain them are outside what the format supports.
//
// Decoding never fails on a bad record. Fragments that are too short or have
// the wrong shape are logged and skipped, and the rest of the batch is still
// returned. Only a batch that cannot be decompressed at all is an error.

use tracing::warn;

use crate::compression::{Compressor, Zlib};
use crate::error::CodecError;
use crate::message::{Classification, Message, Receivers, parse_code};

/// Precedes every record in a batch.
pub const REC_SEP: char = '\u{1E}';
/// Separates the six fields of a record.
pub const FIELD_SEP: char = '\u{1F}';
/// Separates IDs inside a roster snapshot's content.
pub const SUB_SEP: char = '\u{1D}';

/// Shortest fragment that could be a record: two one-digit codes, four empty
/// fields, five separators.
pub const MIN_RECORD_LEN: usize = 7;

const FIELD_COUNT: usize = 6;

/// Encode one message as a record (without the leading `REC_SEP`).
pub fn encode_record(msg: &Message) -> String {
    let fields = [
        msg.classification().code().to_string(),
        msg.sender_unique_id.clone().unwrap_or_default(),
        msg.receiver_unique_id.clone().unwrap_or_default(),
        msg.receivers.code().to_string(),
        msg.tag.clone(),
        msg.content.clone(),
    ];
    fields.join(FIELD_SEP.to_string().as_str())
}

/// Parse one record (without the leading `REC_SEP`).
pub fn decode_record(fragment: &str) -> Result<Message, CodecError> {
    let len = fragment.chars().count();
    if len < MIN_RECORD_LEN {
        return Err(CodecError::TooShort {
            len,
            min: MIN_RECORD_LEN,
        });
    }

    let fields: Vec<&str> = fragment.splitn(FIELD_COUNT, FIELD_SEP).collect();
    let &[class, sender, receiver, receivers, tag, content] = fields.as_slice() else {
        return Err(CodecError::FieldCount {
            found: fields.len(),
        });
    };

    let classification = Classification::from_code(parse_code("classification", class)?)
        .ok_or_else(|| CodecError::InvalidCode {
            field: "classification",
            value: class.to_string(),
        })?;
    let receivers = Receivers::from_code(parse_code("receivers", receivers)?).ok_or_else(|| {
        CodecError::InvalidCode {
            field: "receivers",
            value: receivers.to_string(),
        }
    })?;

    Ok(Message::from_wire(
        classification,
        non_empty(sender),
        non_empty(receiver),
        receivers,
        tag.to_string(),
        content.to_string(),
    ))
}

/// Encode a batch with the wire compressor.
pub fn encode_batch(messages: &[Message]) -> Result<Vec<u8>, CodecError> {
    encode_batch_with(&Zlib::default(), messages)
}

pub fn encode_batch_with<C: Compressor + ?Sized>(
    compressor: &C,
    messages: &[Message],
) -> Result<Vec<u8>, CodecError> {
    let mut text = String::new();
    for msg in messages {
        text.push(REC_SEP);
        text.push_str(&encode_record(msg));
    }
    compressor.compress(&text)
}

/// Decode a batch produced by `encode_batch`.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
    decode_batch_with(&Zlib::default(), bytes)
}

pub fn decode_batch_with<C: Compressor + ?Sized>(
    compressor: &C,
    bytes: &[u8],
) -> Result<Vec<Message>, CodecError> {
    let text = compressor.decompress(bytes)?;
    let mut messages = Vec::new();
    for fragment in text.split(REC_SEP).filter(|f| !f.is_empty()) {
        match decode_record(fragment) {
            Ok(msg) => messages.push(msg),
            Err(err) => {
                warn!(error = %err, fragment_len = fragment.len(), "dropping malformed record");
            }
        }
    }
    Ok(messages)
}

/// Join roster IDs for a ClientOnline snapshot.
pub fn join_roster<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter()
        .collect::<Vec<_>>()
        .join(SUB_SEP.to_string().as_str())
}

/// Split a ClientOnline snapshot back into IDs, dropping empty entries.
pub fn split_roster(content: &str) -> impl Iterator<Item = &str> {
    content.split(SUB_SEP).filter(|id| !id.is_empty())
}

/// A Unique ID is usable when it is non-empty and contains none of the
/// separators, so it survives both the record fields and a roster snapshot.
pub fn is_valid_unique_id(id: &str) -> bool {
    !id.is_empty() && !id.contains([REC_SEP, FIELD_SEP, SUB_SEP])
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Uncompressed;
    use crate::message::Origin;

    fn chat(sender: &str, content: &str) -> Message {
        Message::new(Receivers::AllClients, "chat", content).stamp(Origin::Client, Some(sender.into()))
    }

    #[test]
    fn record_layout() {
        let msg = Message::to_client("Bob", "chat", "ping").stamp(Origin::Server, None);
        let record = encode_record(&msg);
        assert_eq!(record, "10\u{1F}\u{1F}Bob\u{1F}1\u{1F}chat\u{1F}ping");
    }

    #[test]
    fn batch_prefixes_every_record() {
        let batch = vec![chat("A", "one"), chat("B", "two")];
        let bytes = encode_batch_with(&Uncompressed, &batch).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches(REC_SEP).count(), 2);
        assert!(text.starts_with(REC_SEP));
    }

    #[test]
    fn batch_roundtrip_preserves_order_and_fields() {
        let batch = vec![
            chat("Alice", "hi"),
            Message::connection("Alice", "h-1"),
            Message::change_id("h-1", "Alice1"),
            Message::client_online("Alice1", join_roster(["Alice", "Alice1"])),
            Message::client_disconnected("Bob"),
            Message::to_client("Bob", "dm", "psst").stamp(Origin::Client, Some("Alice".into())),
        ];
        let decoded = decode_batch(&encode_batch(&batch).unwrap()).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn empty_batch_decodes_to_nothing() {
        let decoded = decode_batch(&encode_batch(&[]).unwrap()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn absent_ids_decode_as_none() {
        let msg = Message::client_connected("Carol");
        let decoded = decode_record(&encode_record(&msg)).unwrap();
        assert!(decoded.sender_unique_id.is_none());
        assert!(decoded.receiver_unique_id.is_none());
        assert_eq!(decoded.content, "Carol");
    }

    #[test]
    fn malformed_fragments_are_skipped() {
        let good = encode_record(&chat("Alice", "kept"));
        let too_short = "6\u{1F}x";
        let few_fields = "6\u{1F}Alice\u{1F}\u{1F}2\u{1F}chat-without-content";
        let bad_code = "99\u{1F}Alice\u{1F}\u{1F}2\u{1F}chat\u{1F}x";
        let text = format!(
            "{REC_SEP}{too_short}{REC_SEP}{good}{REC_SEP}{few_fields}{REC_SEP}{REC_SEP}{bad_code}{REC_SEP}{good}"
        );
        let decoded = decode_batch_with(&Uncompressed, text.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(|m| m.content == "kept"));
    }

    #[test]
    fn short_record_error() {
        let err = decode_record("1\u{1F}2").unwrap_err();
        assert!(matches!(err, CodecError::TooShort { len: 3, .. }));
    }

    #[test]
    fn field_count_error() {
        let err = decode_record("6\u{1F}Alice\u{1F}Bob\u{1F}2\u{1F}chat").unwrap_err();
        assert!(matches!(err, CodecError::FieldCount { found: 5 }));
    }

    #[test]
    fn non_numeric_code_error() {
        let err = decode_record("x\u{1F}Alice\u{1F}Bob\u{1F}2\u{1F}chat\u{1F}hi").unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidCode {
                field: "classification",
                ..
            }
        ));
    }

    #[test]
    fn extra_field_separators_stay_in_content() {
        let msg = chat("Alice", "a\u{1F}b");
        let decoded = decode_record(&encode_record(&msg)).unwrap();
        assert_eq!(decoded.content, "a\u{1F}b");
    }

    #[test]
    fn undecompressable_batch_is_an_error() {
        assert!(decode_batch(b"garbage").is_err());
    }

    #[test]
    fn roster_join_and_split() {
        let joined = join_roster(["Alice", "Bob", "Carol"]);
        assert_eq!(joined, "Alice\u{1D}Bob\u{1D}Carol");
        let ids: Vec<&str> = split_roster(&joined).collect();
        assert_eq!(ids, ["Alice", "Bob", "Carol"]);
        assert_eq!(split_roster("").count(), 0);
    }

    #[test]
    fn unique_ids_reject_separators_and_emptiness() {
        assert!(is_valid_unique_id("Alice"));
        assert!(is_valid_unique_id("Bob 2 ✓"));
        assert!(!is_valid_unique_id(""));
        for sep in [REC_SEP, FIELD_SEP, SUB_SEP] {
            assert!(!is_valid_unique_id(&format!("a{sep}b")));
        }
    }
}
