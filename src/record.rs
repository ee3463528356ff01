//! Wire record type and its protocol-buffer-compatible framing helpers
//! (spec §3, "Record").
//!
//! The message shapes themselves live in `proto/log.proto` and are
//! generated by `tonic_build` in `build.rs` (the pattern vector's
//! `build.rs`/`lib/loki-logproto/build.rs` use for their own wire types).
//! Re-exported here as `Record` so the store/index/segment/log layer
//! doesn't need to know about the `pb` module.

use prost::Message;

pub use crate::pb::Record;

use crate::error::LogResult;

/// Serialize a `Record` with its length-delimited, protocol-buffer wire
/// encoding (spec §3).
pub fn encode_record(record: &Record) -> Vec<u8> {
    record.encode_to_vec()
}

pub fn decode_record(bytes: &[u8]) -> LogResult<Record> {
    Ok(Record::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let rec = Record {
            value: b"hello world".to_vec(),
            offset: 7,
            server: "node-a".to_string(),
        };
        let encoded = encode_record(&rec);
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }
}
