//! Wire protocol for barge file transfers.
//!
//! Everything on the wire is a length-prefixed [`frame`]: commands and
//! status replies are UTF-8 text payloads, file data is streamed as binary
//! frames terminated by the [`frame::EOF_SENTINEL`] sentinel frame. No
//! message boundary is ever inferred from payload content.

pub mod command;
pub mod frame;
pub mod range;
pub mod reply;

pub use command::{Command, CommandError};
pub use frame::{EOF_SENTINEL, FrameDecoder, MAX_FRAME_LEN, read_frame, write_frame};
pub use range::{RangeTask, partition};
pub use reply::StatusLine;

use std::collections::BTreeMap;

/// Payload length of a file-data frame (the final frame of a range is
/// capped to the bytes remaining).
///
/// 4 KiB is the protocol minimum; larger frames amortize the 4-byte header
/// over big transfers.
pub const DATA_FRAME_LEN: usize = 64 * 1024;

/// Serializes a catalog listing (`name -> size`) as the `LIST` payload.
pub fn encode_listing(files: &BTreeMap<String, u64>) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(files)?)
}

/// Parses a `LIST` payload back into a catalog listing.
pub fn decode_listing(payload: &[u8]) -> Result<BTreeMap<String, u64>, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Errors produced by the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the protocol maximum")]
    FrameTooLarge(usize),

    #[error("connection closed mid-frame")]
    ConnectionClosed,

    #[error("reply is not valid UTF-8")]
    MalformedReply,

    #[error("listing payload error: {0}")]
    Listing(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_roundtrip() {
        let mut files = BTreeMap::new();
        files.insert("a.bin".to_string(), 10u64);
        files.insert("big.mp4".to_string(), 147_849_216u64);

        let payload = encode_listing(&files).unwrap();
        let parsed = decode_listing(&payload).unwrap();
        assert_eq!(parsed, files);
    }

    #[test]
    fn listing_is_json_object() {
        let mut files = BTreeMap::new();
        files.insert("a.bin".to_string(), 10u64);
        let payload = encode_listing(&files).unwrap();
        assert_eq!(std::str::from_utf8(&payload).unwrap(), r#"{"a.bin":10}"#);
    }

    #[test]
    fn empty_listing_roundtrip() {
        let files = BTreeMap::new();
        let payload = encode_listing(&files).unwrap();
        assert!(decode_listing(&payload).unwrap().is_empty());
    }
}
