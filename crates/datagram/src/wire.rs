//! Datagram wire format.
//!
//! ```text
//! REQUEST  (client -> server, UTF-8 text):
//!   "RETR <name> <chunk_id> <offset> <length>"
//!
//! RESPONSE (server -> client):
//!   [1 byte tag][4 bytes BE chunk_id][payload]
//!   tag 0x01: payload is the requested file bytes
//!   tag 0x00: payload is an error line (UTF-8 text)
//! ```
//!
//! The response payload is raw bytes, so binary files survive intact. One
//! chunk must fit one datagram; the server refuses anything larger.

/// Response tag: payload is file data.
pub const TAG_DATA: u8 = 0x01;

/// Response tag: payload is an error line.
pub const TAG_ERROR: u8 = 0x00;

/// Response header length (tag + chunk id).
pub const RESPONSE_HEADER_LEN: usize = 5;

/// Largest chunk payload served in one datagram.
///
/// UDP caps a datagram around 64 KiB; this leaves headroom for the header.
pub const MAX_CHUNK_LEN: usize = 60 * 1024;

/// Receive buffers must hold a full data response.
pub const MAX_RESPONSE_LEN: usize = RESPONSE_HEADER_LEN + MAX_CHUNK_LEN;

/// A chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub name: String,
    pub chunk_id: u32,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRequest {
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "RETR {} {} {} {}",
            self.name, self.chunk_id, self.offset, self.length
        )
        .into_bytes()
    }

    /// Parses a request datagram; anything malformed is `None`.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(datagram).ok()?;
        let mut parts = text.split_whitespace();
        if !parts.next()?.eq_ignore_ascii_case("RETR") {
            return None;
        }
        let name = parts.next()?.to_string();
        let chunk_id = parts.next()?.parse().ok()?;
        let offset = parts.next()?.parse().ok()?;
        let length = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            name,
            chunk_id,
            offset,
            length,
        })
    }
}

/// A response datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    Data { chunk_id: u32, payload: Vec<u8> },
    Error { chunk_id: u32, message: String },
}

impl ChunkResponse {
    pub fn chunk_id(&self) -> u32 {
        match self {
            ChunkResponse::Data { chunk_id, .. } | ChunkResponse::Error { chunk_id, .. } => {
                *chunk_id
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (tag, chunk_id, body) = match self {
            ChunkResponse::Data { chunk_id, payload } => (TAG_DATA, *chunk_id, payload.as_slice()),
            ChunkResponse::Error { chunk_id, message } => {
                (TAG_ERROR, *chunk_id, message.as_bytes())
            }
        };
        let mut datagram = Vec::with_capacity(RESPONSE_HEADER_LEN + body.len());
        datagram.push(tag);
        datagram.extend_from_slice(&chunk_id.to_be_bytes());
        datagram.extend_from_slice(body);
        datagram
    }

    /// Parses a response datagram; anything malformed is `None`.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        if datagram.len() < RESPONSE_HEADER_LEN {
            return None;
        }
        let chunk_id = u32::from_be_bytes(datagram[1..RESPONSE_HEADER_LEN].try_into().ok()?);
        let body = &datagram[RESPONSE_HEADER_LEN..];
        match datagram[0] {
            TAG_DATA => Some(ChunkResponse::Data {
                chunk_id,
                payload: body.to_vec(),
            }),
            TAG_ERROR => Some(ChunkResponse::Error {
                chunk_id,
                message: String::from_utf8(body.to_vec()).ok()?,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = ChunkRequest {
            name: "blob.bin".into(),
            chunk_id: 3,
            offset: 4096,
            length: 1024,
        };
        assert_eq!(ChunkRequest::parse(&req.encode()).unwrap(), req);
        assert_eq!(req.encode(), b"RETR blob.bin 3 4096 1024");
    }

    #[test]
    fn request_rejects_malformed_input() {
        assert!(ChunkRequest::parse(b"").is_none());
        assert!(ChunkRequest::parse(b"LIST").is_none());
        assert!(ChunkRequest::parse(b"RETR blob.bin").is_none());
        assert!(ChunkRequest::parse(b"RETR blob.bin 1 2").is_none());
        assert!(ChunkRequest::parse(b"RETR blob.bin one 2 3").is_none());
        assert!(ChunkRequest::parse(b"RETR blob.bin 1 2 3 extra").is_none());
        assert!(ChunkRequest::parse(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn data_response_is_binary_safe() {
        let payload = vec![0u8, 255, 1, 0x45, 0x4f, 0x46, 254];
        let resp = ChunkResponse::Data {
            chunk_id: 7,
            payload: payload.clone(),
        };
        match ChunkResponse::parse(&resp.encode()).unwrap() {
            ChunkResponse::Data {
                chunk_id,
                payload: parsed,
            } => {
                assert_eq!(chunk_id, 7);
                assert_eq!(parsed, payload);
            }
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn error_response_roundtrip() {
        let resp = ChunkResponse::Error {
            chunk_id: 2,
            message: "550 File unavailable: x.bin".into(),
        };
        assert_eq!(ChunkResponse::parse(&resp.encode()).unwrap(), resp);
    }

    #[test]
    fn response_rejects_unknown_tag_and_short_datagrams() {
        assert!(ChunkResponse::parse(&[]).is_none());
        assert!(ChunkResponse::parse(&[TAG_DATA, 0, 0]).is_none());
        assert!(ChunkResponse::parse(&[0x7f, 0, 0, 0, 1, b'x']).is_none());
    }
}
