//! Status replies: one text frame per line, `"<3-digit code> <message>"`.
//!
//! The codes are informational. Clients key behavior off exactly one thing,
//! the literal `150` prefix that signals "proceed"; every other reply aborts
//! the exchange that prompted it.

use crate::ProtocolError;
use crate::command::CommandError;

pub const FILE_STATUS_OK: &str = "150 File status ok";
pub const GOODBYE: &str = "221 Goodbye!";
pub const PERMISSIONS_SENT: &str = "226 File permissions sent";
pub const TRANSFER_COMPLETE: &str = "226 Transfer complete";
pub const PERMISSIONS_UNAVAILABLE: &str = "550 File permissions unavailable";

/// `501` reply for a command that failed to parse.
pub fn syntax_error(error: &CommandError) -> String {
    format!("501 Syntax error: {error}")
}

/// `550` reply for a name the catalog does not permit.
pub fn file_unavailable(name: &str) -> String {
    format!("550 File unavailable: {name}")
}

/// `550` reply for a permitted file that is missing on disk.
pub fn file_missing(name: &str) -> String {
    format!("550 File missing: {name}")
}

/// `550` reply for a range outside the cataloged size.
pub fn range_not_satisfiable(name: &str) -> String {
    format!("550 Range not satisfiable: {name}")
}

/// A received status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    raw: String,
}

impl StatusLine {
    /// Parses a reply frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let raw = std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::MalformedReply)?
            .to_string();
        Ok(Self { raw })
    }

    /// The literal reply text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the server signalled "proceed".
    pub fn proceed(&self) -> bool {
        self.raw.starts_with("150")
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
