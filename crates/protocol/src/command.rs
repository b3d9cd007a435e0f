//! Command grammar: the UTF-8 text payload of one request frame.
//!
//! Verbs are case-insensitive, arguments whitespace-delimited. Everything
//! that fails to parse becomes a typed [`CommandError`] whose rendering is
//! the detail of the server's `501 Syntax error` reply.

use std::fmt;

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the catalog of permitted files.
    List,
    /// Request a file, optionally a byte sub-range of it.
    ///
    /// `offset` defaults to 0 and `length` to the rest of the file; both
    /// defaults are resolved against the catalog on the server side.
    Retr {
        name: String,
        offset: Option<u64>,
        length: Option<u64>,
    },
    /// End the session.
    Quit,
}

/// Why a command frame failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Command is not valid UTF-8")]
    NotUtf8,

    #[error("Expected file name after RETR command")]
    MissingFileName,

    #[error("Expected a byte count, got {0:?}")]
    BadNumber(String),

    #[error("Unknown command {0}")]
    Unknown(String),
}

impl Command {
    /// Parses the text payload of a command frame.
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let text = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
        let mut parts = text.split_whitespace();
        let verb = parts.next().ok_or(CommandError::Empty)?;
        match verb.to_ascii_uppercase().as_str() {
            "LIST" => Ok(Command::List),
            "QUIT" => Ok(Command::Quit),
            "RETR" => {
                let name = parts
                    .next()
                    .ok_or(CommandError::MissingFileName)?
                    .to_string();
                let offset = parts.next().map(parse_count).transpose()?;
                let length = parts.next().map(parse_count).transpose()?;
                Ok(Command::Retr {
                    name,
                    offset,
                    length,
                })
            }
            _ => Err(CommandError::Unknown(text.trim().to_string())),
        }
    }

    /// Renders the command as a request frame payload.
    pub fn to_payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => f.write_str("LIST"),
            Command::Quit => f.write_str("QUIT"),
            Command::Retr {
                name,
                offset,
                length,
            } => {
                write!(f, "RETR {name}")?;
                if let Some(offset) = offset {
                    write!(f, " {offset}")?;
                }
                if let Some(length) = length {
                    write!(f, " {length}")?;
                }
                Ok(())
            }
        }
    }
}

fn parse_count(token: &str) -> Result<u64, CommandError> {
    token
        .parse()
        .map_err(|_| CommandError::BadNumber(token.to_string()))
}
