//! Error taxonomy for the transfer core.
//!
//! Framing errors, protocol violations and filesystem errors end the
//! connection. A disconnect (`is_disconnect`) ends it quietly.

use crate::protocol::PacketKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Peer closed the stream on a frame boundary.
    #[error("connection closed by peer")]
    Closed,

    #[error("unexpected end of stream: got {got} of {expected} frame bytes")]
    Truncated { got: usize, expected: usize },

    #[error("frame payload too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("undecodable packet payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("packet encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("protocol violation: expected {expected}, got {got}")]
    UnexpectedPacket { expected: &'static str, got: PacketKind },

    #[error("protocol violation: peer offered {0:?} which is not in the catalog")]
    UnknownFile(String),

    #[error("protocol violation: {0:?} is not a plain file name")]
    InvalidName(String),

    #[error("duplicate file name in catalog: {0:?}")]
    DuplicateFile(String),

    #[error("protocol violation: negative size {size} announced for {name:?}")]
    NegativeSize { name: String, size: i64 },

    #[error("{}: {kind}", path.display())]
    Stat { path: PathBuf, kind: StatFailure },

    #[error("{}: source shrank after announce: sent {sent} of {expected} bytes", path.display())]
    SourceShrank { path: PathBuf, sent: u64, expected: u64 },

    #[error("{name}: unexpected EOF: got {got} bytes, expected {expected}")]
    ShortTransfer { name: String, got: u64, expected: u64 },

    #[error("{}: cannot create: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a source file could not be offered.
#[derive(Debug, Error)]
pub enum StatFailure {
    #[error("does not exist")]
    NotFound,
    #[error("is a directory")]
    IsDirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0}")]
    Other(#[source] io::Error),
}

impl From<io::Error> for StatFailure {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StatFailure::NotFound,
            io::ErrorKind::PermissionDenied => StatFailure::PermissionDenied,
            _ => StatFailure::Other(e),
        }
    }
}

impl Error {
    /// True when the peer went away (or its socket was force-closed during
    /// shutdown) outside of a file body copy.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Closed => true,
            Error::Io(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }

    /// True for a packet of the wrong kind, or carrying fields the current
    /// phase cannot accept.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedPacket { .. }
                | Error::UnknownFile(_)
                | Error::InvalidName(_)
                | Error::DuplicateFile(_)
                | Error::NegativeSize { .. }
        )
    }

    pub(crate) fn unexpected(expected: &'static str, got: PacketKind) -> Self {
        Error::UnexpectedPacket { expected, got }
    }
}

/// I/O error kinds produced by a peer going away or a force-closed socket.
pub(crate) fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
