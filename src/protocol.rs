//! Shared protocol constants for the handoff framed transport

use serde::{Deserialize, Serialize};

/// Length prefix width on the wire (u32, little-endian)
pub const LEN_PREFIX: usize = 4;

// Catalog/handshake packets are a name and a size; anything past this is garbage
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

// Buffered halves for each connection
pub const CONN_BUFFER_SIZE: usize = 32 * 1024;

// Chunk size for streaming file bodies
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Copy buffer length for a body of `size` bytes. Clamped in u64 so bodies
/// past `usize::MAX` on 32-bit targets still get a full chunk.
pub fn copy_buffer_len(size: u64) -> usize {
    size.clamp(1, COPY_CHUNK_SIZE as u64) as usize
}

pub const DEFAULT_PORT: u16 = 8877;

pub mod timeouts {
    // Upper bound for draining handlers after shutdown is triggered (ms)
    pub const SHUTDOWN_MS: u64 = 5_000;

    // Connection establishment timeout for the client (ms)
    pub const CONNECT_MS: u64 = 10_000;
}

/// Packet type tags. Numeric values are stable on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PacketKind {
    FileMeta,
    FileQuantity,
    EndOfTransmission,
    ConfirmAccept,
    AcceptFile,
    RejectFile,
    /// A tag this build does not know. Decoding never fails on it; the
    /// phase that receives it reports a protocol violation.
    Unknown(u8),
}

impl PacketKind {
    pub const FILE_META: u8 = 0;
    pub const FILE_QUANTITY: u8 = 1;
    pub const END_OF_TRANSMISSION: u8 = 2;
    pub const CONFIRM_ACCEPT: u8 = 3;
    pub const ACCEPT_FILE: u8 = 4;
    pub const REJECT_FILE: u8 = 5;
}

impl From<u8> for PacketKind {
    fn from(v: u8) -> Self {
        match v {
            Self::FILE_META => PacketKind::FileMeta,
            Self::FILE_QUANTITY => PacketKind::FileQuantity,
            Self::END_OF_TRANSMISSION => PacketKind::EndOfTransmission,
            Self::CONFIRM_ACCEPT => PacketKind::ConfirmAccept,
            Self::ACCEPT_FILE => PacketKind::AcceptFile,
            Self::REJECT_FILE => PacketKind::RejectFile,
            other => PacketKind::Unknown(other),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        match k {
            PacketKind::FileMeta => PacketKind::FILE_META,
            PacketKind::FileQuantity => PacketKind::FILE_QUANTITY,
            PacketKind::EndOfTransmission => PacketKind::END_OF_TRANSMISSION,
            PacketKind::ConfirmAccept => PacketKind::CONFIRM_ACCEPT,
            PacketKind::AcceptFile => PacketKind::ACCEPT_FILE,
            PacketKind::RejectFile => PacketKind::REJECT_FILE,
            PacketKind::Unknown(v) => v,
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::FileMeta => f.write_str("FileMeta"),
            PacketKind::FileQuantity => f.write_str("FileQuantity"),
            PacketKind::EndOfTransmission => f.write_str("EndOfTransmission"),
            PacketKind::ConfirmAccept => f.write_str("ConfirmAccept"),
            PacketKind::AcceptFile => f.write_str("AcceptFile"),
            PacketKind::RejectFile => f.write_str("RejectFile"),
            PacketKind::Unknown(v) => write!(f, "Unknown({})", v),
        }
    }
}
