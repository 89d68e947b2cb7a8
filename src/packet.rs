//! Packet codec: one protocol message per length-prefixed frame.
//!
//! Frame format: LENGTH (u32 LE, payload bytes only) | PAYLOAD (JSON)

use crate::error::{Error, Result};
use crate::protocol::{PacketKind, LEN_PREFIX, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A single protocol message. `kind` decides which of the other fields mean
/// anything; readers must not look at `file_name`/`file_size` for kinds
/// that don't define them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "DataType")]
    kind: PacketKind,
    #[serde(rename = "FileName", default)]
    file_name: String,
    #[serde(rename = "FileSize", default)]
    file_size: i64,
}

impl Packet {
    pub fn new(kind: PacketKind, file_name: impl Into<String>, file_size: i64) -> Self {
        Packet {
            kind,
            file_name: file_name.into(),
            file_size,
        }
    }

    /// Catalog entry announced during Announce.
    pub fn file_quantity(name: impl Into<String>, size: u64) -> Self {
        Packet::new(PacketKind::FileQuantity, name, size as i64)
    }

    /// Names the next file offered during PerFileOffer.
    pub fn file_meta(name: impl Into<String>) -> Self {
        Packet::new(PacketKind::FileMeta, name, 0)
    }

    /// Kinds that carry no fields (EndOfTransmission, ConfirmAccept, ...).
    pub fn control(kind: PacketKind) -> Self {
        Packet::new(kind, String::new(), 0)
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        serde_json::from_slice(bytes).map_err(Error::Decode)
    }
}

/// Validate frame payload size against MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// Build a complete frame (prefix + payload) in one buffer.
pub fn build_frame(packet: &Packet) -> Result<Vec<u8>> {
    let payload = packet.encode()?;
    validate_frame_size(payload.len())?;
    let mut buf = Vec::with_capacity(LEN_PREFIX + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Write one frame. The prefix and payload go out in a single `write_all`
/// so the codec never queues a prefix without its payload. Buffered writers
/// still need a flush.
pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = build_frame(packet)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read exactly one frame and decode it.
///
/// EOF before the first prefix byte is `Error::Closed`; EOF anywhere later in
/// the frame is `Error::Truncated`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; LEN_PREFIX];
    fill(reader, &mut hdr, 0, LEN_PREFIX).await?;
    let len = u32::from_le_bytes(hdr) as usize;
    validate_frame_size(len)?;
    let mut payload = vec![0u8; len];
    fill(reader, &mut payload, LEN_PREFIX, LEN_PREFIX + len).await?;
    Packet::decode(&payload)
}

async fn fill<R>(reader: &mut R, buf: &mut [u8], before: usize, frame_len: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut got = 0;
    while got < buf.len() {
        let n = reader.read(&mut buf[got..]).await?;
        if n == 0 {
            if before + got == 0 {
                return Err(Error::Closed);
            }
            return Err(Error::Truncated {
                got: before + got,
                expected: frame_len,
            });
        }
        got += n;
    }
    Ok(())
}
