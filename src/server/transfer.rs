//! Per-connection state machine on the serving side:
//! Announce -> AwaitConfirm -> PerFileOffer -> Done

use crate::catalog::{build_catalog, CatalogEntry};
use crate::error::{is_disconnect_kind, Error, Result};
use crate::logger::TransferLogger;
use crate::packet::{read_frame, write_frame, Packet};
use crate::protocol::{copy_buffer_len, PacketKind, CONN_BUFFER_SIZE};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServeStats {
    pub offered: usize,
    pub confirmed: bool,
    pub files_sent: u64,
    pub bytes_sent: u64,
    pub rejected: u64,
}

/// Drive one connection through the whole handshake. The stream is dropped
/// (closed) when this returns.
pub async fn serve_connection<S>(
    stream: S,
    peer: &str,
    files: &[PathBuf],
    logger: &dyn TransferLogger,
) -> Result<ServeStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (rd, wr) = tokio::io::split(stream);
    let mut reader = BufReader::with_capacity(CONN_BUFFER_SIZE, rd);
    let mut writer = BufWriter::with_capacity(CONN_BUFFER_SIZE, wr);
    let mut stats = ServeStats::default();

    let catalog = announce(&mut writer, files).await?;
    stats.offered = catalog.len();
    logger.offered(peer, catalog.len(), catalog.iter().map(|e| e.size).sum());

    if !await_confirm(&mut reader).await? {
        info!(%peer, "client declined the catalog");
        return Ok(stats);
    }
    stats.confirmed = true;

    for entry in &catalog {
        write_frame(&mut writer, &Packet::file_meta(&entry.name)).await?;
        writer.flush().await?;

        let resp = read_frame(&mut reader).await?;
        match resp.kind() {
            PacketKind::RejectFile => {
                info!(%peer, file = %entry.name, "client rejected file");
                logger.rejected(peer, &entry.name);
                stats.rejected += 1;
            }
            PacketKind::AcceptFile => {
                let sent = send_file(&mut writer, entry).await?;
                writer.flush().await?;
                debug!(%peer, file = %entry.name, bytes = sent, "file sent");
                logger.sent(peer, &entry.name, sent);
                stats.files_sent += 1;
                stats.bytes_sent += sent;
            }
            other => return Err(Error::unexpected("AcceptFile or RejectFile", other)),
        }
    }
    Ok(stats)
}

/// Stat every file, then send one FileQuantity per file and EndOfTransmission.
/// Any stat failure aborts before anything is written.
async fn announce<W>(writer: &mut W, files: &[PathBuf]) -> Result<Vec<CatalogEntry>>
where
    W: AsyncWrite + Unpin,
{
    let catalog = build_catalog(files).await?;
    for entry in &catalog {
        write_frame(writer, &Packet::file_quantity(&entry.name, entry.size)).await?;
    }
    write_frame(writer, &Packet::control(PacketKind::EndOfTransmission)).await?;
    writer.flush().await?;
    Ok(catalog)
}

/// `Ok(false)` when the client declined: it closed the connection or sent
/// some other known packet. An unknown kind is a protocol violation.
async fn await_confirm<R>(reader: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await {
        Ok(p) => match p.kind() {
            PacketKind::ConfirmAccept => Ok(true),
            PacketKind::Unknown(_) => Err(Error::unexpected("ConfirmAccept", p.kind())),
            _ => Ok(false),
        },
        Err(Error::Closed) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Copy exactly the announced size. A file that shrank since Announce is a
/// hard error: the client is counting down bytes and cannot resynchronize.
async fn send_file<W>(writer: &mut W, entry: &CatalogEntry) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let file = tokio::fs::File::open(&entry.path).await.map_err(|e| Error::Stat {
        path: entry.path.clone(),
        kind: e.into(),
    })?;
    let mut src = file.take(entry.size);
    let mut buf = vec![0u8; copy_buffer_len(entry.size)];
    let mut sent: u64 = 0;
    while sent < entry.size {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::SourceShrank {
                path: entry.path.clone(),
                sent,
                expected: entry.size,
            });
        }
        if let Err(e) = writer.write_all(&buf[..n]).await {
            if is_disconnect_kind(e.kind()) {
                return Err(Error::ShortTransfer {
                    name: entry.name.clone(),
                    got: sent,
                    expected: entry.size,
                });
            }
            return Err(e.into());
        }
        sent += n as u64;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use tempfile::TempDir;
    use tokio::io::DuplexStream;

    async fn expect(peer: &mut DuplexStream, kind: PacketKind) -> Packet {
        let p = read_frame(peer).await.unwrap();
        assert_eq!(p.kind(), kind);
        p
    }

    fn write_files(dir: &TempDir, files: &[(&str, usize)]) -> Vec<PathBuf> {
        files
            .iter()
            .map(|(name, size)| {
                let p = dir.path().join(name);
                std::fs::write(&p, vec![b'x'; *size]).unwrap();
                p
            })
            .collect()
    }

    #[tokio::test]
    async fn test_announce_then_decline_by_close() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, &[("a", 10), ("b", 20)]);
        let (srv, mut cli) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move {
            serve_connection(srv, "test", &files, &NoopLogger).await
        });

        let a = expect(&mut cli, PacketKind::FileQuantity).await;
        assert_eq!((a.file_name(), a.file_size()), ("a", 10));
        let b = expect(&mut cli, PacketKind::FileQuantity).await;
        assert_eq!((b.file_name(), b.file_size()), ("b", 20));
        expect(&mut cli, PacketKind::EndOfTransmission).await;
        drop(cli);

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.offered, 2);
        assert!(!stats.confirmed);
        assert_eq!(stats.files_sent, 0);
    }

    #[tokio::test]
    async fn test_reject_then_accept() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, &[("skip.txt", 5), ("take.txt", 7)]);
        let (srv, mut cli) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move {
            serve_connection(srv, "test", &files, &NoopLogger).await
        });

        expect(&mut cli, PacketKind::FileQuantity).await;
        expect(&mut cli, PacketKind::FileQuantity).await;
        expect(&mut cli, PacketKind::EndOfTransmission).await;
        write_frame(&mut cli, &Packet::control(PacketKind::ConfirmAccept)).await.unwrap();

        let m = expect(&mut cli, PacketKind::FileMeta).await;
        assert_eq!(m.file_name(), "skip.txt");
        write_frame(&mut cli, &Packet::control(PacketKind::RejectFile)).await.unwrap();

        let m = expect(&mut cli, PacketKind::FileMeta).await;
        assert_eq!(m.file_name(), "take.txt");
        write_frame(&mut cli, &Packet::control(PacketKind::AcceptFile)).await.unwrap();

        let mut body = [0u8; 7];
        cli.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"xxxxxxx");

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.files_sent, 1);
        assert_eq!(stats.bytes_sent, 7);

        // nothing after the last body; the server just closes
        let mut rest = Vec::new();
        cli.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_aborts_before_any_packet() {
        let tmp = TempDir::new().unwrap();
        let mut files = write_files(&tmp, &[("here.txt", 3)]);
        files.push(tmp.path().join("gone.txt"));
        let (srv, mut cli) = tokio::io::duplex(1024);

        let err = serve_connection(srv, "test", &files, &NoopLogger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Stat { .. }));
        assert!(matches!(read_frame(&mut cli).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_unexpected_response_is_protocol_violation() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, &[("a", 1)]);
        let (srv, mut cli) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move {
            serve_connection(srv, "test", &files, &NoopLogger).await
        });

        expect(&mut cli, PacketKind::FileQuantity).await;
        expect(&mut cli, PacketKind::EndOfTransmission).await;
        write_frame(&mut cli, &Packet::control(PacketKind::ConfirmAccept)).await.unwrap();
        expect(&mut cli, PacketKind::FileMeta).await;
        write_frame(&mut cli, &Packet::control(PacketKind::Unknown(99))).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_unknown_kind_instead_of_confirm_is_reported() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, &[("a", 1)]);
        let (srv, mut cli) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move {
            serve_connection(srv, "test", &files, &NoopLogger).await
        });

        expect(&mut cli, PacketKind::FileQuantity).await;
        expect(&mut cli, PacketKind::EndOfTransmission).await;
        write_frame(&mut cli, &Packet::control(PacketKind::Unknown(42))).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedPacket { got: PacketKind::Unknown(42), .. }
        ));
    }

    #[tokio::test]
    async fn test_shrunk_source_is_copy_error() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, &[("shrinks.bin", 100)]);
        let path = files[0].clone();
        let (srv, mut cli) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move {
            serve_connection(srv, "test", &files, &NoopLogger).await
        });

        let q = expect(&mut cli, PacketKind::FileQuantity).await;
        assert_eq!(q.file_size(), 100);
        expect(&mut cli, PacketKind::EndOfTransmission).await;

        // truncate after the size went out, before the body is read
        std::fs::write(&path, vec![b'y'; 40]).unwrap();

        write_frame(&mut cli, &Packet::control(PacketKind::ConfirmAccept)).await.unwrap();
        expect(&mut cli, PacketKind::FileMeta).await;
        write_frame(&mut cli, &Packet::control(PacketKind::AcceptFile)).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        match err {
            Error::SourceShrank { sent, expected, .. } => {
                assert_eq!(sent, 40);
                assert_eq!(expected, 100);
            }
            other => panic!("expected SourceShrank, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_grown_source_sends_only_announced_size() {
        let tmp = TempDir::new().unwrap();
        let files = write_files(&tmp, &[("grows.bin", 8)]);
        let path = files[0].clone();
        let (srv, mut cli) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move {
            serve_connection(srv, "test", &files, &NoopLogger).await
        });

        expect(&mut cli, PacketKind::FileQuantity).await;
        expect(&mut cli, PacketKind::EndOfTransmission).await;
        std::fs::write(&path, vec![b'z'; 64]).unwrap();

        write_frame(&mut cli, &Packet::control(PacketKind::ConfirmAccept)).await.unwrap();
        expect(&mut cli, PacketKind::FileMeta).await;
        write_frame(&mut cli, &Packet::control(PacketKind::AcceptFile)).await.unwrap();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.bytes_sent, 8);
        let mut rest = Vec::new();
        cli.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![b'z'; 8]);
    }
}
