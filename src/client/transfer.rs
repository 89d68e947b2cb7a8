//! Receiving side of one session:
//! FetchCatalog -> Decide -> SendConfirm -> ReceiveLoop -> Done

use super::prompt::Prompt;
use super::CollisionPolicy;
use crate::error::{is_disconnect_kind, Error, Result};
use crate::logger::TransferLogger;
use crate::packet::{read_frame, write_frame, Packet};
use crate::progress::{file_progress, ProgressSink};
use crate::protocol::{copy_buffer_len, PacketKind, CONN_BUFFER_SIZE};
use crate::save_dir::{Occupant, SaveDir};
use crate::util::human_size;
use std::collections::BTreeMap;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

/// Name -> announced size of every file still expected this session.
pub type Pending = BTreeMap<String, u64>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveStats {
    pub files_received: u64,
    pub bytes_received: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Server announced an empty catalog
    NothingOffered,
    /// Operator did not confirm; no confirmation was sent
    Declined,
    Completed(ReceiveStats),
}

pub struct Receiver<'a> {
    pub save_dir: &'a SaveDir,
    pub policy: CollisionPolicy,
    pub show_progress: bool,
    pub peer: &'a str,
    pub logger: &'a dyn TransferLogger,
}

impl Receiver<'_> {
    pub async fn run<S, P>(&self, stream: S, prompt: &mut P) -> Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        P: Prompt,
    {
        let (rd, wr) = tokio::io::split(stream);
        let mut reader = BufReader::with_capacity(CONN_BUFFER_SIZE, rd);
        let mut writer = BufWriter::with_capacity(CONN_BUFFER_SIZE, wr);

        let mut pending = fetch_catalog(&mut reader, self.save_dir).await?;
        if pending.is_empty() {
            prompt.show("No files to download");
            return Ok(Outcome::NothingOffered);
        }

        show_catalog(prompt, &pending);
        if !decide(prompt).await {
            info!("user aborted download");
            return Ok(Outcome::Declined);
        }

        write_frame(&mut writer, &Packet::control(PacketKind::ConfirmAccept)).await?;
        writer.flush().await?;

        let mut stats = ReceiveStats::default();
        while !pending.is_empty() {
            self.receive_one(&mut reader, &mut writer, prompt, &mut pending, &mut stats)
                .await?;
        }
        Ok(Outcome::Completed(stats))
    }

    async fn receive_one<R, W, P>(
        &self,
        reader: &mut R,
        writer: &mut W,
        prompt: &mut P,
        pending: &mut Pending,
        stats: &mut ReceiveStats,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        P: Prompt,
    {
        let meta = read_frame(reader).await?;
        if meta.kind() != PacketKind::FileMeta {
            return Err(Error::unexpected("FileMeta", meta.kind()));
        }
        let name = meta.file_name().to_string();
        let size = *pending
            .get(&name)
            .ok_or_else(|| Error::UnknownFile(name.clone()))?;

        let Some(mut file) = self.open_destination(&name, prompt).await else {
            write_frame(writer, &Packet::control(PacketKind::RejectFile)).await?;
            writer.flush().await?;
            pending.remove(&name);
            stats.skipped += 1;
            self.logger.rejected(self.peer, &name);
            return Ok(());
        };

        write_frame(writer, &Packet::control(PacketKind::AcceptFile)).await?;
        writer.flush().await?;

        let mut sink = file_progress(self.show_progress, &name, size);
        let got = copy_body(reader, &mut file, &name, size, sink.as_mut()).await?;
        pending.remove(&name);
        stats.files_received += 1;
        stats.bytes_received += got;
        if let Ok(dst) = self.save_dir.resolve(&name) {
            self.logger.received(&name, &dst, got);
        }
        debug!(file = %name, bytes = got, "file received");
        Ok(())
    }

    /// Open the file for an offered name, or `None` to reject it. Existing
    /// entries are never written through unless the policy allows
    /// overwriting a regular file.
    async fn open_destination<P: Prompt>(&self, name: &str, prompt: &mut P) -> Option<File> {
        let truncate = match self.save_dir.occupant(name).await {
            Ok(Occupant::Vacant) => false,
            Ok(Occupant::File) if self.policy == CollisionPolicy::Overwrite => true,
            Ok(Occupant::File) | Ok(Occupant::Other) => {
                prompt.show(&format!("--skip-- {} <-- file exists", name));
                return None;
            }
            // creating over a directory fails below and is rejected there
            Ok(Occupant::Directory) => false,
            Err(e) => {
                warn!(file = %name, error = %e, "cannot stat destination, rejecting");
                return None;
            }
        };
        match self.save_dir.create(name, truncate).await {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(file = %name, error = %e, "cannot create destination, rejecting");
                prompt.show(&format!("--skip-- {} <-- {}", name, e));
                None
            }
        }
    }
}

/// Read FileQuantity packets until EndOfTransmission. Names must be plain
/// file names and unique; sizes must be non-negative.
pub async fn fetch_catalog<R>(reader: &mut R, save_dir: &SaveDir) -> Result<Pending>
where
    R: AsyncRead + Unpin,
{
    let mut pending = Pending::new();
    loop {
        let p = read_frame(reader).await?;
        match p.kind() {
            PacketKind::FileQuantity => {
                let name = p.file_name().to_string();
                save_dir.resolve(&name)?;
                if p.file_size() < 0 {
                    return Err(Error::NegativeSize {
                        name,
                        size: p.file_size(),
                    });
                }
                if pending.insert(name.clone(), p.file_size() as u64).is_some() {
                    return Err(Error::DuplicateFile(name));
                }
            }
            PacketKind::EndOfTransmission => return Ok(pending),
            other => return Err(Error::unexpected("FileQuantity or EndOfTransmission", other)),
        }
    }
}

fn show_catalog<P: Prompt>(prompt: &mut P, pending: &Pending) {
    let mut total: u64 = 0;
    for (name, size) in pending {
        total = total.saturating_add(*size);
        prompt.show(&format!(
            "[{:<20}] {:>10}  (total {})",
            name,
            human_size(*size),
            human_size(total)
        ));
    }
    prompt.show(&format!(
        "[Total] {} files, {}",
        pending.len(),
        human_size(total)
    ));
}

/// Only an explicit y/yes proceeds. A failed read counts as no.
async fn decide<P: Prompt>(prompt: &mut P) -> bool {
    match prompt.read_line("Confirm accept [y/N]: ").await {
        Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(e) => {
            warn!(error = %e, "failed to read confirmation");
            false
        }
    }
}

/// Copy exactly `size` bytes from the connection into `file`. Running out
/// early is an unexpected EOF for the whole session; the partial file stays.
async fn copy_body<R>(
    reader: &mut R,
    file: &mut File,
    name: &str,
    size: u64,
    sink: &mut dyn ProgressSink,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; copy_buffer_len(size)];
    let mut got: u64 = 0;
    while got < size {
        let want = (size - got).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) if is_disconnect_kind(e.kind()) => 0,
            Err(e) => {
                sink.abandon();
                return Err(e.into());
            }
        };
        if n == 0 {
            sink.abandon();
            return Err(Error::ShortTransfer {
                name: name.to_string(),
                got,
                expected: size,
            });
        }
        file.write_all(&buf[..n]).await?;
        sink.advance(n as u64);
        got += n as u64;
    }
    file.flush().await?;
    sink.finish();
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::prompt::FixedAnswer;
    use crate::logger::NoopLogger;
    use tempfile::TempDir;
    use tokio::io::DuplexStream;

    async fn announce(srv: &mut DuplexStream, files: &[(&str, i64)]) {
        for (name, size) in files {
            write_frame(srv, &Packet::new(PacketKind::FileQuantity, *name, *size))
                .await
                .unwrap();
        }
        write_frame(srv, &Packet::control(PacketKind::EndOfTransmission))
            .await
            .unwrap();
    }

    fn receiver(dir: &SaveDir) -> Receiver<'_> {
        Receiver {
            save_dir: dir,
            policy: CollisionPolicy::Reject,
            show_progress: false,
            peer: "test",
            logger: &NoopLogger,
        }
    }

    #[tokio::test]
    async fn test_fetch_catalog_over_tiny_chunks() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, mut cli) = tokio::io::duplex(5);
        let writer = tokio::spawn(async move {
            announce(&mut srv, &[("a", 10), ("b", 20)]).await;
            srv
        });
        let pending = fetch_catalog(&mut cli, &dir).await.unwrap();
        writer.await.unwrap();

        let expected: Pending = [("a".to_string(), 10), ("b".to_string(), 20)]
            .into_iter()
            .collect();
        assert_eq!(pending, expected);
    }

    #[tokio::test]
    async fn test_fetch_catalog_rejects_traversal_names() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, mut cli) = tokio::io::duplex(1024);
        announce(&mut srv, &[("../evil", 1)]).await;
        let err = fetch_catalog(&mut cli, &dir).await.unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_fetch_catalog_rejects_negative_size() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, mut cli) = tokio::io::duplex(1024);
        announce(&mut srv, &[("neg", -5)]).await;
        let err = fetch_catalog(&mut cli, &dir).await.unwrap_err();
        assert!(matches!(err, Error::NegativeSize { size: -5, .. }));
    }

    #[tokio::test]
    async fn test_fetch_catalog_unknown_kind_is_error() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, mut cli) = tokio::io::duplex(1024);
        write_frame(&mut srv, &Packet::control(PacketKind::Unknown(13)))
            .await
            .unwrap();
        let err = fetch_catalog(&mut cli, &dir).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_empty_catalog_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);
        announce(&mut srv, &[]).await;

        let mut prompt = FixedAnswer::yes().quiet();
        let out = receiver(&dir).run(cli, &mut prompt).await.unwrap();
        assert_eq!(out, Outcome::NothingOffered);
        assert!(matches!(read_frame(&mut srv).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_decline_never_confirms() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);
        announce(&mut srv, &[("a", 3)]).await;

        let mut prompt = FixedAnswer::new("nope").quiet();
        let out = receiver(&dir).run(cli, &mut prompt).await.unwrap();
        assert_eq!(out, Outcome::Declined);
        assert!(matches!(read_frame(&mut srv).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_decide_accepts_only_yes() {
        for (answer, expected) in [
            ("y", true),
            ("YES", true),
            (" Yes ", true),
            ("", false),
            ("n", false),
            ("yep", false),
        ] {
            let mut prompt = FixedAnswer::new(answer).quiet();
            assert_eq!(decide(&mut prompt).await, expected, "answer {:?}", answer);
        }
    }

    #[tokio::test]
    async fn test_collision_rejects_and_keeps_existing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("report.txt"), b"mine").unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);

        let server = tokio::spawn(async move {
            announce(&mut srv, &[("report.txt", 6)]).await;
            let confirm = read_frame(&mut srv).await.unwrap();
            assert_eq!(confirm.kind(), PacketKind::ConfirmAccept);
            write_frame(&mut srv, &Packet::file_meta("report.txt")).await.unwrap();
            read_frame(&mut srv).await.unwrap().kind()
        });

        let mut prompt = FixedAnswer::yes().quiet();
        let out = receiver(&dir).run(cli, &mut prompt).await.unwrap();
        assert_eq!(
            out,
            Outcome::Completed(ReceiveStats {
                files_received: 0,
                bytes_received: 0,
                skipped: 1,
            })
        );
        assert_eq!(server.await.unwrap(), PacketKind::RejectFile);
        assert_eq!(std::fs::read(tmp.path().join("report.txt")).unwrap(), b"mine");
    }

    #[tokio::test]
    async fn test_overwrite_policy_replaces_existing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("report.txt"), b"old old old").unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);

        let server = tokio::spawn(async move {
            announce(&mut srv, &[("report.txt", 3)]).await;
            read_frame(&mut srv).await.unwrap();
            write_frame(&mut srv, &Packet::file_meta("report.txt")).await.unwrap();
            let resp = read_frame(&mut srv).await.unwrap();
            srv.write_all(b"new").await.unwrap();
            resp.kind()
        });

        let mut rx = receiver(&dir);
        rx.policy = CollisionPolicy::Overwrite;
        let mut prompt = FixedAnswer::yes().quiet();
        rx.run(cli, &mut prompt).await.unwrap();
        assert_eq!(server.await.unwrap(), PacketKind::AcceptFile);
        assert_eq!(std::fs::read(tmp.path().join("report.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_short_body_is_unexpected_eof() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            announce(&mut srv, &[("big.bin", 100)]).await;
            read_frame(&mut srv).await.unwrap();
            write_frame(&mut srv, &Packet::file_meta("big.bin")).await.unwrap();
            read_frame(&mut srv).await.unwrap();
            srv.write_all(&[1u8; 30]).await.unwrap();
            // dropping srv closes the stream mid-body
        });

        let mut prompt = FixedAnswer::yes().quiet();
        let err = receiver(&dir).run(cli, &mut prompt).await.unwrap_err();
        match err {
            Error::ShortTransfer { got, expected, .. } => {
                assert_eq!(got, 30);
                assert_eq!(expected, 100);
            }
            other => panic!("expected ShortTransfer, got {:?}", other),
        }
        // partial file is left as-is
        assert_eq!(std::fs::read(tmp.path().join("big.bin")).unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_meta_for_unannounced_file_is_violation() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);

        let server = tokio::spawn(async move {
            announce(&mut srv, &[("a", 1)]).await;
            read_frame(&mut srv).await.unwrap();
            write_frame(&mut srv, &Packet::file_meta("b")).await.unwrap();
            srv
        });

        let mut prompt = FixedAnswer::yes().quiet();
        let err = receiver(&dir).run(cli, &mut prompt).await.unwrap_err();
        assert!(matches!(err, Error::UnknownFile(ref n) if n == "b"));
        drop(server.await.unwrap());
    }

    /// Collects every line the receiver shows.
    struct Recording {
        lines: Vec<String>,
    }

    impl Prompt for Recording {
        fn show(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }

        async fn read_line(&mut self, _question: &str) -> std::io::Result<String> {
            Ok("y".to_string())
        }
    }

    #[tokio::test]
    async fn test_huge_catalog_total_saturates() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);
        announce(&mut srv, &[("a", i64::MAX), ("b", i64::MAX), ("c", i64::MAX)]).await;

        let mut prompt = FixedAnswer::new("n").quiet();
        let out = receiver(&dir).run(cli, &mut prompt).await.unwrap();
        assert_eq!(out, Outcome::Declined);
    }

    #[tokio::test]
    async fn test_skip_notice_goes_through_prompt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("report.txt"), b"mine").unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            announce(&mut srv, &[("report.txt", 6)]).await;
            read_frame(&mut srv).await.unwrap();
            write_frame(&mut srv, &Packet::file_meta("report.txt")).await.unwrap();
            read_frame(&mut srv).await.unwrap();
        });

        let mut prompt = Recording { lines: Vec::new() };
        receiver(&dir).run(cli, &mut prompt).await.unwrap();
        assert!(prompt
            .lines
            .iter()
            .any(|l| l == "--skip-- report.txt <-- file exists"));
    }

    #[tokio::test]
    async fn test_unknown_kind_instead_of_meta_is_violation() {
        let tmp = TempDir::new().unwrap();
        let dir = SaveDir::open(tmp.path()).unwrap();
        let (mut srv, cli) = tokio::io::duplex(1024);

        let server = tokio::spawn(async move {
            announce(&mut srv, &[("a", 1)]).await;
            read_frame(&mut srv).await.unwrap();
            write_frame(&mut srv, &Packet::control(PacketKind::Unknown(9)))
                .await
                .unwrap();
            srv
        });

        let mut prompt = FixedAnswer::yes().quiet();
        let err = receiver(&dir).run(cli, &mut prompt).await.unwrap_err();
        assert!(err.is_protocol_violation(), "unexpected error: {:?}", err);
        assert!(matches!(err, Error::UnexpectedPacket { expected: "FileMeta", .. }));
        drop(server.await.unwrap());
    }
}
