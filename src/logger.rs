//! Append-only transfer record (`--log-file`).
//!
//! Diagnostics go through `tracing`; this is the durable per-file account of
//! what was offered, sent, skipped and received.

use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub trait TransferLogger: Send + Sync {
    fn connection(&self, _peer: &str) {}
    fn offered(&self, _peer: &str, _files: usize, _bytes: u64) {}
    fn sent(&self, _peer: &str, _name: &str, _bytes: u64) {}
    fn rejected(&self, _peer: &str, _name: &str) {}
    fn received(&self, _name: &str, _dst: &Path, _bytes: u64) {}
    fn error(&self, _context: &str, _peer: &str, _msg: &str) {}
    fn done(&self, _peer: &str, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl TransferLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl TransferLogger for TextLogger {
    fn connection(&self, peer: &str) {
        self.line(&format!("CONNECT peer={}", peer));
    }
    fn offered(&self, peer: &str, files: usize, bytes: u64) {
        self.line(&format!("OFFER peer={peer} files={files} bytes={bytes}"));
    }
    fn sent(&self, peer: &str, name: &str, bytes: u64) {
        self.line(&format!("SEND peer={peer} name={name} bytes={bytes}"));
    }
    fn rejected(&self, peer: &str, name: &str) {
        self.line(&format!("REJECT peer={peer} name={name}"));
    }
    fn received(&self, name: &str, dst: &Path, bytes: u64) {
        self.line(&format!(
            "RECV name={} dst={} bytes={}",
            name,
            dst.display(),
            bytes
        ));
    }
    fn error(&self, context: &str, peer: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} peer={} msg={}", context, peer, msg));
    }
    fn done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!(
            "DONE peer={peer} files={files} bytes={bytes} seconds={seconds:.3}"
        ));
    }
}
