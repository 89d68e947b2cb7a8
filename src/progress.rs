//! Per-file progress display for the receiving side.
//!
//! Purely observational: a sink is fed the byte count after each chunk lands
//! in the destination file and never touches protocol state.

use indicatif::{ProgressBar, ProgressStyle};
use unicode_width::UnicodeWidthChar;

// Columns reserved for the file name in front of the bar
const NAME_COLUMNS: usize = 24;

pub trait ProgressSink: Send {
    fn advance(&mut self, bytes: u64);
    fn finish(&mut self);
    /// Leave the bar in place without marking it complete.
    fn abandon(&mut self) {}
}

/// Discards all updates (tests, non-interactive runs)
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&mut self, _bytes: u64) {}
    fn finish(&mut self) {}
}

pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(name: &str, size: u64) -> Self {
        let bar = ProgressBar::new(size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:30.green/white}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(fit_text(name, NAME_COLUMNS));
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn advance(&mut self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }

    fn abandon(&mut self) {
        self.bar.abandon();
    }
}

/// Build the sink for one incoming file.
pub fn file_progress(enabled: bool, name: &str, size: u64) -> Box<dyn ProgressSink> {
    if enabled {
        Box::new(BarProgress::new(name, size))
    } else {
        Box::new(NoProgress)
    }
}

/// Clip (with "...") or pad `s` to exactly `limit` display columns.
pub fn fit_text(s: &str, limit: usize) -> String {
    let width: usize = s.chars().map(|c| c.width().unwrap_or(0)).sum();
    if width > limit {
        let mut out = String::new();
        let mut w = 0;
        for c in s.chars() {
            let cw = c.width().unwrap_or(0);
            if w + cw > limit.saturating_sub(3) {
                break;
            }
            out.push(c);
            w += cw;
        }
        out.push_str("...");
        w += 3;
        out.extend(std::iter::repeat(' ').take(limit.saturating_sub(w)));
        out
    } else {
        let mut out = s.to_string();
        out.extend(std::iter::repeat(' ').take(limit - width));
        out
    }
}
