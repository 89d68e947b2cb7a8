//! Receiving side: dials the server once and runs a single session on the
//! calling task.

pub mod prompt;
pub mod transfer;

use crate::error::Result;
use crate::logger::{NoopLogger, TransferLogger};
use crate::protocol::timeouts;
use crate::save_dir::SaveDir;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

pub use prompt::{FixedAnswer, Prompt, StdinPrompt};
pub use transfer::{Outcome, ReceiveStats, Receiver};

/// What to do when an offered name already exists in the save directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Send RejectFile and leave the existing entry untouched
    #[default]
    Reject,
    /// Truncate and replace existing regular files (never symlinks)
    Overwrite,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub server: String,
    pub save_dir: PathBuf,
    pub policy: CollisionPolicy,
    pub show_progress: bool,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", crate::protocol::DEFAULT_PORT),
            save_dir: PathBuf::from("."),
            policy: CollisionPolicy::Reject,
            show_progress: true,
            connect_timeout: Duration::from_millis(timeouts::CONNECT_MS),
        }
    }
}

pub struct Client {
    config: ClientConfig,
    save_dir: SaveDir,
    logger: Arc<dyn TransferLogger>,
}

impl Client {
    /// Validate the save directory (exists, is a directory, is writable).
    pub fn new(config: ClientConfig) -> std::io::Result<Self> {
        let save_dir = SaveDir::open(&config.save_dir)?;
        save_dir.validate_writable()?;
        Ok(Client {
            config,
            save_dir,
            logger: Arc::new(NoopLogger),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn save_dir(&self) -> &SaveDir {
        &self.save_dir
    }

    /// Dial, run one session, close. The connection is closed on every exit
    /// path when the stream drops.
    pub async fn run<P: Prompt>(&self, prompt: &mut P) -> Result<Outcome> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.server),
        )
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", self.config.server),
            )
        })??;
        let _ = stream.set_nodelay(true);
        info!(server = %self.config.server, save = %self.save_dir.root().display(), "connected");
        self.logger.connection(&self.config.server);

        let receiver = Receiver {
            save_dir: &self.save_dir,
            policy: self.config.policy,
            show_progress: self.config.show_progress,
            peer: &self.config.server,
            logger: self.logger.as_ref(),
        };
        let started = std::time::Instant::now();
        let outcome = receiver.run(stream, prompt).await;
        match &outcome {
            Ok(Outcome::Completed(stats)) => self.logger.done(
                &self.config.server,
                stats.files_received,
                stats.bytes_received,
                started.elapsed().as_secs_f64(),
            ),
            Ok(_) => {}
            Err(e) => self.logger.error("receive", &self.config.server, &e.to_string()),
        }
        outcome
    }
}
