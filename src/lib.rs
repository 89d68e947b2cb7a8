//! Handoff library
//!
//! Negotiated file transfer over one TCP connection: the server announces a
//! catalog, the client confirms, then accepts or rejects each file before
//! its bytes are streamed.

pub mod catalog;
pub mod cli;
pub mod client;
pub mod error;
pub mod logger;
pub mod packet;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod save_dir;
pub mod server;
pub mod util;

pub use error::{Error, Result};
