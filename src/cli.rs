//! Command-line surface. Parsed here, mapped into the library's config
//! structs; nothing below this module reads argv.

use crate::client::{ClientConfig, CollisionPolicy};
use crate::protocol::{timeouts, DEFAULT_PORT};
use crate::server::ServerConfig;
use crate::util::{download_dir, local_ip, validate_port};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "handoff",
    author,
    version,
    about = "Offer files to a peer, let it preview and pick, then stream them over TCP"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append a transfer record to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run as server, offering files to every client that connects
    Server(ServerOpts),
    /// Run as client, fetching files from a server
    Client(ClientOpts),
}

#[derive(Clone, Debug, Args)]
pub struct ServerOpts {
    /// IP address to bind (default: the address currently in use)
    #[arg(short, long)]
    pub ip: Option<IpAddr>,

    /// Port number
    #[arg(short, long, default_value_t = DEFAULT_PORT, value_parser = parse_port)]
    pub port: u16,

    /// Files to serve
    #[arg(short, long = "file", required = true, num_args = 1.., value_delimiter = ',')]
    pub files: Vec<PathBuf>,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value_t = timeouts::SHUTDOWN_MS / 1000)]
    pub shutdown_timeout: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ClientOpts {
    /// Server IP address (default: the address currently in use)
    #[arg(short, long)]
    pub ip: Option<IpAddr>,

    /// Port number
    #[arg(short, long, default_value_t = DEFAULT_PORT, value_parser = parse_port)]
    pub port: u16,

    /// Save path (default: the system download directory)
    #[arg(short, long)]
    pub save: Option<PathBuf>,

    /// Replace existing files instead of rejecting them
    #[arg(long)]
    pub overwrite: bool,

    /// Accept the catalog without prompting
    #[arg(short, long)]
    pub yes: bool,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|e| format!("invalid port {:?}: {}", s, e))?;
    validate_port(port)
}

impl ServerOpts {
    pub fn to_config(&self) -> ServerConfig {
        let ip = self.ip.unwrap_or_else(local_ip);
        ServerConfig {
            bind: join_host_port(ip, self.port),
            files: self.files.clone(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        }
    }
}

impl ClientOpts {
    pub fn to_config(&self) -> ClientConfig {
        let ip = self.ip.unwrap_or_else(local_ip);
        ClientConfig {
            server: join_host_port(ip, self.port),
            save_dir: self.save.clone().unwrap_or_else(download_dir),
            policy: if self.overwrite {
                CollisionPolicy::Overwrite
            } else {
                CollisionPolicy::Reject
            },
            show_progress: !self.no_progress,
            ..ClientConfig::default()
        }
    }
}

fn join_host_port(ip: IpAddr, port: u16) -> String {
    std::net::SocketAddr::new(ip, port).to_string()
}
