//! Small helpers used by the CLI and the catalog display.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;

const UNIT_KB: u64 = 1024;
const UNIT_MB: u64 = 1024 * UNIT_KB;
const UNIT_GB: u64 = 1024 * UNIT_MB;

/// Human readable size, 1024-based with two decimals.
pub fn human_size(size: u64) -> String {
    match size {
        s if s >= UNIT_GB => format!("{:.2} GB", s as f64 / UNIT_GB as f64),
        s if s >= UNIT_MB => format!("{:.2} MB", s as f64 / UNIT_MB as f64),
        s if s >= UNIT_KB => format!("{:.2} KB", s as f64 / UNIT_KB as f64),
        s => format!("{} B", s),
    }
}

/// Address of the interface that would route to the outside world.
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.connect("114.114.114.114:80")?;
        Ok(sock.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// `$HOME/Downloads` when it exists, otherwise the current directory.
pub fn download_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(profile) = std::env::var("USERPROFILE") {
            let d = PathBuf::from(profile).join("Downloads");
            if d.is_dir() {
                return d;
            }
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        let d = PathBuf::from(home).join("Downloads");
        if d.is_dir() {
            return d;
        }
    }
    PathBuf::from(".")
}

/// Ports below 1024 are reserved; the CLI refuses them.
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port >= 1024 {
        Ok(port)
    } else {
        Err(format!("port {} out of range (1024-65535)", port))
    }
}
