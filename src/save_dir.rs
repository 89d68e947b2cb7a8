//! Destination directory for received files.
//!
//! Names arriving over the wire are untrusted. Every lookup goes through
//! `resolve`, which only accepts a single plain path component:
//! 1. Rejecting empty names, "." and ".."
//! 2. Rejecting separators, NUL bytes, absolute and prefixed paths
//! 3. On Windows, rejecting ':' (ADS defense)

use crate::error::{Error, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// What already occupies a destination name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occupant {
    Vacant,
    File,
    Directory,
    /// Symlink, socket, device... never written through
    Other,
}

#[derive(Clone, Debug)]
pub struct SaveDir {
    root: PathBuf,
}

impl SaveDir {
    /// Open an existing directory as the save root.
    pub fn open(root: &Path) -> io::Result<Self> {
        let root = root.canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(SaveDir { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Probe that files can be created here.
    pub fn validate_writable(&self) -> io::Result<()> {
        // removed again when the handle drops
        tempfile::NamedTempFile::new_in(&self.root).map(drop)
    }

    /// Map a wire name to a path directly under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        check_plain_name(name)?;
        Ok(self.root.join(name))
    }

    /// Stat the name without following symlinks.
    pub async fn occupant(&self, name: &str) -> Result<Occupant> {
        let path = self.resolve(name)?;
        match tokio::fs::symlink_metadata(&path).await {
            Ok(md) if md.is_file() => Ok(Occupant::File),
            Ok(md) if md.is_dir() => Ok(Occupant::Directory),
            Ok(_) => Ok(Occupant::Other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Occupant::Vacant),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Create the destination file. With `truncate_existing` false the open
    /// fails if anything appeared at the name since it was probed.
    pub async fn create(&self, name: &str, truncate_existing: bool) -> Result<File> {
        let path = self.resolve(name)?;
        let mut opts = OpenOptions::new();
        opts.write(true);
        if truncate_existing {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        opts.open(&path)
            .await
            .map_err(|source| Error::Create { path, source })
    }
}

fn check_plain_name(name: &str) -> Result<()> {
    let invalid = || Error::InvalidName(name.to_string());
    if name.is_empty() || name.contains('\0') || name.contains('/') || name.contains('\\') {
        return Err(invalid());
    }
    #[cfg(windows)]
    if name.contains(':') {
        return Err(invalid());
    }
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}
