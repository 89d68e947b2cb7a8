//! Source file enumeration for the server's catalog.

use crate::error::{Error, Result, StatFailure};
use std::path::{Path, PathBuf};

/// One file the server can offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Path on the serving host
    pub path: PathBuf,
    /// Basename sent on the wire
    pub name: String,
    pub size: u64,
}

/// Stat a source path. Directories and anything that can't be stat'd are
/// errors; the caller decides whether that sinks the whole catalog.
pub async fn stat_source(path: &Path) -> Result<CatalogEntry> {
    let md = tokio::fs::metadata(path).await.map_err(|e| Error::Stat {
        path: path.to_path_buf(),
        kind: StatFailure::from(e),
    })?;
    if md.is_dir() {
        return Err(Error::Stat {
            path: path.to_path_buf(),
            kind: StatFailure::IsDirectory,
        });
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Stat {
            path: path.to_path_buf(),
            kind: StatFailure::NotFound,
        })?;
    Ok(CatalogEntry {
        path: path.to_path_buf(),
        name,
        size: md.len(),
    })
}

/// Stat every path in order. The first failure aborts the whole catalog.
/// Two paths with the same basename would be indistinguishable on the wire,
/// so that is a failure too.
pub async fn build_catalog(paths: &[PathBuf]) -> Result<Vec<CatalogEntry>> {
    let mut entries: Vec<CatalogEntry> = Vec::with_capacity(paths.len());
    for p in paths {
        let entry = stat_source(p).await?;
        if entries.iter().any(|e| e.name == entry.name) {
            return Err(Error::DuplicateFile(entry.name));
        }
        entries.push(entry);
    }
    Ok(entries)
}
