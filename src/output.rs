//! Locating the file the extraction tool produced.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, warn};

pub const PARTIAL_SUFFIXES: [&str; 2] = [".part", ".tmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Reported,
    Marker,
    /// Newest file overall. May belong to another request.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFile {
    pub path: PathBuf,
    pub matched_by: MatchKind,
}

impl LocatedFile {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Scans `dir` (non-recursively) for finished downloads. A marker match wins;
/// otherwise the most recently modified file is returned.
pub async fn find_file(dir: &Path, marker: Option<&str>) -> Option<LocatedFile> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            warn!("Could not scan downloads directory {:?}: {error}", dir);
            return None;
        }
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut newest_marked: Option<(SystemTime, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }

        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let path = entry.path();

        if marker.is_some_and(|marker| name.contains(marker)) {
            keep_newest(&mut newest_marked, modified, path.clone());
        }
        keep_newest(&mut newest, modified, path);
    }

    if let Some((_, path)) = newest_marked {
        return Some(LocatedFile {
            path,
            matched_by: MatchKind::Marker,
        });
    }

    newest.map(|(_, path)| {
        warn!(
            "No output carried marker {:?}; falling back to newest file {:?}",
            marker, path
        );
        LocatedFile {
            path,
            matched_by: MatchKind::Fallback,
        }
    })
}

/// Prefers the path the tool printed on stdout, as long as it is a regular
/// file directly inside `dir`, then falls back to [`find_file`].
pub async fn locate_output(dir: &Path, stdout: &str, marker: &str) -> Option<LocatedFile> {
    if let Some(path) = reported_path(dir, stdout).await {
        return Some(LocatedFile {
            path,
            matched_by: MatchKind::Reported,
        });
    }
    find_file(dir, Some(marker)).await
}

async fn reported_path(dir: &Path, stdout: &str) -> Option<PathBuf> {
    let printed = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()?;

    let canonical_dir = tokio::fs::canonicalize(dir).await.ok()?;
    let candidate = Path::new(printed);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    };

    let canonical = match tokio::fs::canonicalize(&candidate).await {
        Ok(path) => path,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                debug!("Could not resolve reported path {:?}: {error}", candidate);
            }
            return None;
        }
    };
    if canonical.parent() != Some(canonical_dir.as_path()) {
        warn!("Ignoring reported path outside downloads directory: {:?}", canonical);
        return None;
    }

    let metadata = tokio::fs::metadata(&canonical).await.ok()?;
    metadata.is_file().then_some(canonical)
}

fn keep_newest(slot: &mut Option<(SystemTime, PathBuf)>, modified: SystemTime, path: PathBuf) {
    if slot.as_ref().is_none_or(|(current, _)| modified >= *current) {
        *slot = Some((modified, path));
    }
}
