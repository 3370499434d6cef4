//! Directory scanning: discovers wallpaper candidates in the slideshow directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::queue::WallpaperEntry;

/// Result of statting a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileProbe {
    /// Regular, non-hidden file with an `image/*` content type.
    pub is_image: bool,
    /// Creation time (falls back to modification time) in epoch seconds.
    pub date: u64,
}

/// Validate the configured directory before a build.
///
/// # Errors
/// Returns [`Error::DirectoryMissing`] when the path is empty, missing or not
/// a directory.
pub fn check_directory(directory: &Path) -> Result<(), Error> {
    if directory.as_os_str().is_empty() || !directory.is_dir() {
        return Err(Error::DirectoryMissing(directory.to_path_buf()));
    }
    Ok(())
}

/// List the images directly inside `directory` (no recursion), in directory order.
///
/// # Errors
/// Returns [`Error::DirectoryMissing`] if the directory cannot be read.
pub fn scan_directory(directory: &Path) -> Result<Vec<WallpaperEntry>, Error> {
    check_directory(directory)?;

    let mut out = Vec::new();
    let walker = WalkDir::new(directory).min_depth(1).max_depth(1);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(Error::DirectoryMissing(directory.to_path_buf()));
            }
            Err(err) => {
                debug!(error = %err, "scan: skipping unreadable entry");
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str() else {
            debug!(path = %entry.path().display(), "scan: skipping non UTF-8 file name");
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() || !is_wallpaper_candidate(entry.path()) {
            continue;
        }
        out.push(WallpaperEntry::new(name, creation_secs(&meta)));
    }
    Ok(out)
}

/// Soft variant of [`scan_directory`]: any failure is logged and yields an
/// empty queue.
pub fn build_queue(directory: &Path) -> Vec<WallpaperEntry> {
    match scan_directory(directory) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(directory = %directory.display(), error = %err, "failed to list slideshow directory");
            Vec::new()
        }
    }
}

/// Async wrapper running the listing on the blocking pool.
pub async fn list_wallpapers(directory: PathBuf) -> Result<Vec<WallpaperEntry>, Error> {
    let dir = directory.clone();
    match tokio::task::spawn_blocking(move || scan_directory(&dir)).await {
        Ok(res) => res,
        Err(join) => Err(Error::Io(std::io::Error::other(join))),
    }
}

/// Stat one file and decide whether it is a usable wallpaper.
///
/// # Errors
/// Returns [`Error::FileStatFailed`] when metadata cannot be read.
pub fn probe_file(path: &Path) -> Result<FileProbe, Error> {
    let meta = fs::metadata(path).map_err(|source| Error::FileStatFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FileProbe {
        is_image: meta.is_file() && is_wallpaper_candidate(path),
        date: creation_secs(&meta),
    })
}

/// Async wrapper around [`probe_file`].
pub async fn probe(path: PathBuf) -> Result<FileProbe, Error> {
    let target = path.clone();
    match tokio::task::spawn_blocking(move || probe_file(&target)).await {
        Ok(res) => res,
        Err(join) => Err(Error::FileStatFailed {
            path,
            source: std::io::Error::other(join),
        }),
    }
}

/// `true` for non-hidden paths whose guessed content type is `image/*`.
#[must_use]
pub fn is_wallpaper_candidate(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    if hidden {
        return false;
    }
    mime_guess::from_path(path)
        .first_raw()
        .is_some_and(|mime| mime.starts_with("image/"))
}

fn creation_secs(meta: &fs::Metadata) -> u64 {
    let stamp = meta
        .created()
        .or_else(|_| meta.modified())
        .unwrap_or_else(|_| SystemTime::now());
    stamp
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
