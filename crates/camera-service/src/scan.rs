//! Folder scan used when the watcher misses a capture

use capture_watcher::CaptureFilter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Files this many levels inside a session folder are considered
const SESSION_SCAN_DEPTH: usize = 2;

/// Newest image (by mtime) inside the `session_dirs` most recently modified
/// subdirectories of the filter's root. A missing root yields `None`.
pub fn find_newest_capture(
    filter: &CaptureFilter,
    session_dirs: usize,
) -> io::Result<Option<(PathBuf, SystemTime)>> {
    let root = filter.root();
    if !root.is_dir() {
        return Ok(None);
    }

    let mut sessions: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() && !filter.is_ignored(&path) {
            sessions.push((path, metadata.modified()?));
        }
    }
    sessions.sort_by(|a, b| b.1.cmp(&a.1));

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    for (session, _) in sessions.into_iter().take(session_dirs) {
        scan_dir(filter, &session, 1, &mut newest)?;
    }
    Ok(newest)
}

fn scan_dir(
    filter: &CaptureFilter,
    dir: &Path,
    depth: usize,
    newest: &mut Option<(PathBuf, SystemTime)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if filter.is_ignored(&path) {
            continue;
        }

        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            if depth < SESSION_SCAN_DEPTH {
                scan_dir(filter, &path, depth + 1, newest)?;
            }
        } else if filter.is_image(&path) {
            let modified = metadata.modified()?;
            if newest.as_ref().map_or(true, |(_, t)| modified > *t) {
                *newest = Some((path, modified));
            }
        }
    }
    Ok(())
}
