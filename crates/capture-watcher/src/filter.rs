//! Capture file qualification

use crate::WatcherConfig;
use std::path::{Component, Path, PathBuf};

/// Decides which paths under the capture root count as captures
#[derive(Debug, Clone)]
pub struct CaptureFilter {
    root: PathBuf,
    max_depth: usize,
    extensions: Vec<String>,
    ignored_extensions: Vec<String>,
    ignored_dirs: Vec<String>,
}

impl CaptureFilter {
    /// Build a filter for `root` using the config's patterns
    pub fn new(root: impl Into<PathBuf>, config: &WatcherConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_ascii_lowercase()).collect();
        Self {
            root: root.into(),
            max_depth: config.max_depth,
            extensions: lower(&config.extensions),
            ignored_extensions: lower(&config.ignored_extensions),
            ignored_dirs: config.ignored_dirs.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extension is in the image allow-list
    pub fn is_image(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Temp/lock file, or inside an ignored directory
    pub fn is_ignored(&self, path: &Path) -> bool {
        if extension_of(path).is_some_and(|ext| self.ignored_extensions.contains(&ext)) {
            return true;
        }

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|c| match c {
            Component::Normal(name) => self
                .ignored_dirs
                .iter()
                .any(|ignored| name.to_str() == Some(ignored.as_str())),
            _ => false,
        })
    }

    /// Under the root and no deeper than `max_depth` directories
    pub fn within_depth(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => {
                let depth = relative.components().count();
                depth > 0 && depth <= self.max_depth + 1
            }
            Err(_) => false,
        }
    }

    /// A file at this path may resolve a pending capture
    pub fn qualifies(&self, path: &Path) -> bool {
        !self.is_ignored(path) && self.within_depth(path) && self.is_image(path)
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter() -> CaptureFilter {
        CaptureFilter::new("/captures", &WatcherConfig::with_root("/captures"))
    }

    #[test]
    fn test_image_extensions() {
        let f = filter();
        assert!(f.qualifies(Path::new("/captures/Session1/IMG_0001.JPG")));
        assert!(f.qualifies(Path::new("/captures/Session1/IMG_0001.cr2")));
        assert!(f.qualifies(Path::new("/captures/Session1/images/DSC_0001.nef")));
        assert!(!f.qualifies(Path::new("/captures/Session1/notes.txt")));
        assert!(!f.qualifies(Path::new("/captures/Session1/IMG_0001")));
    }

    #[test]
    fn test_ignored_patterns() {
        let f = filter();
        assert!(f.is_ignored(Path::new("/captures/Session1/IMG_0001.jpg.tmp")));
        assert!(f.is_ignored(Path::new("/captures/Session1/write.lock")));
        assert!(f.is_ignored(Path::new("/captures/.git/objects/a.jpg")));
        assert!(f.is_ignored(Path::new("/captures/node_modules/x/a.jpg")));
        assert!(!f.qualifies(Path::new("/captures/.git/a.jpg")));
    }

    #[test]
    fn test_depth_bound() {
        let f = filter();
        assert!(f.within_depth(Path::new("/captures/a.jpg")));
        assert!(f.within_depth(Path::new("/captures/s/i/x/a.jpg")));
        assert!(!f.within_depth(Path::new("/captures/s/i/x/y/a.jpg")));
        assert!(!f.within_depth(Path::new("/elsewhere/a.jpg")));
        assert!(!f.within_depth(Path::new("/captures")));
    }

    proptest! {
        #[test]
        fn prop_non_image_never_qualifies(name in "[a-zA-Z0-9_]{1,12}", ext in "[a-z]{1,4}") {
            prop_assume!(!["jpg", "jpeg", "cr2", "cr3", "nef", "arw", "dng"].contains(&ext.as_str()));
            let path = PathBuf::from(format!("/captures/Session1/{}.{}", name, ext));
            prop_assert!(!filter().qualifies(&path));
        }

        #[test]
        fn prop_ignored_dir_never_qualifies(name in "[a-zA-Z0-9_]{1,12}") {
            let path = PathBuf::from(format!("/captures/.git/{}.jpg", name));
            prop_assert!(!filter().qualifies(&path));
        }
    }
}
