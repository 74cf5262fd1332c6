//! Resource names and node identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Normalized name of a tile resource, relative to the dataset root.
///
/// Separators are always `/`; `.` segments are dropped and `..` segments
/// are folded into their parent. Leading `..` segments that would climb
/// above the dataset root are kept, and readers must refuse them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource id from a path, normalizing it.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(normalize(path.as_ref()))
    }

    /// Resolve a reference relative to a directory.
    ///
    /// Child descriptors name their tiles relative to the directory of the
    /// tile that listed them; this turns such a reference into a dataset path.
    #[must_use]
    pub fn resolve(directory: &str, relative: &str) -> Self {
        if directory.is_empty() {
            Self::new(relative)
        } else {
            Self::new(format!("{directory}/{relative}"))
        }
    }

    /// The normalized path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory containing the resource, or `""` at the dataset root.
    #[must_use]
    pub fn directory(&self) -> &str {
        self.0.rfind('/').map_or("", |i| &self.0[..i])
    }

    /// Final path component.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rfind('/').map_or(self.0.as_str(), |i| &self.0[i + 1..])
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // Leading `..` segments escape the root and are kept.
                if matches!(segments.last(), Some(&s) if s != "..") {
                    segments.pop();
                } else {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Identity of one node instance.
///
/// Every node gets a fresh key when it is created or reset, so a request
/// issued for an earlier incarnation can never be applied to a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(u64);

static NEXT_NODE_KEY: AtomicU64 = AtomicU64::new(1);

impl NodeKey {
    /// Allocate a key that has never been handed out before.
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
