//! Error types for the meshtree crate.

use std::fmt;

use crate::resource::ResourceId;

/// Result type for meshtree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming tiles into the tree.
#[derive(Debug)]
pub enum Error {
    /// The tile reader has no resource with this name.
    ResourceNotFound {
        /// The resource that was requested.
        resource: ResourceId,
    },
    /// Reading the resource failed for a reason other than absence.
    Io {
        /// The path or resource being read.
        path: String,
        /// The error message.
        message: String,
    },
    /// The resource exists but its content could not be parsed.
    Parse {
        /// The resource that failed to parse.
        resource: ResourceId,
        /// Description of what was invalid.
        detail: String,
    },
    /// Mesh or texture payload decoding failed.
    Decode(meshtree_decode::DecodeError),
    /// The node already has its content resolved.
    AlreadyLoaded,
    /// The node's descriptor does not reference exactly one resource.
    InvalidDescriptor {
        /// Number of resource references the descriptor carries.
        resources: usize,
    },
    /// A blocking load gave up before the subtree became displayable.
    Incomplete {
        /// Number of polling iterations performed.
        iterations: u32,
    },
    /// A worker panicked while reading or decoding a resource.
    WorkerPanic {
        /// The resource being loaded.
        resource: ResourceId,
        /// The panic message, if it carried one.
        message: String,
    },
    /// The background runtime could not be created.
    Runtime {
        /// The error message.
        message: String,
    },
    /// The cache manager has been shut down.
    ShutDown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ResourceNotFound { resource } => {
                write!(f, "resource {resource} not found")
            }
            Error::Io { path, message } => write!(f, "reading {path} failed: {message}"),
            Error::Parse { resource, detail } => {
                write!(f, "failed to parse {resource}: {detail}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::AlreadyLoaded => write!(f, "node is already loaded"),
            Error::InvalidDescriptor { resources } => {
                write!(
                    f,
                    "node descriptor must reference exactly one resource, found {resources}"
                )
            }
            Error::Incomplete { iterations } => {
                write!(f, "subtree not displayable after {iterations} iterations")
            }
            Error::WorkerPanic { resource, message } => {
                write!(f, "worker panicked while loading {resource}: {message}")
            }
            Error::Runtime { message } => write!(f, "background runtime failed: {message}"),
            Error::ShutDown => write!(f, "cache manager has been shut down"),
        }
    }
}

impl Error {
    /// Whether retrying the same load can never succeed.
    ///
    /// Content that exists but is malformed stays malformed. Missing
    /// resources and I/O failures may resolve themselves, for example while
    /// a dataset is still being written or a network share reconnects.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. }
                | Error::Decode(_)
                | Error::InvalidDescriptor { .. }
                | Error::WorkerPanic { .. }
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<meshtree_decode::DecodeError> for Error {
    fn from(e: meshtree_decode::DecodeError) -> Self {
        Error::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::ResourceNotFound {
            resource: ResourceId::new("Data/a.tile"),
        };
        assert_eq!(err.to_string(), "resource Data/a.tile not found");

        let err = Error::InvalidDescriptor { resources: 2 };
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_permanent_errors() {
        let missing = Error::ResourceNotFound {
            resource: ResourceId::new("Data/a.tile"),
        };
        assert!(!missing.is_permanent());
        assert!(
            !Error::Io {
                path: "a".to_owned(),
                message: "timed out".to_owned(),
            }
            .is_permanent()
        );
        assert!(
            Error::Parse {
                resource: ResourceId::new("Data/a.tile"),
                detail: "truncated".to_owned(),
            }
            .is_permanent()
        );
        assert!(Error::InvalidDescriptor { resources: 0 }.is_permanent());
    }

    #[test]
    fn test_decode_error_source() {
        use std::error::Error as _;

        let err: Error = meshtree_decode::DecodeError::IndexOutOfBounds { index: 3, len: 2 }.into();
        assert!(err.source().is_some());
        assert!(Error::AlreadyLoaded.source().is_none());
    }
}
