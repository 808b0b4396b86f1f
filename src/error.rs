//! Error taxonomy shared by the library and the command-line front-end.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::parse::ParseError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All the ways a run can fail.
///
/// The taxonomy maps onto process exit codes: usage errors exit with `2`,
/// everything else with `1`. Validation errors that allow the run to make
/// progress are accumulated by the validator and only become an
/// [`Error::Semantic`] where they are fatal (the write path).
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or conflicting options, unknown operation or enum value.
    #[error("{0}")]
    Usage(String),
    /// The schema source could not be loaded or parsed.
    #[error("could not load {source_name} '{path}': {cause}")]
    Schema {
        /// Which option named the source (`schema-file` or `system-schema`).
        source_name: &'static str,
        /// The offending path or table name.
        path: String,
        /// Human-readable cause.
        cause: String,
    },
    /// The structured-stream parser rejected its input.
    #[error(transparent)]
    Structural(#[from] ParseError),
    /// Stream validation detected ordering violations.
    #[error("validation found {0} error(s)")]
    Semantic(u64),
    /// An error from the file layer, with the offending path.
    #[error("{}: {source}", path.display())]
    Io {
        /// The path the operation failed on.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// An error surfaced by the sstable codec.
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Process exit code mandated for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) => 2,
            _ => 1,
        }
    }
}
