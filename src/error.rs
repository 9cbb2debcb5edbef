//! Error kinds for the extraction and classification pipeline.
//!
//! Per-partition and per-file errors are recoverable: the caller logs them and
//! moves on. Output, input-discovery and cancellation errors end the run.

use std::path::PathBuf;

use crate::unpack::BackendKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot detect format of {path}: {reason}")]
    FormatDetection { path: PathBuf, reason: String },

    #[error("sparse conversion of {path} failed: {diagnostic}")]
    Conversion { path: PathBuf, diagnostic: String },

    #[error("[{partition}] mount backend failed: {diagnostic}")]
    Mount { partition: String, diagnostic: String },

    #[error("[{partition}] filesystem dump failed: {diagnostic}")]
    Dump { partition: String, diagnostic: String },

    #[error("[{partition}] archive extraction failed: {diagnostic}")]
    ArchiveExtract { partition: String, diagnostic: String },

    #[error("[{partition}] container unpack failed: {diagnostic}")]
    ContainerUnpack { partition: String, diagnostic: String },

    #[error("[{partition}] walk failed at {path}: {reason}")]
    Walk {
        partition: String,
        path: PathBuf,
        reason: String,
    },

    #[error("copy of {relative_path} failed: {source}")]
    Copy {
        relative_path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rule set {path} is unusable: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("cannot prepare output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable partition images found in {0}")]
    NoImages(PathBuf),

    #[error("run cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the run may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Output { .. } | Error::NoImages(_) | Error::Cancelled
        )
    }

    /// Error for a failed attempt of the given backend.
    pub fn backend(kind: BackendKind, partition: &str, diagnostic: impl Into<String>) -> Self {
        let partition = partition.to_string();
        let diagnostic = diagnostic.into();
        match kind {
            BackendKind::Container => Error::ContainerUnpack {
                partition,
                diagnostic,
            },
            BackendKind::Mount => Error::Mount {
                partition,
                diagnostic,
            },
            BackendKind::Dump => Error::Dump {
                partition,
                diagnostic,
            },
            BackendKind::Archive | BackendKind::Directory => Error::ArchiveExtract {
                partition,
                diagnostic,
            },
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a context string to `std::io::Result`, the way `anyhow::Context` does.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
