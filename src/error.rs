//! Error types for the proxy-session-pool crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the proxy pool.
#[derive(Debug, Error)]
pub enum Error {
    /// No active proxy is left for this session in the current round.
    #[error("no active proxy")]
    NoActiveProxy,

    /// The direct request used as the alive-check baseline failed at startup.
    #[error("alive check baseline request to {url} failed: {source}")]
    BaselineUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Neither persistence source yielded a usable proxy.
    #[error("proxy pool is empty, no usable entries under {}", .0.display())]
    EmptyPool(PathBuf),

    /// A persistence file could not be read or written.
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A probe client could not be built.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
