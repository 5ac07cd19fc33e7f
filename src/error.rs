/// Error handling module for Redis Memory Server.
///
/// This module defines the error types used throughout the library.
/// Each failure carries enough context (attempted path, URL or classified
/// reason) to tell a configuration mistake apart from a transient
/// environment problem or a broken binary provider.
///
/// # Example
///
/// ```
/// use redis_memory_server::error::{DownloadError, Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::PortConflict { port }) => println!("Port {} is taken", port),
///         Err(Error::Download(DownloadError::NotFound { url })) => {
///             println!("No such release: {}", url)
///         }
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the archive download and install pipeline.
///
/// All of these are fatal to the resolution attempt that produced them and
/// none are retried automatically.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The release archive does not exist on the mirror (HTTP 404).
    ///
    /// This usually means the requested version doesn't exist.
    #[error(
        "Status Code is 404, the requested version doesn't exist (used url: \"{url}\"). Try a different version"
    )]
    NotFound { url: String },

    /// The server answered with a status other than 200 or 404.
    #[error("Unexpected status code {status} while downloading {url}")]
    BadStatus { status: u16, url: String },

    /// The response did not declare a content length.
    #[error("Response header \"content-length\" is empty for {url}")]
    MissingContentLength { url: String },

    /// The transfer ended before the declared content length was reached.
    #[error("Too small ({received} of {expected} bytes) redis-server archive downloaded from {url}")]
    Truncated {
        received: u64,
        expected: u64,
        url: String,
    },

    /// The archive format is not one the installer can extract.
    #[error(
        "Unsupported archive {archive} (downloaded from {url}). Broken archive from Redis provider?"
    )]
    UnsupportedArchive { archive: PathBuf, url: String },

    /// The downloaded archive does not match the configured SHA-256.
    #[error("Checksum mismatch for downloaded archive: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Building the executable from the extracted sources failed.
    #[error("Building redis-server failed: {0}")]
    BuildFailed(String),

    /// The pipeline finished but the executable is not where it should be.
    #[error("Cannot find downloaded redis-server binary by path {}", path.display())]
    MissingBinary { path: PathBuf },

    /// The download URL cannot be used.
    #[error("Provided incorrect download url: {0}")]
    InvalidUrl(String),

    /// Transport level failure talking to the mirror.
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Errors that can occur in the redis-memory-server library.
///
/// This enum represents all possible error types that can be returned from
/// operations in the library. Each variant includes context information to
/// help diagnose and handle the error appropriately.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable redis-server binary could be established.
    #[error("Could not find a valid redis-server binary path: {0}")]
    Resolution(String),

    /// Downloading or installing the binary failed.
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    /// The server reported that its port is already bound.
    ///
    /// This is the only failure the orchestrator retries automatically.
    #[error("Port {port} already in use")]
    PortConflict { port: u16 },

    /// The server process failed to start or crashed.
    ///
    /// The message is the classified reason, e.g. `redis-server permission denied`.
    #[error("Server process error: {0}")]
    Process(String),

    /// Graceful and forceful termination were both exhausted.
    ///
    /// The process may still be alive.
    #[error("Process {name} (pid {pid}) didn't exit after SIGINT and SIGKILL")]
    ShutdownTimeout { name: String, pid: u32 },

    /// The download lock could not be acquired or handled.
    #[error("Download lock error: {0}")]
    Lock(String),

    /// Failed to parse a project configuration file.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration or options contain invalid values.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An instance is already starting, running or has failed on this handle.
    #[error("Redis instance already in status startup/running/error")]
    AlreadyRunning,

    /// The operation requires a running instance.
    #[error("Not running")]
    NotRunning,

    /// Filesystem or pipe I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this failure is the port conflict classification.
    pub fn is_port_conflict(&self) -> bool {
        matches!(self, Error::PortConflict { .. })
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Http(err.to_string())
    }
}

/// Result type for redis-memory-server operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;
