//! Unified error type.

use std::io;
use std::path::PathBuf;

/// The error type returned by zipline's fallible operations.
///
/// Application-level outcomes (a missing archive directory, a failed
/// download) are expressed as HTTP [`Response`](crate::Response) values,
/// not as `Error`s. This type surfaces infrastructure failures: binding to
/// a port, accepting a connection, or starting the compression process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket-level failure: bind, accept, or local address lookup.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// The compression executable could not be started: binary missing
    /// from `PATH` or not executable. A server-side fault, never a 404.
    #[error("failed to start compressor in {dir}: {source}")]
    SpawnCompressor { dir: PathBuf, source: io::Error },

    /// Pushed into a streaming body to end it without the normal
    /// end-of-stream marker, so HTTP framing reports the download as
    /// incomplete instead of quietly truncated.
    #[error("archive stream aborted")]
    StreamAborted,
}
