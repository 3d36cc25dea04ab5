//! Startup configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Values read once at startup and handed to the components that need
/// them.
///
/// There is deliberately no process-global registry: handlers receive an
/// `Arc<Config>` captured at router construction time, so the download
/// pipeline can be driven in tests without a running server or ambient
/// state.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory whose immediate subdirectories are downloadable as
    /// archives.
    pub root: PathBuf,

    /// Pause inserted after each streamed chunk. Zero disables pacing.
    pub pace: Duration,

    /// HTML file served on `GET /`.
    pub index: PathBuf,

    /// Listen address.
    pub addr: SocketAddr,
}
