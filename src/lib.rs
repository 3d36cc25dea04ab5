//! # zipline
//!
//! On-demand zip delivery over HTTP. `GET /archive/{identifier}/` spawns
//! `zip -r - .` in the matching directory under a configured root and
//! relays the compressor's stdout to the client in 100 KiB chunks. The
//! download starts with the first compressed bytes; nothing is buffered
//! whole or written to disk.
//!
//! ## The pipeline
//!
//! Three pieces, composed per request:
//!
//! - [`Producer`] owns the external compression process and its pipes
//!   for one request, and reaps it on every exit path.
//! - [`relay`] copies chunks from producer to client, optionally pacing
//!   itself, and resolves the four ways a download can end
//!   ([`RelayOutcome`]): completed, producer failed, client cancelled, or
//!   a compressor that refused to die.
//! - the HTTP layer is a small hyper server with radix-tree routing
//!   ([`matchit`]), streamed response bodies, and graceful
//!   SIGTERM / Ctrl-C shutdown that in-flight downloads observe.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio::sync::watch;
//! use zipline::{Config, Server, download, server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), zipline::Error> {
//!     let config = Arc::new(Config {
//!         root: "photos".into(),
//!         pace: Duration::from_millis(200),
//!         index: "index.html".into(),
//!         addr: "0.0.0.0:8080".parse().expect("valid address"),
//!     });
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn(async move {
//!         server::shutdown_signal().await;
//!         let _ = shutdown_tx.send(true);
//!     });
//!
//!     let router = download::router(Arc::clone(&config), shutdown_rx.clone());
//!     Server::bind(config.addr).await?.serve(router, shutdown_rx).await
//! }
//! ```

mod config;
mod error;
mod handler;
mod producer;
mod relay;
mod request;
mod resolve;
mod response;
mod router;

pub mod download;
pub mod server;

pub use config::Config;
pub use error::Error;
pub use handler::Handler;
pub use producer::{Abort, Producer};
pub use relay::{ArchiveSource, CHUNK_SIZE, ChunkSink, RelayOutcome, SinkClosed, relay};
pub use request::Request;
pub use response::{BodyWriter, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
