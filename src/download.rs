//! The built-in endpoints: the index page and the archive download
//! pipeline.
//!
//! A download request flows: resolve identifier → spawn compressor → read
//! the first chunk (so a compressor that dies before producing anything
//! still gets a real error status) → commit to a 200 and hand the rest of
//! the stream to a spawned [`relay`] task.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::producer::Producer;
use crate::relay::{CHUNK_SIZE, RelayOutcome, relay};
use crate::request::Request;
use crate::resolve;
use crate::response::{Response, ResponseBuilder};
use crate::router::Router;

/// Streamed-body frame queue depth: the compressor stays at most this
/// many chunks ahead of the client socket.
const STREAM_QUEUE: usize = 4;

/// Builds the application router: the index page on `/` and the
/// streaming download pipeline on `/archive/{identifier}/`.
pub fn router(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> Router {
    let index_config = Arc::clone(&config);
    Router::new()
        .get("/", move |req| index(Arc::clone(&index_config), req))
        .get("/archive/{identifier}/", move |req| {
            archive(Arc::clone(&config), shutdown.clone(), req)
        })
}

/// `GET /`: the landing page, read from disk on every request so it can
/// be edited without a restart.
async fn index(config: Arc<Config>, _req: Request) -> Response {
    match tokio::fs::read_to_string(&config.index).await {
        Ok(page) => Response::html(page),
        Err(err) => {
            error!(path = %config.index.display(), "cannot read index page: {err}");
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `GET /archive/{identifier}/`: the streaming archive pipeline.
async fn archive(config: Arc<Config>, shutdown: watch::Receiver<bool>, req: Request) -> Response {
    let identifier = req.param("identifier").unwrap_or_default().to_owned();

    let Some(dir) = resolve::source_dir(&config.root, &identifier) else {
        warn!(%identifier, "cannot access archive directory");
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .text("Archive not found or has been moved");
    };

    let mut producer = match Producer::spawn(&dir) {
        Ok(producer) => producer,
        Err(err) => {
            error!(%identifier, "{err}");
            return Response::status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    info!(%identifier, "archive download started");

    let mut buf = vec![0u8; CHUNK_SIZE];
    let lead = match producer.read_chunk(&mut buf).await {
        Ok(0) => {
            // Nothing was produced, so the status line is still ours to
            // choose: a clean exit means a legitimately empty archive, a
            // failed one gets the 500 a buffered handler would have sent.
            return match producer.finish().await {
                Ok(status) if status.success() => attachment(&identifier).body(Bytes::new()),
                _ => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
            };
        }
        Ok(n) => Bytes::copy_from_slice(&buf[..n]),
        Err(err) => {
            warn!(%identifier, "reading compressor output failed: {err}");
            producer.abort().await;
            return Response::status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let (writer, response) = attachment(&identifier).stream(STREAM_QUEUE);
    let pace = config.pace;
    tokio::spawn(async move {
        match relay(producer, writer, lead, pace, shutdown).await {
            RelayOutcome::Completed { bytes_sent } => {
                info!(%identifier, bytes_sent, "archive sent");
            }
            RelayOutcome::ProducerFailed { bytes_sent, status } => {
                warn!(%identifier, bytes_sent, ?status, "compressor failed after streaming began");
            }
            RelayOutcome::ClientCancelled { bytes_sent } => {
                info!(%identifier, bytes_sent, "download interrupted");
            }
            RelayOutcome::KillTimeout { bytes_sent } => {
                error!(%identifier, bytes_sent, "compressor outlived its kill grace period");
            }
        }
    });

    response
}

fn attachment(identifier: &str) -> ResponseBuilder {
    Response::builder()
        .header("content-type", "application/octet-stream")
        .header(
            "content-disposition",
            &format!("attachment; filename=\"{identifier}.zip\""),
        )
}
