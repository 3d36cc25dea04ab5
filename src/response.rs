//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Two kinds of body exist: buffered pages (the index page, 404 text) and
//! live streams fed frame-by-frame while an archive is being produced. Both
//! are erased into one [`Body`] so the server's dispatch path does not care
//! which it is sending.

use bytes::Bytes;
use http::StatusCode;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use crate::error::Error;
use crate::relay::{ChunkSink, SinkClosed};

/// The erased response body handed to hyper.
pub(crate) type Body = BoxBody<Bytes, Error>;

fn buffered(bytes: Bytes) -> Body {
    Full::new(bytes)
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use http::StatusCode;
/// use zipline::Response;
///
/// Response::text("hello");
/// Response::html("<h1>hi</h1>");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status, headers, or a streamed body)
///
/// ```rust
/// use http::StatusCode;
/// use zipline::Response;
///
/// Response::builder()
///     .status(StatusCode::NOT_FOUND)
///     .text("Archive not found");
///
/// let (_writer, _response) = Response::builder()
///     .header("content-type", "application/octet-stream")
///     .stream(4);
/// ```
pub struct Response {
    inner: http::Response<Body>,
}

impl Response {
    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::bytes_raw("text/plain; charset=utf-8", body.into().into_bytes())
    }

    /// `200 OK` with `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::bytes_raw("text/html; charset=utf-8", body.into().into_bytes())
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        let mut inner = http::Response::new(buffered(Bytes::new()));
        *inner.status_mut() = code;
        Self { inner }
    }

    /// Builder for responses that need a custom status, extra headers, or
    /// a streamed body.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    fn bytes_raw(content_type: &str, body: Vec<u8>) -> Self {
        Response::builder()
            .header("content-type", content_type)
            .body(Bytes::from(body))
    }

    pub(crate) fn into_inner(self) -> http::Response<Body> {
        self.inner
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by
/// a body method: [`text`](Self::text), [`body`](Self::body), or
/// [`stream`](Self::stream).
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.header("content-type", "text/plain; charset=utf-8")
            .body(Bytes::from(body.into()))
    }

    /// Terminate with a buffered body. Content type comes from the headers
    /// already set on the builder.
    pub fn body(self, body: Bytes) -> Response {
        self.finish(buffered(body))
    }

    /// Terminate with a streamed body.
    ///
    /// Returns the response to hand back to the server together with a
    /// [`BodyWriter`] feeding it. Frames queue up to `depth` chunks, so a
    /// producer stays only that far ahead of the client socket. Dropping
    /// the writer ends the body normally; [`BodyWriter::fail`] ends it
    /// abnormally.
    pub fn stream(self, depth: usize) -> (BodyWriter, Response) {
        let (tx, rx) = mpsc::channel(depth);
        let body = StreamBody::new(ReceiverStream::new(rx)).boxed();
        (BodyWriter { tx }, self.finish(body))
    }

    fn finish(self, body: Body) -> Response {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match builder.body(body) {
            Ok(inner) => Response { inner },
            Err(err) => {
                error!("invalid response metadata: {err}");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

// ── BodyWriter ────────────────────────────────────────────────────────────────

/// The feeding end of a streamed response body.
///
/// Each [`send`](Self::send) becomes one HTTP body frame. The writer
/// observes the client side going away: `send` fails and
/// [`closed`](Self::closed) resolves once the connection (and with it the
/// receiving half) is gone.
pub struct BodyWriter {
    tx: mpsc::Sender<Result<Frame<Bytes>, Error>>,
}

impl BodyWriter {
    /// Queues one chunk for delivery. Blocks while the frame queue is
    /// full; fails once the client side is gone.
    pub async fn send(&self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(Ok(Frame::data(chunk))).await.map_err(|_| SinkClosed)
    }

    /// Resolves when the receiving half has been dropped: the client
    /// disconnected or the connection was torn down.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Ends the body abnormally: the connection is terminated without the
    /// end-of-stream marker, so the client sees an incomplete download
    /// rather than a file that silently ends early.
    pub async fn fail(&self) {
        let _ = self.tx.send(Err(Error::StreamAborted)).await;
    }
}

impl ChunkSink for BodyWriter {
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), SinkClosed>> + Send {
        BodyWriter::send(self, chunk)
    }

    fn closed(&mut self) -> impl Future<Output = ()> + Send {
        BodyWriter::closed(self)
    }

    fn fail(&mut self) -> impl Future<Output = ()> + Send {
        BodyWriter::fail(self)
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`], implemented for everything a
/// handler may return directly.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::text(self)
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::text(self)
    }
}

/// Return a [`StatusCode`] directly from a handler.
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        Response::status(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};

    #[tokio::test]
    async fn text_response_sets_type_and_body() {
        let resp = Response::text("hello").into_inner();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn builder_carries_status_and_headers() {
        let resp = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-disposition", "attachment; filename=\"x.zip\"")
            .text("gone")
            .into_inner();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get(CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"x.zip\""
        );
    }

    #[tokio::test]
    async fn streamed_body_delivers_chunks_in_order() {
        let (writer, resp) = Response::builder().stream(4);
        writer.send(Bytes::from_static(b"one")).await.unwrap();
        writer.send(Bytes::from_static(b"two")).await.unwrap();
        drop(writer);

        let body = resp.into_inner().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"onetwo");
    }

    #[tokio::test]
    async fn failed_stream_surfaces_as_body_error() {
        let (writer, resp) = Response::builder().stream(4);
        writer.send(Bytes::from_static(b"partial")).await.unwrap();
        writer.fail().await;
        drop(writer);

        assert!(resp.into_inner().into_body().collect().await.is_err());
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (writer, resp) = Response::builder().stream(1);
        drop(resp);
        writer.closed().await;
        assert!(writer.send(Bytes::from_static(b"late")).await.is_err());
    }
}
