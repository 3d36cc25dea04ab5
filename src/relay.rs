//! The chunk relay between compressor and client.
//!
//! [`relay`] moves bytes from an [`ArchiveSource`] into a [`ChunkSink`]
//! one chunk at a time and resolves exactly one [`RelayOutcome`] when it
//! is done. The four outcomes are mutually exclusive by construction,
//! with no overlapping error handling to reason about, and every one of
//! them has reaped the producer by the time `relay` returns.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::producer::Abort;

/// One read from the compressor, one frame to the client.
pub const CHUNK_SIZE: usize = 100 * 1024;

/// What the relay needs from an archive producer. Implemented by
/// [`Producer`](crate::Producer) and by scripted doubles in tests.
pub trait ArchiveSource: Send {
    /// Reads up to `buf.len()` bytes of archive output; `Ok(0)` means
    /// end-of-stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// End-of-stream path: waits for the producer to exit and yields its
    /// status. Must reap the process.
    fn finish(self) -> impl Future<Output = io::Result<ExitStatus>> + Send;

    /// Cancellation path: stops the producer and reaps it within a
    /// bounded grace period.
    fn abort(self) -> impl Future<Output = Abort> + Send;
}

/// Where relayed chunks go. Implemented by
/// [`BodyWriter`](crate::BodyWriter) and by recording doubles in tests.
pub trait ChunkSink: Send {
    /// Delivers one chunk; fails once the receiving side is gone.
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), SinkClosed>> + Send;

    /// Resolves when the receiving side is gone, so cancellation
    /// interrupts the relay even while it is blocked reading the
    /// compressor.
    fn closed(&mut self) -> impl Future<Output = ()> + Send;

    /// Ends the stream abnormally, so the client cannot mistake a
    /// truncated download for a complete one.
    fn fail(&mut self) -> impl Future<Output = ()> + Send;
}

/// The receiving half of a [`ChunkSink`] has been dropped.
#[derive(Debug)]
pub struct SinkClosed;

/// Why the relay ended. Exactly one outcome is produced per request, and
/// in every case the producer has already been reaped (or, for
/// [`KillTimeout`](Self::KillTimeout), loudly given up on).
#[derive(Debug, PartialEq)]
pub enum RelayOutcome {
    /// End-of-stream with a successful compressor exit; the body was
    /// finalized normally.
    Completed { bytes_sent: u64 },
    /// The compressor reported failure. Bytes already sent cannot be
    /// un-sent; the stream was ended abnormally instead.
    ProducerFailed { bytes_sent: u64, status: Option<ExitStatus> },
    /// The client went away, or the server is shutting down. Not an
    /// error.
    ClientCancelled { bytes_sent: u64 },
    /// The compressor ignored the kill signal for the whole grace
    /// period. A resource-leak fault.
    KillTimeout { bytes_sent: u64 },
}

/// Copies archive bytes from `source` into `sink` until end-of-stream,
/// cancellation, or failure.
///
/// `lead` is a chunk the caller already read (to distinguish "failed
/// before producing anything" from mid-stream failure); it is delivered
/// first and counted. When `pace` is non-zero the loop pauses that long
/// after each chunk, bounding peak throughput.
///
/// Every suspension point (reading the source, sending to the sink, the
/// pacing pause) races the sink's close signal and the server `shutdown`
/// flag, so a vanished client or a terminating server interrupts the
/// relay promptly instead of being noticed a chunk later.
pub async fn relay<S, K>(
    mut source: S,
    mut sink: K,
    lead: Bytes,
    pace: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> RelayOutcome
where
    S: ArchiveSource,
    K: ChunkSink,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pending = lead;
    let mut bytes_sent: u64 = 0;

    loop {
        if !pending.is_empty() {
            let chunk = std::mem::take(&mut pending);
            let len = chunk.len() as u64;
            let delivered = tokio::select! {
                biased;
                _ = async { let _ = shutdown.wait_for(|&stop| stop).await; } => Err(SinkClosed),
                sent = sink.send(chunk) => sent,
            };
            if delivered.is_err() {
                return cancelled(source, bytes_sent).await;
            }
            bytes_sent += len;
            debug!(len, "sent archive chunk");

            if !pace.is_zero() {
                tokio::select! {
                    biased;
                    () = sink.closed() => return cancelled(source, bytes_sent).await,
                    _ = async { let _ = shutdown.wait_for(|&stop| stop).await; } => {
                        return cancelled(source, bytes_sent).await;
                    }
                    () = tokio::time::sleep(pace) => {}
                }
            }
        }

        let read = tokio::select! {
            biased;
            () = sink.closed() => return cancelled(source, bytes_sent).await,
            _ = async { let _ = shutdown.wait_for(|&stop| stop).await; } => return cancelled(source, bytes_sent).await,
            read = source.read_chunk(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => pending = Bytes::copy_from_slice(&buf[..n]),
            Err(err) => {
                warn!("reading compressor output failed: {err}");
                sink.fail().await;
                return match source.abort().await {
                    Abort::Reaped(status) => RelayOutcome::ProducerFailed {
                        bytes_sent,
                        status: Some(status),
                    },
                    Abort::KillTimeout => RelayOutcome::KillTimeout { bytes_sent },
                };
            }
        }
    }

    match source.finish().await {
        Ok(status) if status.success() => RelayOutcome::Completed { bytes_sent },
        Ok(status) => {
            sink.fail().await;
            RelayOutcome::ProducerFailed { bytes_sent, status: Some(status) }
        }
        Err(err) => {
            warn!("collecting compressor exit status failed: {err}");
            sink.fail().await;
            RelayOutcome::ProducerFailed { bytes_sent, status: None }
        }
    }
}

/// Common cancellation tail: stop the producer, then report how the
/// request ended. Cancellation is reported to the caller, never swallowed
/// into a success.
async fn cancelled<S: ArchiveSource>(source: S, bytes_sent: u64) -> RelayOutcome {
    match source.abort().await {
        Abort::Reaped(status) => {
            debug!(%status, "compressor stopped after cancellation");
            RelayOutcome::ClientCancelled { bytes_sent }
        }
        Abort::KillTimeout => RelayOutcome::KillTimeout { bytes_sent },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::{Arc, Mutex};

    fn exit(code: i32) -> ExitStatus {
        ExitStatusExt::from_raw(code << 8)
    }

    fn killed() -> ExitStatus {
        ExitStatusExt::from_raw(9)
    }

    struct ScriptedSource {
        chunks: VecDeque<Vec<u8>>,
        exit: ExitStatus,
        on_abort: Option<Abort>,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ScriptedSource {
        fn new(chunks: &[&[u8]], exit_code: i32) -> (Self, Arc<Mutex<Vec<&'static str>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            let source = Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                exit: exit(exit_code),
                on_abort: Some(Abort::Reaped(killed())),
                events: Arc::clone(&events),
            };
            (source, events)
        }
    }

    impl ArchiveSource for ScriptedSource {
        fn read_chunk(
            &mut self,
            buf: &mut [u8],
        ) -> impl Future<Output = io::Result<usize>> + Send {
            let next = self.chunks.pop_front();
            async move {
                match next {
                    Some(chunk) => {
                        buf[..chunk.len()].copy_from_slice(&chunk);
                        Ok(chunk.len())
                    }
                    None => Ok(0),
                }
            }
        }

        fn finish(self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
            async move {
                self.events.lock().unwrap().push("finish");
                Ok(self.exit)
            }
        }

        fn abort(mut self) -> impl Future<Output = Abort> + Send {
            async move {
                self.events.lock().unwrap().push("abort");
                self.on_abort.take().expect("abort scripted")
            }
        }
    }

    #[derive(Clone, Default)]
    struct TestSink {
        state: Arc<Mutex<SinkState>>,
        /// Once this many chunks are in, the sink behaves as if the
        /// client disconnected.
        reject_after: Option<usize>,
    }

    #[derive(Default)]
    struct SinkState {
        sent: Vec<Bytes>,
        failed: bool,
    }

    impl TestSink {
        fn sent(&self) -> Vec<Bytes> {
            self.state.lock().unwrap().sent.clone()
        }

        fn failed(&self) -> bool {
            self.state.lock().unwrap().failed
        }
    }

    impl ChunkSink for TestSink {
        fn send(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), SinkClosed>> + Send {
            let state = Arc::clone(&self.state);
            let reject_after = self.reject_after;
            async move {
                let mut state = state.lock().unwrap();
                if reject_after.is_some_and(|n| state.sent.len() >= n) {
                    return Err(SinkClosed);
                }
                state.sent.push(chunk);
                Ok(())
            }
        }

        fn closed(&mut self) -> impl Future<Output = ()> + Send {
            let state = Arc::clone(&self.state);
            let reject_after = self.reject_after;
            async move {
                let gone =
                    reject_after.is_some_and(|n| state.lock().unwrap().sent.len() >= n);
                if !gone {
                    std::future::pending::<()>().await;
                }
            }
        }

        fn fail(&mut self) -> impl Future<Output = ()> + Send {
            let state = Arc::clone(&self.state);
            async move {
                state.lock().unwrap().failed = true;
            }
        }
    }

    fn live_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn completed_delivers_all_chunks_in_order() {
        let (source, events) = ScriptedSource::new(&[b"bbb".as_slice(), b"cc".as_slice()], 0);
        let sink = TestSink::default();
        let (_tx, rx) = live_shutdown();

        let outcome = relay(
            source,
            sink.clone(),
            Bytes::from_static(b"aaaa"),
            Duration::ZERO,
            rx,
        )
        .await;

        assert_eq!(outcome, RelayOutcome::Completed { bytes_sent: 9 });
        assert_eq!(sink.sent(), vec![&b"aaaa"[..], &b"bbb"[..], &b"cc"[..]]);
        assert!(!sink.failed());
        assert_eq!(*events.lock().unwrap(), vec!["finish"]);
    }

    #[tokio::test]
    async fn producer_failure_fails_the_sink() {
        let (source, events) = ScriptedSource::new(&[b"data".as_slice()], 12);
        let sink = TestSink::default();
        let (_tx, rx) = live_shutdown();

        let outcome = relay(source, sink.clone(), Bytes::new(), Duration::ZERO, rx).await;

        assert_eq!(
            outcome,
            RelayOutcome::ProducerFailed { bytes_sent: 4, status: Some(exit(12)) }
        );
        assert!(sink.failed());
        assert_eq!(*events.lock().unwrap(), vec!["finish"]);
    }

    #[tokio::test]
    async fn client_disconnect_aborts_producer_within_one_cycle() {
        let (source, events) = ScriptedSource::new(
            &[b"one".as_slice(), b"two".as_slice(), b"three".as_slice(), b"four".as_slice()],
            0,
        );
        let sink = TestSink { reject_after: Some(1), ..TestSink::default() };
        let (_tx, rx) = live_shutdown();

        let outcome = relay(source, sink.clone(), Bytes::new(), Duration::ZERO, rx).await;

        assert_eq!(outcome, RelayOutcome::ClientCancelled { bytes_sent: 3 });
        assert_eq!(sink.sent(), vec![&b"one"[..]]);
        assert!(!sink.failed());
        assert_eq!(*events.lock().unwrap(), vec!["abort"]);
    }

    #[tokio::test]
    async fn shutdown_cancels_before_any_read() {
        let (source, events) = ScriptedSource::new(&[b"never".as_slice()], 0);
        let sink = TestSink::default();
        let (tx, rx) = live_shutdown();
        tx.send(true).unwrap();

        let outcome = relay(source, sink.clone(), Bytes::new(), Duration::ZERO, rx).await;

        assert_eq!(outcome, RelayOutcome::ClientCancelled { bytes_sent: 0 });
        assert!(sink.sent().is_empty());
        assert_eq!(*events.lock().unwrap(), vec!["abort"]);
    }

    #[tokio::test]
    async fn unkillable_producer_is_reported() {
        let (mut source, events) = ScriptedSource::new(&[], 0);
        source.on_abort = Some(Abort::KillTimeout);
        let sink = TestSink { reject_after: Some(0), ..TestSink::default() };
        let (_tx, rx) = live_shutdown();

        let outcome = relay(
            source,
            sink.clone(),
            Bytes::from_static(b"x"),
            Duration::ZERO,
            rx,
        )
        .await;

        assert_eq!(outcome, RelayOutcome::KillTimeout { bytes_sent: 0 });
        assert_eq!(*events.lock().unwrap(), vec!["abort"]);
    }

    #[tokio::test]
    async fn read_error_fails_sink_and_aborts_producer() {
        struct BrokenSource {
            events: Arc<Mutex<Vec<&'static str>>>,
        }

        impl ArchiveSource for BrokenSource {
            fn read_chunk(
                &mut self,
                _buf: &mut [u8],
            ) -> impl Future<Output = io::Result<usize>> + Send {
                async { Err(io::Error::other("pipe burst")) }
            }

            fn finish(self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
                async move {
                    self.events.lock().unwrap().push("finish");
                    Ok(exit(0))
                }
            }

            fn abort(self) -> impl Future<Output = Abort> + Send {
                async move {
                    self.events.lock().unwrap().push("abort");
                    Abort::Reaped(killed())
                }
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let source = BrokenSource { events: Arc::clone(&events) };
        let sink = TestSink::default();
        let (_tx, rx) = live_shutdown();

        let outcome = relay(source, sink.clone(), Bytes::new(), Duration::ZERO, rx).await;

        assert_eq!(
            outcome,
            RelayOutcome::ProducerFailed { bytes_sent: 0, status: Some(killed()) }
        );
        assert!(sink.failed());
        assert_eq!(*events.lock().unwrap(), vec!["abort"]);
    }
}
