//! The external compression process.
//!
//! A [`Producer`] owns one `zip` child for the lifetime of one request:
//! its stdout is the archive byte stream, its stderr is drained
//! concurrently into a capped buffer for diagnostics. Both ways out,
//! [`finish`](Producer::finish) after end-of-stream and
//! [`abort`](Producer::abort) on cancellation, reap the process before
//! returning. No zombie, no leaked pipe.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Error;

/// How long an aborted compressor gets to die before it is declared
/// leaked.
pub(crate) const KILL_GRACE: Duration = Duration::from_secs(2);

/// Cap on retained compressor diagnostics. The pipe is drained past this
/// so the compressor never blocks on a full stderr.
const STDERR_CAP: usize = 16 * 1024;

/// A running compression process and its I/O handles.
#[derive(Debug)]
pub struct Producer {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<Vec<u8>>,
}

/// What became of an aborted compressor.
#[derive(Debug)]
pub enum Abort {
    /// Killed and reaped; exit status collected.
    Reaped(ExitStatus),
    /// Still not reaped when the grace period elapsed. A resource-leak
    /// fault: reported loudly, but never waited out indefinitely.
    KillTimeout,
}

impl Producer {
    /// Starts `zip -r - .` inside `dir`.
    ///
    /// The directory is the child's working directory, so archive entries
    /// are stored relative to it and no host paths leak into the archive.
    /// The caller has already verified `dir` exists; a spawn failure here
    /// means the binary itself is missing or unusable.
    pub fn spawn(dir: &Path) -> Result<Self, Error> {
        let mut command = Command::new("zip");
        command.args(["-r", "-", "."]).current_dir(dir);
        Self::spawn_command(command).map_err(|source| Error::SpawnCompressor {
            dir: dir.to_path_buf(),
            source,
        })
    }

    /// Seam shared by [`spawn`](Self::spawn) and tests that substitute a
    /// scripted command for the real compressor.
    pub(crate) fn spawn_command(mut command: Command) -> io::Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = drain_stderr(child.stderr.take().expect("stderr is piped"));
        Ok(Self { child, stdout, stderr })
    }

    /// Reads up to `buf.len()` bytes of archive output. `Ok(0)` means the
    /// compressor closed its output, i.e. end of stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf).await
    }

    /// End-of-stream path: waits for the process to exit and collects its
    /// status. Captured diagnostics are logged when the status is not
    /// success.
    pub async fn finish(mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        let diagnostics = self.stderr.await.unwrap_or_default();
        if !status.success() {
            let text = String::from_utf8_lossy(&diagnostics);
            warn!(%status, stderr = %text.trim_end(), "compressor reported failure");
        }
        Ok(status)
    }

    /// Cancellation path: kills the process and reaps it within
    /// [`KILL_GRACE`]. If the grace period elapses the child is left to
    /// the runtime's kill-on-drop backstop and the leak is reported.
    pub async fn abort(mut self) -> Abort {
        if let Err(err) = self.child.start_kill() {
            // Kill only fails when the process has already exited.
            debug!("kill signal not delivered: {err}");
        }
        match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "compressor reaped after kill");
                Abort::Reaped(status)
            }
            Ok(Err(err)) => {
                error!("failed to reap compressor: {err}");
                Abort::KillTimeout
            }
            Err(_) => {
                error!("compressor did not exit within {KILL_GRACE:?} of kill");
                Abort::KillTimeout
            }
        }
    }
}

impl crate::relay::ArchiveSource for Producer {
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        Producer::read_chunk(self, buf)
    }

    fn finish(self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        Producer::finish(self)
    }

    fn abort(self) -> impl Future<Output = Abort> + Send {
        Producer::abort(self)
    }
}

/// Reads the whole stderr pipe, retaining at most [`STDERR_CAP`] bytes.
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_CAP.saturating_sub(kept.len());
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        kept
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    async fn read_all(producer: &mut Producer) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = producer.read_chunk(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn streams_stdout_and_reports_success() {
        let mut producer = Producer::spawn_command(sh("printf abc")).unwrap();
        assert_eq!(read_all(&mut producer).await, b"abc");
        assert!(producer.finish().await.unwrap().success());
    }

    #[tokio::test]
    async fn nonzero_exit_is_visible_after_eof() {
        let mut producer =
            Producer::spawn_command(sh("printf partial; echo boom >&2; exit 3")).unwrap();
        assert_eq!(read_all(&mut producer).await, b"partial");
        assert_eq!(producer.finish().await.unwrap().code(), Some(3));
    }

    #[tokio::test]
    async fn abort_reaps_a_running_process() {
        let producer = Producer::spawn_command(sh("sleep 30")).unwrap();
        match producer.abort().await {
            Abort::Reaped(status) => assert!(!status.success()),
            Abort::KillTimeout => panic!("sleep should die on kill"),
        }
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = Producer::spawn_command(Command::new("zipline-no-such-binary")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
