use core::time::Duration;
use std::io;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio::time::sleep;
use tokio::{join, select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const BUFFER_SIZE: usize = 16 * 1_024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayConfig {
    /// How long the surviving direction may keep running after the other
    /// one has finished. `None` waits for it indefinitely.
    pub drain_timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
    /// The session was torn down by cancellation or the drain timeout
    /// rather than by both sides closing.
    pub cancelled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PipeEnd {
    Eof,
    Cancelled,
    Failed,
}

#[derive(Clone, Copy, Debug)]
struct PipeReport {
    copied: u64,
    end: PipeEnd,
}

/// Relays `a` and `b` to each other until both directions are done, then
/// closes both streams.
///
/// A direction is done when its source reaches EOF, an I/O error occurs on
/// either side, or `token` is cancelled. Reaching EOF shuts down the
/// destination's write side, so the far peer sees the close.
pub async fn bridge<A, B>(a: A, b: B, config: RelayConfig, token: CancellationToken) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let session = token.child_token();
    let half_closed = CancellationToken::new();

    let (a_read, a_write) = split(a);
    let (b_read, b_write) = split(b);

    let forward = spawn(pipe("a->b", a_read, b_write, session.clone(), half_closed.clone()));
    let backward = spawn(pipe("b->a", b_read, a_write, session.clone(), half_closed.clone()));

    let watchdog = spawn(drain_watchdog(
        config.drain_timeout,
        half_closed,
        session.clone(),
    ));

    let (forward, backward) = join!(forward, backward);

    watchdog.abort();

    let forward = settle("a->b", forward);
    let backward = settle("b->a", backward);

    RelayStats {
        a_to_b: forward.copied,
        b_to_a: backward.copied,
        cancelled: forward.end == PipeEnd::Cancelled || backward.end == PipeEnd::Cancelled,
    }
}

async fn drain_watchdog(
    drain_timeout: Option<Duration>,
    half_closed: CancellationToken,
    session: CancellationToken,
) {
    let Some(drain_timeout) = drain_timeout else {
        return;
    };

    half_closed.cancelled().await;
    sleep(drain_timeout).await;

    debug!(?drain_timeout, "Drain timeout elapsed, cancelling relay");
    session.cancel();
}

async fn pipe<R, W>(
    direction: &'static str,
    mut reader: R,
    mut writer: W,
    session: CancellationToken,
    half_closed: CancellationToken,
) -> PipeReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0_u8; BUFFER_SIZE];
    let mut copied = 0_u64;

    let end = loop {
        let read = select! {
            read = reader.read(&mut buf) => read,
            () = session.cancelled() => break PipeEnd::Cancelled,
        };

        let len = match read {
            Ok(0) => break PipeEnd::Eof,
            Ok(len) => len,
            Err(err) => {
                log_failure(direction, "read", &err);
                break PipeEnd::Failed;
            }
        };

        let Some(chunk) = buf.get(..len) else {
            break PipeEnd::Failed;
        };

        let written = select! {
            written = writer.write_all(chunk) => written,
            () = session.cancelled() => break PipeEnd::Cancelled,
        };

        if let Err(err) = written {
            log_failure(direction, "write", &err);
            break PipeEnd::Failed;
        }

        copied = copied.saturating_add(len as u64);
    };

    if end != PipeEnd::Cancelled {
        select! {
            closed = writer.shutdown() => {
                if let Err(err) = closed {
                    debug!(direction, %err, "Failed to close relay destination");
                }
            }
            () = session.cancelled() => {}
        }
    }

    debug!(direction, copied, ?end, "Relay direction finished");

    half_closed.cancel();

    PipeReport { copied, end }
}

fn settle(direction: &str, joined: Result<PipeReport, JoinError>) -> PipeReport {
    match joined {
        Ok(report) => report,
        Err(err) => {
            if err.is_panic() {
                error!(direction, %err, "Relay direction panicked");
            } else {
                warn!(direction, %err, "Relay direction aborted");
            }

            PipeReport {
                copied: 0,
                end: PipeEnd::Cancelled,
            }
        }
    }
}

fn log_failure(direction: &str, op: &str, err: &io::Error) {
    let disconnect = matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
    );

    if disconnect {
        debug!(direction, op, %err, "Relay peer went away");
    } else {
        warn!(direction, op, %err, "Relay I/O failed");
    }
}
