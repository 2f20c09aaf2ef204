//! Bidirectional byte relay.
//!
//! Two half-duplex pumps (client → backend, backend → client) run
//! concurrently and share one cancellation token and one idle clock:
//! - EOF in one direction shuts down the peer's write side; the other
//!   direction keeps flowing
//! - an I/O error, write stall or idle expiry cancels both directions
//! - cancelling the parent token (forced shutdown) stops both directions

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

const BUF_SIZE: usize = 16 * 1024;

/// How a relay ended.
#[derive(Debug)]
pub enum RelayEnd {
    /// Both directions reached EOF.
    Closed,
    /// No bytes moved in either direction for the idle timeout.
    IdleTimeout,
    /// The session was force-closed from outside.
    Cancelled,
    /// A read or write failed on either socket.
    Error(io::Error),
}

/// Bytes moved and how the relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    pub to_backend: u64,
    pub to_client: u64,
    pub end: RelayEnd,
}

/// Last-activity timestamp shared by both directions.
struct IdleClock {
    origin: Instant,
    last_ms: AtomicU64,
    idle: Duration,
}

impl IdleClock {
    fn new(idle: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
            idle,
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn remaining(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        let quiet = self.origin.elapsed().saturating_sub(last);
        self.idle.saturating_sub(quiet)
    }

    fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

enum DirectionEnd {
    Eof,
    Idle,
    Cancelled,
    Error(io::Error),
}

/// Relay until both directions finish, an error or idle expiry occurs, or
/// `cancel` fires. Both streams are dropped (closed) on return.
pub async fn relay<C, B>(client: C, backend: B, idle: Duration, cancel: &CancellationToken) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let clock = IdleClock::new(idle);
    let token = cancel.child_token();

    let ((to_backend, up), (to_client, down)) = tokio::join!(
        pump(client_read, backend_write, &clock, &token),
        pump(backend_read, client_write, &clock, &token),
    );

    let end = match (up, down) {
        (DirectionEnd::Error(e), _) | (_, DirectionEnd::Error(e)) => RelayEnd::Error(e),
        (DirectionEnd::Idle, _) | (_, DirectionEnd::Idle) => RelayEnd::IdleTimeout,
        (DirectionEnd::Eof, DirectionEnd::Eof) => RelayEnd::Closed,
        _ => RelayEnd::Cancelled,
    };

    RelayOutcome {
        to_backend,
        to_client,
        end,
    }
}

async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    clock: &IdleClock,
    token: &CancellationToken,
) -> (u64, DirectionEnd)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => return (total, DirectionEnd::Cancelled),
            r = time::timeout(clock.remaining(), reader.read(&mut buf)) => r,
        };

        let n = match read {
            // The other direction may have been active meanwhile.
            Err(_) if !clock.expired() => continue,
            Err(_) => {
                token.cancel();
                return (total, DirectionEnd::Idle);
            }
            Ok(Err(e)) => {
                token.cancel();
                return (total, DirectionEnd::Error(e));
            }
            Ok(Ok(0)) => {
                let _ = time::timeout(clock.idle, writer.shutdown()).await;
                return (total, DirectionEnd::Eof);
            }
            Ok(Ok(n)) => n,
        };
        clock.touch();

        let write = async {
            writer.write_all(&buf[..n]).await?;
            writer.flush().await
        };
        let written = tokio::select! {
            biased;
            _ = token.cancelled() => return (total, DirectionEnd::Cancelled),
            w = time::timeout(clock.idle, write) => w,
        };

        match written {
            Ok(Ok(())) => {
                total += n as u64;
                clock.touch();
            }
            Ok(Err(e)) => {
                token.cancel();
                return (total, DirectionEnd::Error(e));
            }
            Err(_) => {
                token.cancel();
                return (total, DirectionEnd::Idle);
            }
        }
    }
}
