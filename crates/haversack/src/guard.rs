//! Idle detection for encounter streams.
//!
//! An [`IdleGuard`] runs a single watchdog task against a movable deadline.
//! The guard starts with a grace period of twice the configured timeout so a
//! peer that is slow to say anything at all still gets a chance; the first
//! byte of traffic (and every byte after it) rearms the deadline to one full
//! timeout from now. [`GuardedStream`] wraps any duplex stream and touches
//! the guard whenever bytes actually move in either direction.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;
use tokio::time::Instant;

struct GuardShared {
    timeout: Duration,
    deadline: Mutex<Instant>,
    disarmed: AtomicBool,
    expired: AtomicBool,
    notify: Notify,
}

impl GuardShared {
    fn deadline(&self) -> Instant {
        *self
            .deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_deadline(&self, deadline: Instant) {
        *self
            .deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = deadline;
    }
}

/// Watchdog over a peer's liveness. Cheap to clone; all clones share one
/// deadline and one background task.
#[derive(Clone)]
pub struct IdleGuard {
    shared: Arc<GuardShared>,
}

impl IdleGuard {
    /// Starts the watchdog. The initial deadline is `2 * timeout` from now;
    /// any traffic rearms it to `timeout` from the moment of the traffic.
    pub fn start(timeout: Duration) -> Self {
        let shared = Arc::new(GuardShared {
            timeout,
            deadline: Mutex::new(Instant::now() + timeout * 2),
            disarmed: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let watchdog = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(watchdog.deadline()).await;
                if watchdog.disarmed.load(Ordering::Acquire) {
                    return;
                }
                // Traffic may have pushed the deadline out while we slept.
                if Instant::now() >= watchdog.deadline() {
                    watchdog.expired.store(true, Ordering::Release);
                    watchdog.notify.notify_waiters();
                    return;
                }
            }
        });

        Self { shared }
    }

    /// Records traffic: the peer is alive, push the deadline out.
    pub fn touch(&self) {
        if self.shared.disarmed.load(Ordering::Acquire)
            || self.shared.expired.load(Ordering::Acquire)
        {
            return;
        }
        self.shared
            .set_deadline(Instant::now() + self.shared.timeout);
    }

    /// Permanently stands the watchdog down. Idempotent; used once the
    /// session is closing on its own terms.
    pub fn disarm(&self) {
        self.shared.disarmed.store(true, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.shared.expired.load(Ordering::Acquire)
    }

    /// Resolves once the deadline passes with no traffic. Never resolves if
    /// the guard was disarmed first.
    pub async fn expired(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.expired.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Duplex stream wrapper that reports liveness to an [`IdleGuard`].
///
/// Only completed polls that moved at least one byte count as traffic;
/// pending polls and zero-byte reads (EOF) do not rearm the deadline.
pub struct GuardedStream<S> {
    inner: S,
    guard: IdleGuard,
}

impl<S> GuardedStream<S> {
    pub fn new(inner: S, guard: IdleGuard) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &IdleGuard {
        &self.guard
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for GuardedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            if buf.filled().len() > before {
                self.guard.touch();
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for GuardedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = result {
            if written > 0 {
                self.guard.touch();
            }
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.guard.disarm();
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn fires_after_grace_period_on_silence() {
        let guard = IdleGuard::start(TIMEOUT);
        let started = Instant::now();
        guard.expired().await;
        assert_eq!(started.elapsed(), TIMEOUT * 2);
        assert!(guard.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_rearms_to_one_timeout() {
        let guard = IdleGuard::start(TIMEOUT);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let touched = Instant::now();
        guard.touch();
        guard.expired().await;
        assert_eq!(touched.elapsed(), TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_touches_keep_it_alive() {
        let guard = IdleGuard::start(TIMEOUT);
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(900)).await;
            guard.touch();
            assert!(!guard.is_expired());
        }
        guard.expired().await;
        assert!(guard.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_guard_never_fires() {
        let guard = IdleGuard::start(TIMEOUT);
        guard.disarm();
        guard.disarm();
        let fired = tokio::time::timeout(TIMEOUT * 10, guard.expired()).await;
        assert!(fired.is_err());
        assert!(!guard.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_traffic_counts_as_liveness() {
        let (mut near, far) = tokio::io::duplex(64);
        let guard = IdleGuard::start(TIMEOUT);
        let mut far = GuardedStream::new(far, guard.clone());

        tokio::time::sleep(Duration::from_millis(1900)).await;
        near.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();

        let read_at = Instant::now();
        guard.expired().await;
        assert_eq!(read_at.elapsed(), TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disarms_the_guard() {
        let (near, _far) = tokio::io::duplex(64);
        let guard = IdleGuard::start(TIMEOUT);
        let mut near = GuardedStream::new(near, guard.clone());
        near.shutdown().await.unwrap();

        let fired = tokio::time::timeout(TIMEOUT * 10, guard.expired()).await;
        assert!(fired.is_err());
    }
}
