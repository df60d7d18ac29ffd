//! Per-connection plumbing
//!
//! Each WebSocket connection is a reader task plus a writer task sharing an
//! outbound queue and one cancellation token. The queue is bounded: when
//! full, the oldest non-critical frame is dropped first; a critical frame
//! that cannot be queued closes the connection as a slow consumer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Close code sent when the outbound queue overflows on a critical frame
pub const CLOSE_SLOW_CONSUMER: u16 = 4008;
/// Close code sent when the authentication handshake fails or times out
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// Close code sent when too many pings go unanswered
pub const CLOSE_PING_TIMEOUT: u16 = 4002;

/// Unique identifier for a WebSocket connection
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Frame queued without loss
    Ok,
    /// Queue was full; an older non-critical frame (or this one) was dropped
    Dropped,
    /// Queue is full of critical frames and this frame is critical too
    Overflow,
}

struct QueuedFrame {
    text: String,
    critical: bool,
}

/// Bounded single-producer/single-consumer outbound queue
///
/// The broadcaster enqueues without blocking; the writer task drains FIFO.
pub struct OutboundQueue {
    frames: Mutex<VecDeque<QueuedFrame>>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    /// Queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Non-blocking enqueue with drop-oldest overflow policy
    pub fn push(&self, text: String, critical: bool) -> Enqueued {
        let mut frames = self.frames.lock().expect("outbound queue poisoned");
        let mut result = Enqueued::Ok;

        if frames.len() >= self.capacity {
            if let Some(index) = frames.iter().position(|f| !f.critical) {
                frames.remove(index);
                result = Enqueued::Dropped;
            } else if critical {
                return Enqueued::Overflow;
            } else {
                // Queue is all-critical; shedding the incoming frame loses
                // the least.
                return Enqueued::Dropped;
            }
        }

        frames.push_back(QueuedFrame { text, critical });
        drop(frames);
        self.notify.notify_one();
        result
    }

    /// Await the next frame; `None` once `cancel` fires and the queue is
    /// drained
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self
                .frames
                .lock()
                .expect("outbound queue poisoned")
                .pop_front()
            {
                return Some(frame.text);
            }
            if cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                () = notified => {}
                () = cancel.cancelled() => {
                    // Drain whatever is still queued before reporting end
                    return self
                        .frames
                        .lock()
                        .expect("outbound queue poisoned")
                        .pop_front()
                        .map(|f| f.text);
                }
            }
        }
    }

    /// Frames currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().expect("outbound queue poisoned").len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared state for one live connection, owned by its hub
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub queue: OutboundQueue,
    pub cancel: CancellationToken,
    missed_pongs: AtomicU32,
    paused: AtomicBool,
    close_reason: Mutex<Option<(u16, String)>>,
}

impl ConnectionHandle {
    /// Handle with an outbound queue of `queue_capacity`
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            id: ConnectionId::new(),
            queue: OutboundQueue::new(queue_capacity),
            cancel: CancellationToken::new(),
            missed_pongs: AtomicU32::new(0),
            paused: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        }
    }

    /// Record a missed ping; returns the new consecutive count
    pub fn miss_pong(&self) -> u32 {
        self.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A pong arrived; the counter restarts
    pub fn pong_received(&self) {
        self.missed_pongs.store(0, Ordering::Relaxed);
    }

    /// Pause periodic monitoring frames for this connection
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Whether monitoring frames are paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Request the connection close with `code`; idempotent, first wins
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let mut slot = self.close_reason.lock().expect("close reason poisoned");
        if slot.is_none() {
            *slot = Some((code, reason.into()));
        }
        drop(slot);
        self.cancel.cancel();
    }

    /// Take the close code/reason recorded by [`close`](Self::close)
    #[must_use]
    pub fn take_close_reason(&self) -> Option<(u16, String)> {
        self.close_reason
            .lock()
            .expect("close reason poisoned")
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_preserved() {
        let queue = OutboundQueue::new(8);
        queue.push("a".into(), false);
        queue.push("b".into(), false);
        let cancel = CancellationToken::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(rt.block_on(queue.pop(&cancel)), Some("a".into()));
        assert_eq!(rt.block_on(queue.pop(&cancel)), Some("b".into()));
    }

    #[test]
    fn test_overflow_drops_oldest_non_critical() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push("old".into(), false), Enqueued::Ok);
        assert_eq!(queue.push("critical".into(), true), Enqueued::Ok);
        // Full: the oldest non-critical frame goes, order of the rest holds
        assert_eq!(queue.push("new".into(), false), Enqueued::Dropped);
        let cancel = CancellationToken::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(rt.block_on(queue.pop(&cancel)), Some("critical".into()));
        assert_eq!(rt.block_on(queue.pop(&cancel)), Some("new".into()));
    }

    #[test]
    fn test_all_critical_overflow_signals_close() {
        let queue = OutboundQueue::new(2);
        queue.push("c1".into(), true);
        queue.push("c2".into(), true);
        assert_eq!(queue.push("c3".into(), true), Enqueued::Overflow);
        // A non-critical frame is shed silently instead
        assert_eq!(queue.push("n".into(), false), Enqueued::Dropped);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4));
        let cancel = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push("wake".into(), false);
        assert_eq!(waiter.await.unwrap(), Some("wake".into()));
    }

    #[tokio::test]
    async fn test_pop_drains_after_cancel() {
        let queue = OutboundQueue::new(4);
        let cancel = CancellationToken::new();
        queue.push("last".into(), false);
        cancel.cancel();
        assert_eq!(queue.pop(&cancel).await, Some("last".into()));
        assert_eq!(queue.pop(&cancel).await, None);
    }

    #[test]
    fn test_handle_close_first_wins() {
        let handle = ConnectionHandle::new(4);
        handle.close(CLOSE_SLOW_CONSUMER, "slow");
        handle.close(CLOSE_AUTH_FAILED, "late");
        assert!(handle.cancel.is_cancelled());
        let (code, reason) = handle.take_close_reason().unwrap();
        assert_eq!(code, CLOSE_SLOW_CONSUMER);
        assert_eq!(reason, "slow");
    }

    #[test]
    fn test_pong_counting() {
        let handle = ConnectionHandle::new(4);
        assert_eq!(handle.miss_pong(), 1);
        assert_eq!(handle.miss_pong(), 2);
        handle.pong_received();
        assert_eq!(handle.miss_pong(), 1);
    }
}
