//! Bounded single-consumer mailboxes with overflow policies.
//!
//! A [`Mailbox`] is the delivery buffer behind every subscription and
//! endpoint. Senders only ever make a single non-blocking attempt via
//! [`Mailbox::try_send`]; what happens on a full queue is decided by the
//! [`FullPolicy`] chosen at creation. Closing attaches a [`CloseReason`]
//! that the receiver observes only after draining whatever was already
//! buffered.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

use serde::{Deserialize, Serialize};

/// What a full mailbox does with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FullPolicy {
    /// Evict the oldest buffered message to make room for the new one.
    DropOldest,
    /// Refuse the new message and keep the buffer as-is.
    RejectNewest,
}

/// Why a mailbox was closed. Set once; later closes keep the first reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The subscription was explicitly or implicitly unsubscribed.
    Unsubscribed,
    /// The endpoint was unbound.
    Unbound,
    /// The owning connection disconnected.
    Disconnected,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CloseReason::Unsubscribed => "unsubscribed",
            CloseReason::Unbound => "unbound",
            CloseReason::Disconnected => "disconnected",
        })
    }
}

/// Result of a single non-blocking send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was buffered.
    Accepted,
    /// The message was buffered after evicting the oldest buffered one.
    DroppedOldest,
    /// The message was refused; the buffer is unchanged.
    Rejected,
    /// The mailbox is closed; the message was discarded.
    Closed,
}

/// Error from [`Mailbox::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing buffered right now; the mailbox is still open.
    Empty,
    /// The buffer is drained and the mailbox is closed.
    Closed(CloseReason),
}

struct Inner<T> {
    queue: VecDeque<T>,
    capacity: usize,
    policy: FullPolicy,
    reason: Option<CloseReason>,
    dropped: u64,
    rx_waker: Option<Waker>,
    rx_parked: bool,
}

/// A bounded FIFO with a full-policy and a close reason.
///
/// Single consumer: at most one task may be waiting in [`recv`](Self::recv)
/// at a time. Senders never block and never fail loudly; refusals surface
/// through the [`SendOutcome`] and the drop counter.
pub struct Mailbox<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Mailbox<T> {
    /// Create a mailbox buffering up to `capacity` messages.
    ///
    /// A capacity of zero turns the mailbox into a rendezvous slot: a send
    /// is only accepted while the receiver is parked in `recv`.
    pub fn new(capacity: usize, policy: FullPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                capacity,
                policy,
                reason: None,
                dropped: 0,
                rx_waker: None,
                rx_parked: false,
            }),
        }
    }

    /// Attempt to buffer `item` without blocking.
    pub fn try_send(&self, item: T) -> SendOutcome {
        let mut inner = self.inner.lock().unwrap();
        if inner.reason.is_some() {
            return SendOutcome::Closed;
        }
        let has_room = inner.queue.len() < inner.capacity
            || (inner.capacity == 0 && inner.rx_parked && inner.queue.is_empty());
        let outcome = if has_room {
            inner.queue.push_back(item);
            SendOutcome::Accepted
        } else {
            inner.dropped += 1;
            match inner.policy {
                FullPolicy::DropOldest if !inner.queue.is_empty() => {
                    inner.queue.pop_front();
                    inner.queue.push_back(item);
                    SendOutcome::DroppedOldest
                }
                _ => return SendOutcome::Rejected,
            }
        };
        let waker = inner.rx_waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
        outcome
    }

    /// Close the mailbox. The first reason wins; buffered messages remain
    /// receivable. Returns whether this call performed the close.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.reason.is_some() {
            return false;
        }
        inner.reason = Some(reason);
        let waker = inner.rx_waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Poll for the next message. Buffered messages are yielded even after
    /// close; the close reason is reported only once the buffer is drained.
    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<T, CloseReason>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.queue.pop_front() {
            inner.rx_parked = false;
            return Poll::Ready(Ok(item));
        }
        if let Some(reason) = inner.reason {
            inner.rx_parked = false;
            return Poll::Ready(Err(reason));
        }
        inner.rx_waker = Some(cx.waker().clone());
        inner.rx_parked = true;
        Poll::Pending
    }

    /// Receive the next message, waiting until one is buffered or the
    /// mailbox is closed and drained.
    pub async fn recv(&self) -> Result<T, CloseReason> {
        poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Pop a buffered message without waiting.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.queue.pop_front() {
            return Ok(item);
        }
        match inner.reason {
            Some(reason) => Err(TryRecvError::Closed(reason)),
            None => Err(TryRecvError::Empty),
        }
    }

    /// The close reason, if the mailbox has been closed.
    pub fn why(&self) -> Option<CloseReason> {
        self.inner.lock().unwrap().reason
    }

    /// How many messages have been lost to the full-policy so far.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().queue.is_empty()
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Mailbox")
            .field("len", &inner.queue.len())
            .field("capacity", &inner.capacity)
            .field("policy", &inner.policy)
            .field("reason", &inner.reason)
            .field("dropped", &inner.dropped)
            .finish()
    }
}
