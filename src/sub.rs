//! Receiver handles: subscriptions (fanout lane) and endpoints
//! (point-to-point lane).

use std::sync::{Arc, Weak};

use crate::bus::BusShared;
use crate::conn::ConnShared;
use crate::mailbox::{CloseReason, Mailbox, TryRecvError};
use crate::topic::{Topic, TopicKey};
use crate::Message;

pub(crate) struct SubShared {
    pub(crate) id: u64,
    pub(crate) pattern: Topic,
    pub(crate) mailbox: Mailbox<Message>,
    pub(crate) conn: Weak<ConnShared>,
}

pub(crate) struct EndpointShared {
    pub(crate) id: u64,
    pub(crate) topic: Topic,
    pub(crate) key: TopicKey,
    pub(crate) mailbox: Mailbox<Message>,
    pub(crate) conn: Weak<ConnShared>,
}

/// A pattern subscription receiving matching published messages.
///
/// Messages are received with [`recv`](Self::recv) until the subscription
/// closes:
///
/// ```ignore
/// while let Ok(msg) = sub.recv().await {
///     /* ... */
/// }
/// ```
///
/// Dropping the subscription unsubscribes it. Buffered messages already
/// accepted remain receivable after close; the close reason is reported
/// once the buffer drains.
pub struct Subscription {
    pub(crate) shared: Arc<SubShared>,
    pub(crate) bus: Arc<BusShared>,
}

impl Subscription {
    /// Receive the next matching message, or the close reason once the
    /// subscription is closed and drained. Composes with `tokio::select!`
    /// and `tokio::time::timeout`.
    pub async fn recv(&mut self) -> Result<Message, CloseReason> {
        self.shared.mailbox.recv().await
    }

    /// Pop a buffered message without waiting.
    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        self.shared.mailbox.try_recv()
    }

    /// The pattern this subscription was created with.
    pub fn pattern(&self) -> &Topic {
        &self.shared.pattern
    }

    /// How many messages have been lost to this subscription's mailbox
    /// policy.
    pub fn dropped(&self) -> u64 {
        self.shared.mailbox.dropped()
    }

    /// The close reason, if the subscription has been closed.
    pub fn why(&self) -> Option<CloseReason> {
        self.shared.mailbox.why()
    }

    /// Remove this subscription from the bus and close its mailbox with
    /// reason [`CloseReason::Unsubscribed`]. Idempotent; a waiter parked in
    /// [`recv`](Self::recv) is woken.
    pub fn unsubscribe(&self) {
        self.bus.remove_sub(&self.shared, CloseReason::Unsubscribed);
        if let Some(conn) = self.shared.conn.upgrade() {
            conn.forget_sub(self.shared.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.shared.pattern.to_string())
            .field("mailbox", &self.shared.mailbox)
            .finish()
    }
}

/// An endpoint bound to a concrete topic.
///
/// Endpoints receive only admission-signalled sends
/// ([`publish_one`](crate::Connection::publish_one) and
/// [`call`](crate::Connection::call)); published fanout never reaches them.
/// At most one endpoint may be bound per concrete topic across a bus.
/// Dropping the endpoint unbinds it.
pub struct Endpoint {
    pub(crate) shared: Arc<EndpointShared>,
    pub(crate) bus: Arc<BusShared>,
}

impl Endpoint {
    /// Receive the next message, or the close reason once the endpoint is
    /// closed and drained.
    pub async fn recv(&mut self) -> Result<Message, CloseReason> {
        self.shared.mailbox.recv().await
    }

    /// Pop a buffered message without waiting.
    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        self.shared.mailbox.try_recv()
    }

    /// The concrete topic this endpoint is bound to.
    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    /// How many messages this endpoint's mailbox has refused.
    pub fn dropped(&self) -> u64 {
        self.shared.mailbox.dropped()
    }

    /// The close reason, if the endpoint has been closed.
    pub fn why(&self) -> Option<CloseReason> {
        self.shared.mailbox.why()
    }

    /// Release the binding and close the mailbox with reason
    /// [`CloseReason::Unbound`]. Idempotent. The topic can be bound again
    /// immediately afterwards.
    pub fn unbind(&self) {
        self.bus.remove_endpoint(&self.shared, CloseReason::Unbound);
        if let Some(conn) = self.shared.conn.upgrade() {
            conn.forget_endpoint(self.shared.id);
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("topic", &self.shared.topic.to_string())
            .field("mailbox", &self.shared.mailbox)
            .finish()
    }
}
