//! An in-process topic bus for cooperating tasks.
//!
//! `treebus` routes topic-addressed messages between publishers and
//! subscribers inside one process, over two delivery lanes:
//!
//! * **Fanout pubsub**: [`Connection::publish`] delivers to every
//!   subscription whose pattern matches the message topic. Patterns may use
//!   a single-level wildcard (`+` by default), matching exactly one token,
//!   and a trailing multi-level wildcard (`#` by default), matching zero or
//!   more tokens. Topics whose raw tokens collide with a wildcard symbol
//!   can be addressed with [`Token::literal`].
//! * **Admission-signalled point-to-point**: [`Connection::bind`] claims a
//!   concrete topic for a single [`Endpoint`]; [`Connection::publish_one`]
//!   tells the sender whether the endpoint accepted the message, and
//!   [`Connection::call`] builds retrying request/reply on top of that.
//!
//! Delivery is best-effort and never blocks a publisher: every subscriber
//! owns a bounded [`Mailbox`](mailbox::Mailbox) and a [`FullPolicy`]
//! deciding what a full mailbox does. Lost messages are counted per
//! subscription. [`Connection::retain`] additionally stores a message as
//! the last known value for its topic, replayed to later subscriptions
//! with a matching pattern.
//!
//! Lifecycles are scope-bound through `Drop`: dropping a [`Subscription`]
//! or [`Endpoint`] releases it, and dropping a [`Connection`] disconnects
//! everything it owns.
//!
//! ```ignore
//! let bus = Bus::default();
//! let conn = bus.connect();
//! let mut sub = conn.subscribe(topic!["sensors", "+", "temp"])?;
//! conn.publish(topic!["sensors", "attic", "temp"], "21.5")?;
//! let msg = sub.recv().await.unwrap();
//! ```

pub mod bus;
pub mod conn;
pub mod error;
pub mod mailbox;
pub mod sub;
pub mod topic;
pub mod trie;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use bus::{Bus, BusConfig};
pub use conn::{BindOptions, CallOptions, Connection, SubscribeOptions};
pub use error::Error;
pub use mailbox::{CloseReason, FullPolicy, SendOutcome};
pub use sub::{Endpoint, Subscription};
pub use topic::{Token, Topic, TopicError, Wildcards};

/// A routed message: a topic, an opaque payload, and optional
/// request/reply metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The topic this message was published under.
    pub topic: Topic,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Topic a responder should publish replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Topic>,
    /// Correlation id for request/reply flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

impl Message {
    pub fn new(topic: Topic, payload: impl Into<Bytes>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            reply_to: None,
            id: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to: Topic) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// Build a [`Topic`] from a comma-separated token list.
///
/// Elements are converted with `Token::from`, so string and integer
/// literals mix freely; pass a [`Token`] directly for literal wrappers:
///
/// ```ignore
/// let t = topic!["sensors", 3, Token::literal("+")];
/// ```
#[macro_export]
macro_rules! topic {
    () => {
        $crate::topic::Topic::root()
    };
    ($($token:expr),+ $(,)?) => {
        $crate::topic::Topic::from_tokens(vec![$($crate::topic::Token::from($token)),+])
    };
}
