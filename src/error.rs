//! Crate-wide error type.

use thiserror::Error;

use crate::mailbox::CloseReason;
use crate::topic::TopicError;

/// Errors surfaced by bus and connection operations.
///
/// Delivery refusals (`NoRoute`, `Full`, `Closed`) are ordinary outcomes of
/// admission-signalled sends; argument problems (`Topic`, `AlreadyBound`,
/// `Disconnected`) indicate misuse of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The connection has been disconnected.
    #[error("connection is disconnected")]
    Disconnected,
    /// A topic or pattern failed validation.
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Another endpoint is already bound to this concrete topic.
    #[error("an endpoint is already bound to this topic")]
    AlreadyBound,
    /// No endpoint is bound to the addressed concrete topic.
    #[error("no endpoint is bound to this topic")]
    NoRoute,
    /// The endpoint refused the message because its mailbox is full.
    #[error("endpoint mailbox is full")]
    Full,
    /// The receiving mailbox closed before the operation could complete.
    #[error("mailbox is closed: {0}")]
    Closed(CloseReason),
    /// The deadline elapsed before a call completed.
    #[error("deadline elapsed")]
    Timeout,
    /// A reply was requested for a message that carries no reply address.
    #[error("message carries no reply address")]
    NoReplyAddress,
}
