//! Topics, tokens, and wildcard configuration.
//!
//! A [`Topic`] is an ordered sequence of [`Token`]s. Tokens are text or
//! integers; a text token equal to one of the configured wildcard symbols
//! acts as a wildcard in subscription patterns. To address a segment whose
//! raw value collides with a wildcard symbol, wrap it with
//! [`Token::literal`]: a literal token always matches concretely.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One segment of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    /// A text segment. Matches wildcard symbols when used in a pattern.
    Text(String),
    /// An integer segment.
    Int(i64),
    /// A text segment that never acts as a wildcard, even when its raw
    /// value equals a wildcard symbol.
    Literal(String),
}

impl Token {
    /// Wrap a raw value so it is matched literally.
    pub fn literal(raw: impl Into<String>) -> Self {
        Token::Literal(raw.into())
    }

    /// The raw text of a text or literal token.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Token::Text(s) | Token::Literal(s) => Some(s),
            Token::Int(_) => None,
        }
    }

    /// Canonical lookup key for this token, with literal wrappers unwrapped.
    pub(crate) fn key(&self) -> TokenKey {
        match self {
            Token::Text(s) | Token::Literal(s) => TokenKey::Text(s.clone()),
            Token::Int(i) => TokenKey::Int(*i),
        }
    }

    pub(crate) fn class(&self, wild: &Wildcards) -> TokenClass {
        match self {
            Token::Text(s) if *s == wild.single => TokenClass::Single,
            Token::Text(s) if *s == wild.multi => TokenClass::Multi,
            _ => TokenClass::Concrete,
        }
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Text(s.to_owned())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Text(s)
    }
}

impl From<i64> for Token {
    fn from(i: i64) -> Self {
        Token::Int(i)
    }
}

impl From<i32> for Token {
    fn from(i: i32) -> Self {
        Token::Int(i64::from(i))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(s) | Token::Literal(s) => f.write_str(s),
            Token::Int(i) => write!(f, "{i}"),
        }
    }
}

/// How a token participates in matching, relative to a bus's wildcard
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenClass {
    Concrete,
    Single,
    Multi,
}

/// Canonical token identity used for trie child maps and the endpoint
/// index. Distinguishes the text `"1"` from the integer `1`; literal
/// wrappers are unwrapped before keying.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TokenKey {
    Text(String),
    Int(i64),
}

/// The wildcard symbols configured for a bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wildcards {
    /// Matches exactly one token position. Defaults to `"+"`.
    pub single: String,
    /// Matches zero or more trailing positions; only valid as the final
    /// token of a pattern. Defaults to `"#"`.
    pub multi: String,
}

impl Default for Wildcards {
    fn default() -> Self {
        Self {
            single: "+".to_owned(),
            multi: "#".to_owned(),
        }
    }
}

/// An ordered token sequence addressing a message or a subscription.
///
/// Topics are immutable and cheap to clone. The empty topic is valid and
/// addresses the root of the topic tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Token>", into = "Vec<Token>")]
pub struct Topic(Arc<[Token]>);

impl Topic {
    /// The empty topic.
    pub fn root() -> Self {
        Topic(Vec::new().into())
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Topic(tokens.into())
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every token is concrete under the given wildcard symbols.
    /// Literal wrappers count as concrete.
    pub fn is_concrete(&self, wild: &Wildcards) -> bool {
        self.0
            .iter()
            .all(|t| t.class(wild) == TokenClass::Concrete)
    }

    pub(crate) fn require_concrete(&self, wild: &Wildcards) -> Result<(), TopicError> {
        if self.is_concrete(wild) {
            Ok(())
        } else {
            Err(TopicError::NotConcrete)
        }
    }

    /// Validate this topic for use as a subscription pattern: the
    /// multi-level wildcard, if present, must be the final token.
    pub(crate) fn validate_pattern(&self, wild: &Wildcards) -> Result<(), TopicError> {
        for (i, token) in self.0.iter().enumerate() {
            if token.class(wild) == TokenClass::Multi && i + 1 != self.0.len() {
                return Err(TopicError::MultiWildcardNotLast);
            }
        }
        Ok(())
    }

    /// Canonical key for a concrete topic, used by the endpoint index.
    pub(crate) fn key(&self, wild: &Wildcards) -> Result<TopicKey, TopicError> {
        self.require_concrete(wild)?;
        Ok(TopicKey(self.0.iter().map(Token::key).collect()))
    }
}

impl From<Vec<Token>> for Topic {
    fn from(tokens: Vec<Token>) -> Self {
        Topic::from_tokens(tokens)
    }
}

impl From<Topic> for Vec<Token> {
    fn from(topic: Topic) -> Self {
        topic.0.to_vec()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// Stable, equality-respecting identity of a concrete topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TopicKey(Box<[TokenKey]>);

/// A topic failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TopicError {
    /// The multi-level wildcard appeared before the final position.
    #[error("multi-level wildcard must be the final token of a pattern")]
    MultiWildcardNotLast,
    /// A concrete topic was required but the topic contains wildcards.
    #[error("topic must not contain wildcards")]
    NotConcrete,
}
