//! The bus: configuration, shared routing state, and the dispatch engine.
//!
//! All dispatch entry points are synchronous and run to completion inside a
//! single critical section over the routing state; none of them ever
//! suspends the caller. Per-subscriber congestion is absorbed by the
//! mailbox full-policies and surfaces only through drop counters.

use std::collections::{hash_map::Entry, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::conn::Connection;
use crate::error::Error;
use crate::mailbox::{CloseReason, FullPolicy, SendOutcome};
use crate::sub::{EndpointShared, SubShared};
use crate::topic::{Topic, TopicKey, Wildcards};
use crate::trie::{LiteralTrie, PatternTrie};
use crate::Message;

/// Bus construction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default subscription mailbox capacity.
    pub queue_len: usize,
    /// Default subscription full-policy.
    pub full: FullPolicy,
    /// Wildcard symbols recognized in patterns.
    pub wildcards: Wildcards,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_len: 10,
            full: FullPolicy::DropOldest,
            wildcards: Wildcards::default(),
        }
    }
}

type Bucket = HashMap<u64, Arc<SubShared>>;

pub(crate) struct BusState {
    pubsub: PatternTrie<Bucket>,
    retained: LiteralTrie<Message>,
    endpoints: HashMap<TopicKey, Arc<EndpointShared>>,
}

impl BusState {
    /// Fan `msg` out to every subscription whose pattern matches its
    /// topic. One non-blocking enqueue attempt per subscriber; refusals
    /// become drop-counter increments, never an error to the publisher.
    fn fanout(&self, msg: &Message) {
        let mut accepted = 0usize;
        let mut refused = 0usize;
        self.pubsub.each(&msg.topic, |bucket| {
            for sub in bucket.values() {
                match sub.mailbox.try_send(msg.clone()) {
                    SendOutcome::Accepted => accepted += 1,
                    SendOutcome::DroppedOldest | SendOutcome::Rejected => refused += 1,
                    SendOutcome::Closed => {}
                }
            }
        });
        trace!(topic = %msg.topic, accepted, refused, "published");
    }
}

pub(crate) struct BusShared {
    pub(crate) cfg: BusConfig,
    state: Mutex<BusState>,
    ids: AtomicU64,
}

/// An in-process topic bus.
///
/// Cloning is cheap and shares the underlying bus. All interaction beyond
/// construction goes through [`Connection`]s created with
/// [`connect`](Self::connect).
#[derive(Clone)]
pub struct Bus {
    shared: Arc<BusShared>,
}

impl Bus {
    pub fn new(cfg: BusConfig) -> Self {
        let wild = cfg.wildcards.clone();
        Self {
            shared: Arc::new(BusShared {
                cfg,
                state: Mutex::new(BusState {
                    pubsub: PatternTrie::new(wild.clone()),
                    retained: LiteralTrie::new(wild),
                    endpoints: HashMap::new(),
                }),
                ids: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new connection. The connection auto-disconnects when dropped.
    pub fn connect(&self) -> Connection {
        Connection::new(self.shared.clone())
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.cfg
    }

    /// Whether any subscription is currently registered.
    pub fn has_subscriptions(&self) -> bool {
        !self.shared.state.lock().unwrap().pubsub.is_empty()
    }

    /// Whether any endpoint is currently bound.
    pub fn has_endpoints(&self) -> bool {
        !self.shared.state.lock().unwrap().endpoints.is_empty()
    }

    /// Whether any retained message is currently stored.
    pub fn has_retained(&self) -> bool {
        !self.shared.state.lock().unwrap().retained.is_empty()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").field("cfg", &self.shared.cfg).finish()
    }
}

impl BusShared {
    pub(crate) fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, msg: &Message) -> Result<(), Error> {
        msg.topic.require_concrete(&self.cfg.wildcards)?;
        self.state.lock().unwrap().fanout(msg);
        Ok(())
    }

    /// Publish `msg` and store it as the retained message for its exact
    /// topic, replacing any previous one. Fanout and store update happen
    /// in one critical section, so a concurrent subscriber sees the
    /// message either live or on replay.
    pub(crate) fn retain(&self, msg: Message) -> Result<(), Error> {
        msg.topic.require_concrete(&self.cfg.wildcards)?;
        let topic = msg.topic.clone();
        let mut state = self.state.lock().unwrap();
        state.fanout(&msg);
        let replaced = state.retained.insert(&topic, msg)?.is_some();
        debug!(topic = %topic, replaced, "retained");
        Ok(())
    }

    /// Delete the retained message stored under the exact `topic`, if any.
    pub(crate) fn unretain(&self, topic: &Topic) -> Result<(), Error> {
        topic.require_concrete(&self.cfg.wildcards)?;
        let removed = self.state.lock().unwrap().retained.remove(topic).is_some();
        debug!(topic = %topic, removed, "unretained");
        Ok(())
    }

    /// Register `sub` in the bucket at its pattern, then replay matching
    /// retained messages through the same non-blocking enqueue path.
    pub(crate) fn add_sub(&self, sub: &Arc<SubShared>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state
            .pubsub
            .get_or_insert_with(&sub.pattern, HashMap::new)?
            .insert(sub.id, sub.clone());
        state.retained.each(&sub.pattern, |retained| {
            let _ = sub.mailbox.try_send(retained.clone());
        });
        debug!(pattern = %sub.pattern, "subscribed");
        Ok(())
    }

    /// Remove `sub` from its bucket (pruning an emptied bucket node) and
    /// close its mailbox. Idempotent; unknown subscriptions are ignored.
    pub(crate) fn remove_sub(&self, sub: &SubShared, reason: CloseReason) {
        {
            let mut state = self.state.lock().unwrap();
            let now_empty = match state.pubsub.get_mut(&sub.pattern) {
                Some(bucket) => {
                    bucket.remove(&sub.id);
                    bucket.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.pubsub.remove(&sub.pattern);
            }
        }
        if sub.mailbox.close(reason) {
            debug!(pattern = %sub.pattern, %reason, "subscription closed");
        }
    }

    /// Register `ep` in the endpoint index. Fails while any other endpoint
    /// holds the same concrete-topic key.
    pub(crate) fn add_endpoint(&self, ep: &Arc<EndpointShared>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        match state.endpoints.entry(ep.key.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyBound),
            Entry::Vacant(slot) => {
                slot.insert(ep.clone());
                debug!(topic = %ep.topic, "endpoint bound");
                Ok(())
            }
        }
    }

    /// Remove `ep` from the endpoint index and close its mailbox.
    /// Idempotent; a successor bound to the same topic is left untouched.
    pub(crate) fn remove_endpoint(&self, ep: &EndpointShared, reason: CloseReason) {
        {
            let mut state = self.state.lock().unwrap();
            if state
                .endpoints
                .get(&ep.key)
                .is_some_and(|current| current.id == ep.id)
            {
                state.endpoints.remove(&ep.key);
            }
        }
        if ep.mailbox.close(reason) {
            debug!(topic = %ep.topic, %reason, "endpoint closed");
        }
    }

    /// Single admission-signalled send to the endpoint bound at the
    /// message's concrete topic.
    pub(crate) fn publish_one(&self, msg: Message) -> Result<(), Error> {
        let key = msg.topic.key(&self.cfg.wildcards)?;
        let ep = self.state.lock().unwrap().endpoints.get(&key).cloned();
        let Some(ep) = ep else {
            trace!(topic = %msg.topic, "no endpoint bound");
            return Err(Error::NoRoute);
        };
        match ep.mailbox.try_send(msg) {
            SendOutcome::Accepted | SendOutcome::DroppedOldest => Ok(()),
            SendOutcome::Rejected => Err(Error::Full),
            SendOutcome::Closed => Err(Error::Closed(
                ep.mailbox.why().unwrap_or(CloseReason::Unbound),
            )),
        }
    }
}
