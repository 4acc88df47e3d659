//! Connections: the ownership container for subscriptions and endpoints,
//! and the request/reply primitives built on the two delivery lanes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::bus::BusShared;
use crate::error::Error;
use crate::mailbox::{CloseReason, FullPolicy, Mailbox};
use crate::sub::{Endpoint, EndpointShared, SubShared, Subscription};
use crate::topic::{Token, Topic};
use crate::Message;

/// Per-subscription overrides of the bus defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Mailbox capacity; defaults to the bus `queue_len`.
    pub queue_len: Option<usize>,
    /// Full-policy; defaults to the bus `full` policy.
    pub full: Option<FullPolicy>,
}

/// Per-bind overrides. Endpoint mailboxes always reject the newest message
/// when full, so only the capacity is configurable.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindOptions {
    /// Mailbox capacity; defaults to the bus `queue_len`.
    pub queue_len: Option<usize>,
}

/// Options for [`Connection::call`].
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// Budget for the whole call, measured from the moment it starts.
    pub timeout: Duration,
    /// Absolute deadline; takes precedence over `timeout` when set.
    pub deadline: Option<Instant>,
    /// Initial retry delay while the server endpoint refuses the request.
    pub backoff: Duration,
    /// Retry delay cap.
    pub backoff_max: Duration,
    /// Correlation id to ride in [`Message::id`]; a fresh one is minted
    /// when unset.
    pub request_id: Option<Uuid>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            deadline: None,
            backoff: Duration::from_millis(10),
            backoff_max: Duration::from_millis(200),
            request_id: None,
        }
    }
}

struct ConnState {
    open: bool,
    subs: HashMap<u64, Arc<SubShared>>,
    endpoints: HashMap<u64, Arc<EndpointShared>>,
}

pub(crate) struct ConnShared {
    pub(crate) bus: Arc<BusShared>,
    state: Mutex<ConnState>,
}

impl ConnShared {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.state.lock().unwrap().open {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    fn adopt_sub(&self, sub: &Arc<SubShared>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.subs.insert(sub.id, sub.clone());
        }
        state.open
    }

    fn adopt_endpoint(&self, ep: &Arc<EndpointShared>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.endpoints.insert(ep.id, ep.clone());
        }
        state.open
    }

    pub(crate) fn forget_sub(&self, id: u64) {
        self.state.lock().unwrap().subs.remove(&id);
    }

    pub(crate) fn forget_endpoint(&self, id: u64) {
        self.state.lock().unwrap().endpoints.remove(&id);
    }

    fn begin_disconnect(&self) -> Option<(Vec<Arc<SubShared>>, Vec<Arc<EndpointShared>>)> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return None;
        }
        state.open = false;
        Some((
            state.subs.drain().map(|(_, s)| s).collect(),
            state.endpoints.drain().map(|(_, e)| e).collect(),
        ))
    }
}

/// A client handle on a [`Bus`](crate::Bus).
///
/// Connections own the subscriptions and endpoints they create. Dropping a
/// connection disconnects it, closing everything it owns with reason
/// [`CloseReason::Disconnected`]. Every operation except
/// [`disconnect`](Self::disconnect) fails with [`Error::Disconnected`]
/// afterwards.
pub struct Connection {
    shared: Arc<ConnShared>,
}

impl Connection {
    pub(crate) fn new(bus: Arc<BusShared>) -> Self {
        Self {
            shared: Arc::new(ConnShared {
                bus,
                state: Mutex::new(ConnState {
                    open: true,
                    subs: HashMap::new(),
                    endpoints: HashMap::new(),
                }),
            }),
        }
    }

    /// Publish `payload` under `topic` to every matching subscription.
    /// Never blocks; congested subscribers lose the message to their
    /// mailbox policy.
    pub fn publish(&self, topic: Topic, payload: impl Into<Bytes>) -> Result<(), Error> {
        self.publish_msg(Message::new(topic, payload))
    }

    /// Publish a fully-formed [`Message`], e.g. one carrying a reply
    /// address or correlation id.
    pub fn publish_msg(&self, msg: Message) -> Result<(), Error> {
        self.shared.ensure_open()?;
        self.shared.bus.publish(&msg)
    }

    /// Publish `payload` under `topic` and retain it as the last known
    /// value for that exact topic, replacing any previous one. Late
    /// subscribers with a matching pattern receive it on subscribe.
    pub fn retain(&self, topic: Topic, payload: impl Into<Bytes>) -> Result<(), Error> {
        self.shared.ensure_open()?;
        self.shared.bus.retain(Message::new(topic, payload))
    }

    /// Delete the retained message stored under the exact `topic`.
    pub fn unretain(&self, topic: Topic) -> Result<(), Error> {
        self.shared.ensure_open()?;
        self.shared.bus.unretain(&topic)
    }

    /// Subscribe to `pattern` with the bus defaults.
    pub fn subscribe(&self, pattern: Topic) -> Result<Subscription, Error> {
        self.subscribe_with(pattern, SubscribeOptions::default())
    }

    /// Subscribe to `pattern`. Matching retained messages are replayed
    /// into the new mailbox before this returns, in unspecified order and
    /// subject to the mailbox policy.
    pub fn subscribe_with(
        &self,
        pattern: Topic,
        opts: SubscribeOptions,
    ) -> Result<Subscription, Error> {
        self.shared.ensure_open()?;
        let cfg = &self.shared.bus.cfg;
        pattern.validate_pattern(&cfg.wildcards)?;
        let sub = Arc::new(SubShared {
            id: self.shared.bus.next_id(),
            pattern,
            mailbox: Mailbox::new(
                opts.queue_len.unwrap_or(cfg.queue_len),
                opts.full.unwrap_or(cfg.full),
            ),
            conn: Arc::downgrade(&self.shared),
        });
        self.shared.bus.add_sub(&sub)?;
        if !self.shared.adopt_sub(&sub) {
            // Lost a race with disconnect.
            self.shared.bus.remove_sub(&sub, CloseReason::Disconnected);
            return Err(Error::Disconnected);
        }
        Ok(Subscription {
            shared: sub,
            bus: self.shared.bus.clone(),
        })
    }

    /// Bind an endpoint to the concrete `topic` with the bus defaults.
    pub fn bind(&self, topic: Topic) -> Result<Endpoint, Error> {
        self.bind_with(topic, BindOptions::default())
    }

    /// Bind an endpoint to the concrete `topic`. Fails with
    /// [`Error::AlreadyBound`] while another endpoint holds the topic.
    pub fn bind_with(&self, topic: Topic, opts: BindOptions) -> Result<Endpoint, Error> {
        self.shared.ensure_open()?;
        let cfg = &self.shared.bus.cfg;
        let key = topic.key(&cfg.wildcards)?;
        let ep = Arc::new(EndpointShared {
            id: self.shared.bus.next_id(),
            topic,
            key,
            mailbox: Mailbox::new(
                opts.queue_len.unwrap_or(cfg.queue_len),
                FullPolicy::RejectNewest,
            ),
            conn: Arc::downgrade(&self.shared),
        });
        self.shared.bus.add_endpoint(&ep)?;
        if !self.shared.adopt_endpoint(&ep) {
            // Lost a race with disconnect.
            self.shared
                .bus
                .remove_endpoint(&ep, CloseReason::Disconnected);
            return Err(Error::Disconnected);
        }
        Ok(Endpoint {
            shared: ep,
            bus: self.shared.bus.clone(),
        })
    }

    /// Single admission-signalled send to the endpoint bound at the
    /// concrete `topic`: `Ok(())` when the message was accepted,
    /// [`Error::NoRoute`] when nothing is bound, [`Error::Full`] when the
    /// endpoint refused it.
    pub fn publish_one(&self, topic: Topic, payload: impl Into<Bytes>) -> Result<(), Error> {
        self.publish_one_msg(Message::new(topic, payload))
    }

    /// [`publish_one`](Self::publish_one) with a fully-formed [`Message`].
    pub fn publish_one_msg(&self, msg: Message) -> Result<(), Error> {
        self.shared.ensure_open()?;
        self.shared.bus.publish_one(msg)
    }

    /// Publish a request under `topic` carrying a fresh reply address, and
    /// return the subscription on that address. Suitable when multiple
    /// replies are expected; the subscription is created before the request
    /// is published, so a fast responder cannot race it.
    pub fn request(&self, topic: Topic, payload: impl Into<Bytes>) -> Result<Subscription, Error> {
        let reply_to = reply_topic();
        let sub = self.subscribe_with(reply_to.clone(), SubscribeOptions::default())?;
        self.publish_msg(
            Message::new(topic, payload)
                .with_reply_to(reply_to)
                .with_id(Uuid::new_v4()),
        )?;
        Ok(sub)
    }

    /// Publish a request and await exactly the first reply. The temporary
    /// reply subscription is released on every exit path, including
    /// cancellation. Compose with `tokio::time::timeout` for a deadline.
    pub async fn request_once(
        &self,
        topic: Topic,
        payload: impl Into<Bytes>,
    ) -> Result<Message, Error> {
        let reply_to = reply_topic();
        let mut sub = self.subscribe_with(
            reply_to.clone(),
            SubscribeOptions {
                queue_len: Some(1),
                full: Some(FullPolicy::RejectNewest),
            },
        )?;
        self.publish_msg(
            Message::new(topic, payload)
                .with_reply_to(reply_to)
                .with_id(Uuid::new_v4()),
        )?;
        sub.recv().await.map_err(Error::Closed)
    }

    /// Admission-signalled RPC over the endpoint lane.
    ///
    /// Binds a temporary reply endpoint, delivers the request with
    /// [`publish_one`](Self::publish_one) — retrying with exponential
    /// backoff while the server is unbound, congested, or closing — and
    /// races one receive on the reply endpoint against the deadline. The
    /// reply endpoint is unbound on every terminal path, including
    /// cancellation of the returned future.
    pub async fn call(
        &self,
        topic: Topic,
        payload: impl Into<Bytes>,
        opts: CallOptions,
    ) -> Result<Message, Error> {
        let reply_to = reply_topic();
        let mut reply_ep = self.bind_with(reply_to.clone(), BindOptions { queue_len: Some(1) })?;
        let deadline = opts
            .deadline
            .unwrap_or_else(|| Instant::now() + opts.timeout);
        let msg = Message::new(topic, payload)
            .with_reply_to(reply_to)
            .with_id(opts.request_id.unwrap_or_else(Uuid::new_v4));

        let mut delay = opts.backoff;
        loop {
            let attempt = self
                .shared
                .ensure_open()
                .and_then(|()| self.shared.bus.publish_one(msg.clone()));
            match attempt {
                Ok(()) => break,
                Err(Error::NoRoute | Error::Full | Error::Closed(_)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    sleep_until(deadline.min(now + delay)).await;
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout);
                    }
                    delay = (delay * 2).min(opts.backoff_max);
                }
                Err(e) => return Err(e),
            }
        }

        match timeout_at(deadline, reply_ep.recv()).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(reason)) => Err(Error::Closed(reason)),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Publish `payload` to the reply address carried by `msg`, copying its
    /// correlation id. Fails with [`Error::NoReplyAddress`] when `msg` has
    /// none.
    pub fn reply(&self, msg: &Message, payload: impl Into<Bytes>) -> Result<(), Error> {
        let mut out = Message::new(msg.reply_to.clone().ok_or(Error::NoReplyAddress)?, payload);
        out.id = msg.id;
        self.publish_msg(out)
    }

    /// Answer a [`call`](Self::call): send `payload` to the reply endpoint
    /// named by `msg.reply_to` over the admission-signalled lane, copying
    /// the correlation id.
    pub fn reply_one(&self, msg: &Message, payload: impl Into<Bytes>) -> Result<(), Error> {
        let mut out = Message::new(msg.reply_to.clone().ok_or(Error::NoReplyAddress)?, payload);
        out.id = msg.id;
        self.publish_one_msg(out)
    }

    /// Close every owned subscription and endpoint with reason
    /// [`CloseReason::Disconnected`] and remove them from the bus.
    /// Idempotent; a second call does nothing.
    pub fn disconnect(&self) {
        let Some((subs, endpoints)) = self.shared.begin_disconnect() else {
            return;
        };
        for sub in subs {
            self.shared.bus.remove_sub(&sub, CloseReason::Disconnected);
        }
        for ep in endpoints {
            self.shared
                .bus
                .remove_endpoint(&ep, CloseReason::Disconnected);
        }
        debug!("connection disconnected");
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.ensure_open().is_err()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Mint a fresh, effectively unique reply address.
fn reply_topic() -> Topic {
    Topic::from_tokens(vec![
        Token::from("_reply"),
        Token::from(Uuid::new_v4().simple().to_string()),
    ])
}
