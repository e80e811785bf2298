//! An in-process broker.
//!
//! Subjects are matched exactly. Every connection opened through
//! [`Transport::connect`] counts as an attempt and is subject to the
//! injected faults; connections from [`MemoryTransport::open`] are never
//! failed or severed, which makes them convenient as the calling side in
//! tests.

use async_stream::stream;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{Connection, InboundMessage, Subscription, Transport};

/// A broker living inside the current process.
///
/// Clones share the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
}

#[derive(Debug, Default)]
struct Broker {
    routes: DashMap<String, Vec<Route>, ahash::RandomState>,
    connections: DashMap<u64, Arc<ConnectionState>, ahash::RandomState>,
    next_id: AtomicU64,
    connect_attempts: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_subscribes: AtomicUsize,
    failing_publishes: AtomicUsize,
}

#[derive(Debug)]
struct Route {
    connection: Arc<ConnectionState>,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Debug)]
struct ConnectionState {
    id: u64,
    severable: bool,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionState {
    fn is_live(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection that bypasses fault injection and is never severed.
    pub fn open(&self) -> MemoryConnection {
        self.broker.open(false)
    }

    /// Make the next `n` calls to `connect` fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.broker.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.broker.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.broker.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Number of `connect` calls seen so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.broker.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of connections that have not been closed.
    pub fn open_connections(&self) -> usize {
        self.broker.connections.len()
    }

    /// Number of live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.broker
            .routes
            .get(subject)
            .map(|routes| {
                routes
                    .iter()
                    .filter(|route| route.connection.is_live() && !route.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Mark every connection opened through `connect` as disconnected.
    ///
    /// The connections are not closed; whoever owns them has to notice.
    pub fn sever_connections(&self) {
        for entry in self.broker.connections.iter() {
            if entry.severable {
                entry.connected.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Broker {
    fn open(self: &Arc<Self>, severable: bool) -> MemoryConnection {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(ConnectionState {
            id,
            severable,
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        self.connections.insert(id, Arc::clone(&state));

        MemoryConnection {
            state,
            broker: Arc::clone(self),
        }
    }

    fn deliver(&self, subject: &str, reply: Option<&str>, payload: Bytes) {
        if let Some(mut routes) = self.routes.get_mut(subject) {
            routes.retain(|route| {
                if !route.connection.is_live() {
                    return !route.connection.closed.load(Ordering::SeqCst);
                }
                let msg = InboundMessage::new(subject, reply.map(str::to_string), payload.clone());
                route.sender.send(msg).is_ok()
            });
        }
    }

    fn remove_routes(&self, connection_id: u64) {
        for mut routes in self.routes.iter_mut() {
            routes.retain(|route| route.connection.id != connection_id);
        }
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(&self, endpoint: &str) -> Result<MemoryConnection, TransportError> {
        self.broker.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if take_failure(&self.broker.failing_connects) {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "injected connect failure".to_string(),
            });
        }

        Ok(self.broker.open(true))
    }
}

/// A connection to a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    state: Arc<ConnectionState>,
    broker: Arc<Broker>,
}

impl MemoryConnection {
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Publish a message that carries a reply destination.
    pub async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.check_publish(subject)?;
        self.broker.deliver(subject, Some(reply), payload);
        Ok(())
    }

    /// Send a request on a fresh inbox and wait for the first reply.
    pub async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let inbox = format!("_INBOX.{}", Uuid::new_v4().simple());
        let mut replies = self.subscribe(&inbox).await?;

        let reply = match self.publish_with_reply(subject, &inbox, payload).await {
            Ok(()) => tokio::time::timeout(timeout, replies.next()).await,
            Err(e) => {
                self.broker.routes.remove(&inbox);
                return Err(e);
            }
        };
        // The inbox is single use.
        self.broker.routes.remove(&inbox);

        Ok(reply?.ok_or(TransportError::Closed)?.payload)
    }

    fn check_publish(&self, destination: &str) -> Result<(), TransportError> {
        if !self.state.is_live() {
            return Err(TransportError::Closed);
        }
        if self.state.severable && take_failure(&self.broker.failing_publishes) {
            return Err(TransportError::Publish {
                destination: destination.to_string(),
                reason: "injected publish failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        if !self.state.is_live() {
            return Err(TransportError::Closed);
        }
        if self.state.severable && take_failure(&self.broker.failing_subscribes) {
            return Err(TransportError::Subscribe {
                subject: subject.to_string(),
                reason: "injected subscribe failure".to_string(),
            });
        }

        let (sender, mut receiver) = mpsc::unbounded_channel();
        self.broker
            .routes
            .entry(subject.to_string())
            .or_default()
            .push(Route {
                connection: Arc::clone(&self.state),
                sender,
            });

        let messages = stream! {
            while let Some(msg) = receiver.recv().await {
                yield msg;
            }
        };

        Ok(Subscription::new(messages))
    }

    async fn publish(&self, destination: &str, payload: Bytes) -> Result<(), TransportError> {
        self.check_publish(destination)?;
        self.broker.deliver(destination, None, payload);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.is_live()
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        self.broker.remove_routes(self.state.id);
        self.broker.connections.remove(&self.state.id);
    }
}
