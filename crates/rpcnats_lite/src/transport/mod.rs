//! The pub/sub transport seam.
//!
//! The supervisor and dispatch wrapper only ever talk to a broker through
//! [`Transport`] and [`Connection`]. Two implementations ship with the crate:
//! [`nats::NatsTransport`] for a real NATS server and
//! [`memory::MemoryTransport`], an in-process broker with fault injection.

pub mod memory;
pub mod nats;

use bytes::Bytes;
use futures::Stream;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::TransportError;

/// One message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: String,
    /// Where the response should be published, if the sender expects one.
    pub reply: Option<String>,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(subject: impl Into<String>, reply: Option<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply,
            payload: payload.into(),
        }
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A stream of inbound messages for one subscribed subject.
///
/// The stream ends when the underlying connection is closed.
pub struct Subscription {
    inner: Pin<Box<dyn Stream<Item = InboundMessage> + Send>>,
}

impl Subscription {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = InboundMessage> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for Subscription {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Opens connections to a broker.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A live broker connection.
///
/// Handles are cheap to clone and all clones refer to the same underlying
/// connection. Closing any clone closes the connection.
pub trait Connection: Clone + Send + Sync + 'static {
    fn subscribe(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<Subscription, TransportError>> + Send;

    fn publish(
        &self,
        destination: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Liveness predicate polled by the watcher.
    fn is_connected(&self) -> bool;

    fn close(&self) -> impl Future<Output = ()> + Send;
}
