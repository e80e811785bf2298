use async_nats::connection::State;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::TransportError;
use crate::transport::{Connection, InboundMessage, Subscription, Transport};

/// Connects to a NATS server with `async-nats`.
#[derive(Debug, Clone, Default)]
pub struct NatsTransport {
    client_name: Option<String>,
}

impl NatsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client name reported to the server.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }
}

impl Transport for NatsTransport {
    type Connection = NatsConnection;

    async fn connect(&self, endpoint: &str) -> Result<NatsConnection, TransportError> {
        let mut options = async_nats::ConnectOptions::new();
        if let Some(name) = &self.client_name {
            options = options.name(name);
        }

        let client = options
            .connect(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        Ok(NatsConnection { client })
    }
}

/// A connection to a NATS server.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    client: async_nats::Client,
}

impl NatsConnection {
    /// Send a request and wait for the raw reply payload.
    pub async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, TransportError> {
        let message = self
            .client
            .request(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::Request {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        Ok(message.payload)
    }
}

impl Connection for NatsConnection {
    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let messages = subscriber.map(|msg| InboundMessage {
            subject: msg.subject.to_string(),
            reply: msg.reply.map(|reply| reply.to_string()),
            payload: msg.payload,
        });

        Ok(Subscription::new(messages))
    }

    async fn publish(&self, destination: &str, payload: Bytes) -> Result<(), TransportError> {
        let publish_error = |reason: String| TransportError::Publish {
            destination: destination.to_string(),
            reason,
        };

        self.client
            .publish(destination.to_string(), payload)
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        // `publish` only queues the message; flushing surfaces a dead connection.
        self.client
            .flush()
            .await
            .map_err(|e| publish_error(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }

    async fn close(&self) {
        if let Err(e) = self.client.drain().await {
            tracing::debug!(error = %e, "Error while draining NATS connection");
        }
    }
}
