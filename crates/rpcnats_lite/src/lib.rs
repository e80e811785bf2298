//! Keep-alive request/response dispatch over NATS.
//!
//! A [`server::KeepAliveSubscriber`] holds a subscription to one subject open
//! indefinitely. Each inbound message is passed to a [`server::Handler`]; the
//! outcome is wrapped in an [`envelope::Response`] and published to the
//! message's reply subject. Handler panics are contained per message, and a
//! lost connection is detected by polling and re-established after a fixed
//! settle delay.
//!
//! # Example
//!
//! ```ignore
//! use rpcnats_lite::server::{SupervisorConfig, keep_alive_subscribe};
//! use rpcnats_lite::transport::nats::NatsTransport;
//! use rpcnats_lite::transport::InboundMessage;
//! use rpcnats_lite::HandlerError;
//! use serde_json::Value;
//!
//! async fn handle(msg: InboundMessage) -> Result<Value, HandlerError> {
//!     let body: Value = msg.json()?;
//!     Ok(body)
//! }
//!
//! let config = SupervisorConfig::new("nats://localhost:4222", "service-example");
//! keep_alive_subscribe(NatsTransport::new(), config, handle).await;
//! ```

pub mod envelope;
pub mod error;
pub mod server;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use envelope::Response;
pub use error::{DispatchError, HandlerError, TransportError};
