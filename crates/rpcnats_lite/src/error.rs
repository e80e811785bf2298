use thiserror::Error;

/// The error type a request handler returns for an ordinary (business) failure.
///
/// Its `Display` output becomes the `ErrorMessage` of the failure envelope.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The broker could not be reached or refused the connection.
    #[error("unable to connect to '{endpoint}': {reason}")]
    Connect { endpoint: String, reason: String },

    /// Registering interest in a subject failed.
    #[error("unable to subscribe to subject '{subject}': {reason}")]
    Subscribe { subject: String, reason: String },

    /// A message could not be handed to the broker.
    #[error("unable to publish to '{destination}': {reason}")]
    Publish { destination: String, reason: String },

    /// A request did not produce a reply.
    #[error("request on '{subject}' failed: {reason}")]
    Request { subject: String, reason: String },

    /// Timeout waiting for a reply.
    #[error("timeout waiting for reply")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// The connection was already closed or is not connected.
    #[error("connection closed")]
    Closed,
}

/// Errors that can occur while dispatching a single inbound message.
///
/// None of these escape the dispatch task; they are turned into a failure
/// envelope or a log line.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The handler returned an error.
    #[error("{0}")]
    Handler(HandlerError),

    /// The handler panicked; the payload is the recovered panic message.
    #[error("{0}")]
    Panicked(String),

    /// The inbound message carried no reply destination.
    #[error("message on '{subject}' has no reply destination")]
    MissingReply { subject: String },

    /// The response envelope could not be published.
    #[error("unable to publish response")]
    Publish(#[source] TransportError),
}
