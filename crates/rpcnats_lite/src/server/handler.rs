use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use crate::envelope::Response;
use crate::error::{DispatchError, HandlerError};
use crate::server::panic_site;
use crate::server::supervisor::SupervisorStats;
use crate::transport::{Connection, InboundMessage};

/// The future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// Application logic invoked once per inbound message.
///
/// Any async closure `Fn(InboundMessage) -> impl Future<Output = Result<Value, HandlerError>>`
/// is a handler. A handler may panic; the dispatch wrapper contains it.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, msg: InboundMessage) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn handle(&self, msg: InboundMessage) -> HandlerFuture {
        Box::pin(self(msg))
    }
}

/// Helper to build a shared handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(f)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Run the handler inside a panic boundary.
///
/// Both a panic while building the handler future and a panic while polling
/// it are turned into [`DispatchError::Panicked`]. The logged stack trace is
/// the one taken where the handler panicked.
pub async fn invoke(handler: &dyn Handler, msg: InboundMessage) -> Result<Value, DispatchError> {
    panic_site::install();

    let subject = msg.subject.clone();
    let guarded = AssertUnwindSafe(async move { handler.handle(msg).await });

    match guarded.catch_unwind().await {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(e)) => Err(DispatchError::Handler(e)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let (location, backtrace) = match panic_site::take() {
                Some(site) => (site.location, site.backtrace),
                None => (None, Backtrace::force_capture()),
            };
            tracing::error!(
                subject = %subject,
                panic = %message,
                location = location.as_deref().unwrap_or("unknown"),
                "Recovered panic in request handler"
            );
            tracing::error!(subject = %subject, "Stack trace:\n{backtrace}");
            Err(DispatchError::Panicked(message))
        }
    }
}

/// Per-message unit of work: handler, envelope, publish.
pub(crate) struct Dispatcher<C> {
    connection: C,
    handler: Arc<dyn Handler>,
    stats: Arc<SupervisorStats>,
}

impl<C> Clone for Dispatcher<C>
where
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            handler: Arc::clone(&self.handler),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<C> Dispatcher<C>
where
    C: Connection,
{
    pub fn new(connection: C, handler: Arc<dyn Handler>, stats: Arc<SupervisorStats>) -> Self {
        Self {
            connection,
            handler,
            stats,
        }
    }

    /// Dispatch a message on its own task.
    pub fn spawn(&self, msg: InboundMessage) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let subject = msg.subject.clone();
            if let Err(e) = dispatcher.dispatch(msg).await {
                match e {
                    DispatchError::MissingReply { .. } => {
                        tracing::debug!(subject = %subject, "Dropping response: {e}");
                    }
                    e => {
                        tracing::warn!(subject = %subject, error = %e, "Failed to publish response");
                    }
                }
            }
        });
    }

    /// Handle one message and publish exactly one envelope for it.
    ///
    /// Returns the envelope that was published.
    pub async fn dispatch(&self, msg: InboundMessage) -> Result<Response, DispatchError> {
        self.stats.record_dispatch();

        let subject = msg.subject.clone();
        let reply = msg.reply.clone();

        let outcome = invoke(self.handler.as_ref(), msg).await;
        match &outcome {
            Err(DispatchError::Panicked(_)) => self.stats.record_panic(),
            Err(e) => {
                self.stats.record_handler_error();
                tracing::debug!(subject = %subject, error = %e, "Handler returned an error");
            }
            Ok(_) => {}
        }

        let response = Response::from_outcome(outcome);

        let reply = reply.ok_or_else(|| DispatchError::MissingReply {
            subject: subject.clone(),
        })?;

        if let Err(e) = self.connection.publish(&reply, response.to_bytes()).await {
            self.stats.record_publish_failure();
            return Err(DispatchError::Publish(e));
        }

        Ok(response)
    }
}
