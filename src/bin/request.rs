use anyhow::{Context, Result};
use bytes::Bytes;
use nats_keepalive::ServiceConfig;
use rpcnats_lite::Response;
use rpcnats_lite::transport::Transport;
use rpcnats_lite::transport::nats::NatsTransport;
use serde_json::json;

/// Send one request to the service and print the envelope.
///
/// Usage: `request [METHOD]` (defaults to GET).
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = ServiceConfig::from_env()?;
    let method = std::env::args().nth(1).unwrap_or_else(|| "GET".to_string());

    let connection = NatsTransport::new()
        .connect(&config.nats_url)
        .await
        .context("connecting to NATS")?;

    let body = json!({ "method": method });
    let reply = connection
        .request(&config.subject, Bytes::from(body.to_string()))
        .await?;

    let response = Response::from_bytes(&reply).context("decoding response envelope")?;
    match response.into_result() {
        Ok(data) => println!("ok: {data}"),
        Err(message) => println!("error: {message}"),
    }

    Ok(())
}
