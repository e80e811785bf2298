use anyhow::Result;
use nats_keepalive::ServiceConfig;
use nats_keepalive::example::route_method;
use rpcnats_lite::server::keep_alive_subscribe;
use rpcnats_lite::transport::nats::NatsTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = ServiceConfig::from_env()?;

    tracing::info!(
        url = %config.nats_url,
        subject = %config.subject,
        "Starting keep-alive service"
    );

    let transport = NatsTransport::new().with_client_name(format!("keepalive-{}", config.subject));
    keep_alive_subscribe(transport, config.supervisor_config(), route_method).await;

    Ok(())
}
