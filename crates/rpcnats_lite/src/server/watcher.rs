use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::transport::Connection;

/// Poll `connection` until it reports disconnected, then close it and fire
/// `closed`.
///
/// This is the only place a session's connection gets closed.
pub async fn watch<C: Connection>(connection: C, closed: oneshot::Sender<()>, poll_interval: Duration) {
    while connection.is_connected() {
        tokio::time::sleep(poll_interval).await;
    }

    connection.close().await;

    // The supervisor may already be gone if the process is shutting down.
    let _ = closed.send(());
}

pub(crate) fn spawn_watcher<C: Connection>(
    connection: C,
    closed: oneshot::Sender<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(watch(connection, closed, poll_interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use crate::transport::memory::MemoryTransport;

    #[tokio::test(start_paused = true)]
    async fn test_signals_once_connection_drops() {
        let transport = MemoryTransport::new();
        let connection = transport.connect("mem://").await.unwrap();
        let (tx, mut rx) = oneshot::channel();

        let handle = spawn_watcher(connection.clone(), tx, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert!(!connection.is_closed());

        transport.sever_connections();
        let started = tokio::time::Instant::now();
        rx.await.unwrap();

        assert!(started.elapsed() <= Duration::from_millis(100));
        assert!(connection.is_closed());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_disconnected_closes_immediately() {
        let transport = MemoryTransport::new();
        let connection = transport.connect("mem://").await.unwrap();
        transport.sever_connections();

        let (tx, rx) = oneshot::channel();
        watch(connection.clone(), tx, Duration::from_millis(100)).await;

        assert!(rx.await.is_ok());
        assert_eq!(transport.open_connections(), 0);
    }
}
