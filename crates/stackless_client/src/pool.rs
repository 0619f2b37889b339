//! One lazily opened connection per namespace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stackless_core::{NamespaceInfo, NamespaceKey};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::connection::{Connection, Connector, PushHandler};
use crate::error::ClientResult;

/// Builds the push handler of a new connection.
pub trait PushHandlerFactory: Send + Sync {
    /// Handler for pushes arriving on the connection of `namespace`.
    fn create(&self, namespace: NamespaceKey) -> Arc<dyn PushHandler>;
}

/// Connections keyed by namespace.
///
/// A closed connection is replaced on next use.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    handlers: Arc<dyn PushHandlerFactory>,
    max_frame_len: u32,
    request_timeout: Option<Duration>,
    connections: Mutex<HashMap<NamespaceKey, Arc<Connection>>>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new(
        connector: Arc<dyn Connector>,
        handlers: Arc<dyn PushHandlerFactory>,
        max_frame_len: u32,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connector,
            handlers,
            max_frame_len,
            request_timeout,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the open connection of `namespace`, connecting if needed.
    ///
    /// # Errors
    ///
    /// Propagates connector failures.
    pub async fn connection(&self, namespace: &NamespaceInfo) -> ClientResult<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&namespace.key) {
            if existing.is_open() {
                return Ok(existing.clone());
            }
            debug!(namespace = %namespace.name, "replacing closed connection");
        }

        let stream = self.connector.connect(namespace).await?;
        let connection = Arc::new(Connection::open(
            stream,
            self.handlers.create(namespace.key),
            self.max_frame_len,
            self.request_timeout,
        ));
        info!(namespace = %namespace.name, "connection opened");
        connections.insert(namespace.key, connection.clone());
        Ok(connection)
    }

    /// Number of connections currently open.
    pub async fn open_count(&self) -> usize {
        self.connections
            .lock()
            .await
            .values()
            .filter(|c| c.is_open())
            .count()
    }

    /// Closes and forgets every connection.
    pub async fn close_all(&self, reason: &str) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, connection) in drained {
            connection.close(reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LoopbackConnector;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Ignore;

    #[async_trait]
    impl PushHandler for Ignore {
        async fn handle_push(&self, _payload: Bytes) -> ClientResult<()> {
            Ok(())
        }
    }

    impl PushHandlerFactory for Ignore {
        fn create(&self, _namespace: NamespaceKey) -> Arc<dyn PushHandler> {
            Arc::new(Ignore)
        }
    }

    fn info() -> NamespaceInfo {
        NamespaceInfo {
            name: "shop".into(),
            key: NamespaceKey::new(5, 2).unwrap(),
            user_key: "k".into(),
        }
    }

    #[tokio::test]
    async fn reuses_open_and_replaces_closed_connections() {
        let connector = Arc::new(LoopbackConnector::new());
        let (first, _keep_first) = tokio::io::duplex(64);
        let (second, _keep_second) = tokio::io::duplex(64);
        connector.push(first);
        connector.push(second);

        let pool = ConnectionPool::new(connector.clone(), Arc::new(Ignore), 1024, None);
        let a = pool.connection(&info()).await.unwrap();
        let b = pool.connection(&info()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.remaining(), 1);

        a.close("test").await;
        let c = pool.connection(&info()).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.open_count().await, 1);

        pool.close_all("done").await;
        assert!(!c.is_open());
        assert_eq!(pool.open_count().await, 0);
    }

    #[tokio::test]
    async fn connector_failures_propagate() {
        let pool = ConnectionPool::new(Arc::new(LoopbackConnector::new()), Arc::new(Ignore), 1024, None);
        assert!(matches!(
            pool.connection(&info()).await,
            Err(ClientError::Transport(_))
        ));
    }
}
