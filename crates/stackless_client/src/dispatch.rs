//! Routes push frames from a connection back into its client.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use stackless_core::NamespaceKey;
use stackless_protocol::PushFrame;
use tracing::trace;

use crate::client::ClientInner;
use crate::connection::PushHandler;
use crate::error::ClientResult;
use crate::pool::PushHandlerFactory;

/// Push handler of one namespace connection.
///
/// Holds the client weakly so an open connection does not keep a dropped
/// client alive.
pub(crate) struct PushRouter {
    client: Weak<ClientInner>,
    namespace: NamespaceKey,
}

#[async_trait]
impl PushHandler for PushRouter {
    async fn handle_push(&self, payload: Bytes) -> ClientResult<()> {
        let frame = PushFrame::decode(&payload)?;
        let Some(client) = self.client.upgrade() else {
            trace!(namespace = %self.namespace, "client gone, dropping push");
            return Ok(());
        };
        client.handle_push(self.namespace, frame).await
    }
}

pub(crate) struct PushRouterFactory {
    client: Weak<ClientInner>,
}

impl PushRouterFactory {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }
}

impl PushHandlerFactory for PushRouterFactory {
    fn create(&self, namespace: NamespaceKey) -> Arc<dyn PushHandler> {
        Arc::new(PushRouter {
            client: self.client.clone(),
            namespace,
        })
    }
}
