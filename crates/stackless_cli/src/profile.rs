//! Namespace profiles.
//!
//! A profile is a small JSON file naming one namespace, the key to connect
//! with and the server address:
//!
//! ```json
//! {
//!   "name": "shop",
//!   "id": 7,
//!   "version": 1,
//!   "user_key": "secret",
//!   "address": "127.0.0.1:7070",
//!   "classes": { "1": "Order", "10": "Checkout" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use stackless_client::{ClassKey, ClassKind, Client, ClientConfig, NamespaceKey};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Connection profile for one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Namespace name.
    pub name: String,
    /// Namespace id.
    pub id: u64,
    /// Namespace version.
    pub version: u64,
    /// Authorization key.
    pub user_key: String,
    /// Server address.
    pub address: SocketAddr,
    /// Optional class names by class id, for nicer diagnostics.
    #[serde(default)]
    pub classes: BTreeMap<u32, String>,
}

impl Profile {
    /// Reads a profile from disk.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read profile {}: {e}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Builds a client with the namespace registered.
    pub fn open(self, timeout: Option<Duration>) -> Result<Session, Box<dyn std::error::Error>> {
        let mut config = ClientConfig::default();
        if let Some(timeout) = timeout {
            config = config.with_request_timeout(timeout);
        }
        let client = Client::connect_tcp(self.address, config);
        let namespace = client.register_namespace(&self.name, &self.user_key, self.id, self.version)?;
        Ok(Session {
            client,
            namespace,
            classes: self.classes,
        })
    }
}

/// A client bound to one profile's namespace.
pub struct Session {
    /// The client.
    pub client: Client,
    /// The registered namespace.
    pub namespace: NamespaceKey,
    classes: BTreeMap<u32, String>,
}

impl Session {
    fn class_name(&self, class_id: u32) -> String {
        self.classes
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{class_id}"))
    }

    /// Registers `class_id` as an entity class, once.
    pub fn entity_class(&self, class_id: u32) -> Result<ClassKey, Box<dyn std::error::Error>> {
        let class = self.namespace.class(class_id);
        if !self.client.catalog().is_registered(ClassKind::Entity, class) {
            self.client.register_entity_class(&self.class_name(class_id), class)?;
        }
        Ok(class)
    }

    /// Registers `class_id` as a service class, once.
    pub fn service_class(&self, class_id: u32) -> Result<ClassKey, Box<dyn std::error::Error>> {
        let class = self.namespace.class(class_id);
        if !self.client.catalog().is_registered(ClassKind::Service, class) {
            self.client.register_service_class(&self.class_name(class_id), class)?;
        }
        Ok(class)
    }
}
