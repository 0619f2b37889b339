//! Public facade.
//!
//! A [`Client`] owns the namespace catalog, the identity registry, the event
//! listener registry and one connection per namespace. Every network-backed
//! operation runs under a fresh log context and applies its own [`Tracker`]
//! before returning.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use stackless_core::{
    check_entity_batch, new_primary_key, Catalog, ChangeListener, ClassKey, ClassKind, CoreError,
    Entity, EntityKey, EventInstanceKey, EventListener, EventListenerRegistry, EventSource,
    IdentityRegistry, ListenerId, MethodId, NamespaceKey, Service, ServiceKey, Value,
};
use stackless_protocol::{
    decode_properties, decode_value, encode_value, EntityDelta, EventMessage, OkPayload,
    PushFrame, PushMessage, RequestBody, TransferQueue, WireRef, WireSource,
};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::connection::{Connector, TcpConnector};
use crate::dispatch::PushRouterFactory;
use crate::error::{ClientError, ClientResult};
use crate::log_context::new_log_context;
use crate::merge::Merger;
use crate::pool::ConnectionPool;
use crate::protocol::ProtocolClient;
use crate::tracker::{new_slot, Binding, EntityFetcher, PendingEvent, Tracker};

/// Handle to a client runtime. Clones share all state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    catalog: Arc<Catalog>,
    registry: IdentityRegistry,
    events: EventListenerRegistry,
    protocol: ProtocolClient,
}

impl Client {
    /// Creates a client that opens connections through `connector`.
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let catalog = Arc::new(Catalog::new());
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let pool = ConnectionPool::new(
                connector,
                Arc::new(PushRouterFactory::new(weak.clone())),
                config.max_frame_len,
                config.request_timeout,
            );
            ClientInner {
                protocol: ProtocolClient::new(catalog.clone(), pool, config.clone()),
                config,
                catalog,
                registry: IdentityRegistry::new(),
                events: EventListenerRegistry::new(),
            }
        });
        Self { inner }
    }

    /// Creates a client that connects over TCP to `address`.
    pub fn connect_tcp(address: SocketAddr, config: ClientConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(address, config.max_frame_len));
        Self::new(connector, config)
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Namespace and class catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Identity registry.
    pub fn registry(&self) -> &IdentityRegistry {
        &self.inner.registry
    }

    /// Registers a namespace with the authorization key used to connect to it.
    ///
    /// # Errors
    ///
    /// Fails on zero id or version and on duplicate registrations.
    pub fn register_namespace(
        &self,
        name: &str,
        user_key: &str,
        id: u64,
        version: u64,
    ) -> ClientResult<NamespaceKey> {
        Ok(self.inner.catalog.register_namespace(name, user_key, id, version)?)
    }

    /// Registers an entity class.
    ///
    /// # Errors
    ///
    /// Fails if the namespace is unknown or the class already registered.
    pub fn register_entity_class(&self, name: &str, class: ClassKey) -> ClientResult<()> {
        Ok(self.inner.catalog.register_class(ClassKind::Entity, name, class)?)
    }

    /// Registers a service class.
    ///
    /// # Errors
    ///
    /// Fails if the namespace is unknown or the class already registered.
    pub fn register_service_class(&self, name: &str, class: ClassKey) -> ClientResult<()> {
        Ok(self.inner.catalog.register_class(ClassKind::Service, name, class)?)
    }

    /// Registers an event class.
    ///
    /// # Errors
    ///
    /// Fails if the namespace is unknown or the class already registered.
    pub fn register_event_class(&self, name: &str, class: ClassKey) -> ClientResult<()> {
        Ok(self.inner.catalog.register_class(ClassKind::Event, name, class)?)
    }

    /// Creates a local entity that the server has not seen yet.
    ///
    /// # Errors
    ///
    /// Fails for unregistered classes, empty primary keys, or when a live
    /// instance already holds the key.
    pub fn create_entity(&self, class: ClassKey, primary_key: &str) -> ClientResult<Entity> {
        self.inner.catalog.require_class(ClassKind::Entity, class)?;
        let entity = Entity::new(EntityKey::new(class, primary_key)?);
        self.inner.registry.install(&entity)?;
        Ok(entity)
    }

    /// Creates a local entity under a random primary key.
    ///
    /// # Errors
    ///
    /// Fails for unregistered classes.
    pub fn create_entity_with_new_key(&self, class: ClassKey) -> ClientResult<Entity> {
        self.create_entity(class, &new_primary_key())
    }

    /// Returns a proxy for a service. No network traffic.
    ///
    /// # Errors
    ///
    /// Fails for unregistered classes and empty primary keys.
    pub fn service(&self, class: ClassKey, primary_key: &str) -> ClientResult<Service> {
        self.inner.catalog.require_class(ClassKind::Service, class)?;
        Ok(Service::new(ServiceKey::new(class, primary_key)?))
    }

    /// Fetches an entity. Returns `None` if the server reports it deleted.
    ///
    /// # Errors
    ///
    /// Transport, platform and protocol failures.
    pub async fn get_entity(&self, class: ClassKey, primary_key: &str) -> ClientResult<Option<Entity>> {
        self.inner.catalog.require_class(ClassKind::Entity, class)?;
        let key = EntityKey::new(class, primary_key)?;
        let lc = new_log_context();
        debug!(log_context = %lc, entity = %key, "get entity");

        let mut tracker = Tracker::new();
        let entity = self.inner.fetch_entity(&lc, &key, &mut tracker).await?;
        self.inner.apply(&lc, &mut tracker).await?;
        Ok(entity)
    }

    /// Saves entities together with every entity they reference.
    ///
    /// # Errors
    ///
    /// Fails on an empty, duplicated or multi-namespace batch, and on
    /// transport, platform and protocol failures.
    pub async fn save_entities(&self, entities: &[Entity]) -> ClientResult<()> {
        let namespace = check_entity_batch(entities.iter().map(Entity::key))?;
        let lc = new_log_context();
        debug!(log_context = %lc, count = entities.len(), "save entities");

        let mut queue = TransferQueue::new(namespace);
        for entity in entities {
            queue.enqueue(entity)?;
        }
        let body = RequestBody::SaveEntities {
            entities: queue.into_deltas()?,
        };
        let reply = self.inner.protocol.request(&lc, namespace, body).await?;

        let mut tracker = Tracker::new();
        for message in &reply.messages {
            match message {
                PushMessage::EntityUpdate { deltas } => {
                    self.inner.merge_deltas(&lc, namespace, deltas, &mut tracker)?;
                }
                PushMessage::Event(_) => {
                    return Err(ClientError::protocol("save response carried an event"));
                }
            }
        }
        self.inner.apply(&lc, &mut tracker).await
    }

    /// Calls a service method and returns its resolved return value.
    ///
    /// Events bundled with the response are delivered first, each in
    /// isolation; bundled entity updates are merged before the return value
    /// is resolved.
    ///
    /// # Errors
    ///
    /// Transport and protocol failures, platform error codes and user-code
    /// exceptions.
    pub async fn call_method(
        &self,
        service: &Service,
        method_id: MethodId,
        arguments: &[Value],
    ) -> ClientResult<Value> {
        let target = service.key();
        let namespace = target.class.namespace;
        self.inner.catalog.require_class(ClassKind::Service, target.class)?;
        let lc = new_log_context();
        debug!(log_context = %lc, service = %target, method_id, "call method");

        let mut queue = TransferQueue::new(namespace);
        let arguments = arguments
            .iter()
            .map(|argument| encode_value(argument, &mut queue))
            .collect::<Result<Vec<_>, _>>()?;
        let body = RequestBody::CallMethod {
            class_id: target.class.class_id,
            primary_key: target.primary_key.clone(),
            method_id,
            arguments,
            referenced: queue.into_deltas()?,
        };
        let reply = self.inner.protocol.request(&lc, namespace, body).await?;
        let OkPayload::CallMethod { return_value } = reply.payload else {
            return Err(ClientError::protocol("call response without a return value"));
        };

        for message in &reply.messages {
            if let PushMessage::Event(event) = message {
                self.inner.handle_event(&lc, namespace, event).await?;
            }
        }

        let mut tracker = Tracker::new();
        for message in &reply.messages {
            if let PushMessage::EntityUpdate { deltas } = message {
                self.inner.merge_deltas(&lc, namespace, deltas, &mut tracker)?;
            }
        }

        let (_, value) = decode_value(&return_value, namespace)?;
        let slot = new_slot();
        tracker.defer(value, Binding::Slot(slot.clone()));
        self.inner.apply(&lc, &mut tracker).await?;

        let resolved = std::mem::replace(&mut *slot.lock(), Value::Undefined);
        Ok(resolved)
    }

    /// Adds an event listener, subscribing on the server for the first
    /// listener of the stream.
    ///
    /// # Errors
    ///
    /// Fails for unregistered event classes, a source from another
    /// namespace, and on request failures.
    pub async fn subscribe_event(
        &self,
        source: &EventSource,
        event_class: ClassKey,
        listener: EventListener,
    ) -> ClientResult<ListenerId> {
        let key = self.inner.event_key(source, event_class)?;
        if self.inner.events.has_listeners(&key) {
            return Ok(self.inner.events.add(key, listener));
        }

        let lc = new_log_context();
        debug!(log_context = %lc, stream = %key, "subscribe event");
        let body = RequestBody::SubscribeEvent {
            event_class_id: event_class.class_id,
            source: WireSource::from_source(source),
        };
        self.inner.protocol.request(&lc, event_class.namespace, body).await?;
        Ok(self.inner.events.add(key, listener))
    }

    /// Unsubscribes from an event stream and drops all of its listeners.
    ///
    /// # Errors
    ///
    /// Fails for unregistered event classes and on request failures; the
    /// listeners are kept if the server did not acknowledge.
    pub async fn unsubscribe_event(&self, source: &EventSource, event_class: ClassKey) -> ClientResult<()> {
        let key = self.inner.event_key(source, event_class)?;
        let lc = new_log_context();
        debug!(log_context = %lc, stream = %key, "unsubscribe event");
        let body = RequestBody::UnsubscribeEvent {
            event_class_id: event_class.class_id,
            source: WireSource::from_source(source),
        };
        self.inner.protocol.request(&lc, event_class.namespace, body).await?;
        self.inner.events.remove_all(&key);
        Ok(())
    }

    /// Removes one event listener locally. The server subscription stays.
    pub fn remove_event_listener(&self, source: &EventSource, event_class: ClassKey, id: ListenerId) -> bool {
        let key = EventInstanceKey::new(event_class, source.clone());
        self.inner.events.remove(&key, id)
    }

    /// Asks the server to push updates of `entities`.
    ///
    /// # Errors
    ///
    /// Fails on an empty, duplicated or multi-namespace list and on request
    /// failures.
    pub async fn subscribe_updates(&self, entities: &[Entity]) -> ClientResult<()> {
        let (namespace, references) = update_references(entities)?;
        let lc = new_log_context();
        debug!(log_context = %lc, count = references.len(), "subscribe updates");
        self.inner
            .protocol
            .request(&lc, namespace, RequestBody::SubscribeUpdates { references })
            .await?;
        Ok(())
    }

    /// Stops server pushes of updates for `entities`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::subscribe_updates`].
    pub async fn unsubscribe_updates(&self, entities: &[Entity]) -> ClientResult<()> {
        let (namespace, references) = update_references(entities)?;
        let lc = new_log_context();
        debug!(log_context = %lc, count = references.len(), "unsubscribe updates");
        self.inner
            .protocol
            .request(&lc, namespace, RequestBody::UnsubscribeUpdates { references })
            .await?;
        Ok(())
    }

    /// Registers `listener` on every entity in `entities`.
    ///
    /// The returned id removes it from any of them.
    pub fn add_update_listener(&self, entities: &[Entity], listener: ChangeListener) -> ListenerId {
        self.inner.registry.add_shared_listener(entities, listener)
    }

    /// Removes the listener `id` from each of `entities`. Returns whether any
    /// of them had it.
    pub fn remove_update_listener(&self, entities: &[Entity], id: ListenerId) -> bool {
        entities
            .iter()
            .fold(false, |found, entity| self.inner.registry.remove_listener(entity, id) || found)
    }

    /// Removes every change listener of `entities`.
    pub fn clear_update_listeners(&self, entities: &[Entity]) {
        for entity in entities {
            self.inner.registry.clear_listeners(entity);
        }
    }

    /// Closes every connection and drops every event and change listener.
    ///
    /// Connections are reopened lazily by the next request.
    pub async fn close_connections(&self) {
        self.inner.protocol.pool().close_all("closed by client").await;
        self.inner.events.clear();
        self.inner.registry.clear_all_listeners();
        debug!("all connections closed");
    }

    /// Number of namespace connections currently open.
    pub async fn open_connections(&self) -> usize {
        self.inner.protocol.pool().open_count().await
    }
}

fn update_references(entities: &[Entity]) -> ClientResult<(NamespaceKey, Vec<WireRef>)> {
    let namespace = check_entity_batch(entities.iter().map(Entity::key))?;
    let references = entities
        .iter()
        .map(|e| WireRef::new(e.class().class_id, e.primary_key()))
        .collect();
    Ok((namespace, references))
}

impl ClientInner {
    fn merger<'a>(&'a self, namespace: NamespaceKey, log_context: &'a str) -> Merger<'a> {
        Merger::new(&self.registry, namespace, log_context, self.config.verbose_logging)
    }

    fn event_key(&self, source: &EventSource, event_class: ClassKey) -> ClientResult<EventInstanceKey> {
        self.catalog.require_class(ClassKind::Event, event_class)?;
        let found = source.class().namespace;
        if found != event_class.namespace {
            return Err(CoreError::MixedNamespaces {
                expected: event_class.namespace,
                found,
            }
            .into());
        }
        Ok(EventInstanceKey::new(event_class, source.clone()))
    }

    async fn apply(&self, log_context: &str, tracker: &mut Tracker) -> ClientResult<()> {
        tracker
            .apply_once(log_context, &self.registry, &self.events, self)
            .await
    }

    fn merge_deltas(
        &self,
        log_context: &str,
        namespace: NamespaceKey,
        deltas: &[EntityDelta],
        tracker: &mut Tracker,
    ) -> ClientResult<()> {
        let merger = self.merger(namespace, log_context);
        for delta in deltas {
            merger.merge_delta(delta, tracker)?;
        }
        Ok(())
    }

    /// Delivers one event with its bundled deltas, on a tracker of its own.
    async fn handle_event(
        &self,
        log_context: &str,
        namespace: NamespaceKey,
        message: &EventMessage,
    ) -> ClientResult<()> {
        let mut tracker = Tracker::new();
        self.merge_deltas(log_context, namespace, &message.deltas, &mut tracker)?;

        let class = namespace.class(message.event.class_id);
        let source = message.event.source.to_source(namespace)?;
        let mut pending = PendingEvent::new(class, source);
        for (name, value) in decode_properties(&message.event.properties, namespace)? {
            pending.push_property(name, value, &mut tracker);
        }
        tracker.enqueue_event(pending);
        self.apply(log_context, &mut tracker).await
    }

    /// Handles a push frame received on the connection of `expected`.
    pub(crate) async fn handle_push(&self, expected: NamespaceKey, frame: PushFrame) -> ClientResult<()> {
        self.protocol.validate_push_target(expected, &frame)?;
        if frame.log_context.is_empty() {
            return Err(ClientError::protocol("push frame without a log context"));
        }
        let lc = frame.log_context.as_str();
        match &frame.message {
            PushMessage::Event(message) => self.handle_event(lc, expected, message).await,
            PushMessage::EntityUpdate { deltas } => {
                let mut tracker = Tracker::new();
                self.merge_deltas(lc, expected, deltas, &mut tracker)?;
                self.apply(lc, &mut tracker).await
            }
        }
    }
}

#[async_trait]
impl EntityFetcher for ClientInner {
    async fn fetch_entity(
        &self,
        log_context: &str,
        key: &EntityKey,
        tracker: &mut Tracker,
    ) -> ClientResult<Option<Entity>> {
        let namespace = key.namespace();
        let body = RequestBody::GetEntity {
            class_id: key.class.class_id,
            primary_key: key.primary_key.clone(),
        };
        let reply = self.protocol.request(log_context, namespace, body).await?;
        let OkPayload::GetEntity { entities } = reply.payload else {
            return Err(ClientError::protocol("get response without entities"));
        };

        let merger = self.merger(namespace, log_context);
        let mut target = None;
        for snapshot in &entities {
            let entity = merger.replace_entity(snapshot, tracker)?;
            if snapshot.class_id == key.class.class_id && snapshot.primary_key == key.primary_key {
                target = entity;
            }
        }
        if target.is_none() {
            warn!(log_context = %log_context, entity = %key, "server returned a deleted entity");
        }
        Ok(target)
    }
}
