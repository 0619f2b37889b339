//! Test fixtures.
//!
//! A small "shop" namespace with a few classes, and builders for the wire
//! records a scripted server sends.

use stackless_core::{ClassKey, NamespaceKey};
use stackless_protocol::{
    EntityDelta, EntitySnapshot, EventMessage, PushFrame, PushMessage, WireEvent, WireProperty,
    WireRef, WireSource, WireValue,
};

/// Namespace id of the fixture namespace.
pub const SHOP_ID: u64 = 7;
/// Namespace version of the fixture namespace.
pub const SHOP_VERSION: u64 = 1;
/// Name of the fixture namespace.
pub const SHOP_NAME: &str = "shop";
/// User key of the fixture namespace.
pub const SHOP_USER_KEY: &str = "test-user-key";

/// Entity class: orders.
pub const ORDER_CLASS: u32 = 1;
/// Entity class: customers.
pub const CUSTOMER_CLASS: u32 = 2;
/// Service class: checkout.
pub const CHECKOUT_SERVICE: u32 = 10;
/// Event class: order shipped.
pub const ORDER_SHIPPED_EVENT: u32 = 20;

/// The fixture namespace key.
pub fn shop() -> NamespaceKey {
    NamespaceKey::new(SHOP_ID, SHOP_VERSION).expect("Fixture namespace key is valid")
}

/// A class of the fixture namespace.
pub fn shop_class(class_id: u32) -> ClassKey {
    shop().class(class_id)
}

/// Wire reference to an entity.
pub fn entity_ref(class_id: u32, primary_key: &str) -> WireValue {
    WireValue::EntityRef(WireRef::new(class_id, primary_key))
}

/// Wire string.
pub fn text(value: &str) -> WireValue {
    WireValue::String(value.to_string())
}

/// Builder for [`EntityDelta`].
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    delta: EntityDelta,
}

impl DeltaBuilder {
    /// Starts a delta that changes nothing.
    pub fn new(class_id: u32, primary_key: &str, version: u64) -> Self {
        Self {
            delta: EntityDelta {
                class_id,
                primary_key: primary_key.to_string(),
                version,
                properties: Vec::new(),
                deleted_properties: Vec::new(),
                deleted: false,
            },
        }
    }

    /// Sets a property.
    #[must_use]
    pub fn set(mut self, name: &str, value: WireValue) -> Self {
        self.delta.properties.push(WireProperty::new(name, value));
        self
    }

    /// Removes a property.
    #[must_use]
    pub fn remove(mut self, name: &str) -> Self {
        self.delta.deleted_properties.push(name.to_string());
        self
    }

    /// Marks the entity deleted.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.delta.deleted = true;
        self
    }

    /// Finishes the delta.
    pub fn build(self) -> EntityDelta {
        self.delta
    }
}

/// A live snapshot.
pub fn snapshot(
    class_id: u32,
    primary_key: &str,
    version: u64,
    properties: Vec<(&str, WireValue)>,
) -> EntitySnapshot {
    EntitySnapshot {
        class_id,
        primary_key: primary_key.to_string(),
        version,
        properties: properties
            .into_iter()
            .map(|(name, value)| WireProperty::new(name, value))
            .collect(),
        deleted: false,
    }
}

/// A deleted snapshot.
pub fn deleted_snapshot(class_id: u32, primary_key: &str, version: u64) -> EntitySnapshot {
    EntitySnapshot {
        deleted: true,
        ..snapshot(class_id, primary_key, version, Vec::new())
    }
}

/// An event raised by an entity, with bundled deltas.
pub fn entity_event(
    event_class_id: u32,
    source_class_id: u32,
    source_primary_key: &str,
    properties: Vec<(&str, WireValue)>,
    deltas: Vec<EntityDelta>,
) -> PushMessage {
    PushMessage::Event(EventMessage {
        event: WireEvent {
            class_id: event_class_id,
            source: WireSource::Entity(WireRef::new(source_class_id, source_primary_key)),
            properties: properties
                .into_iter()
                .map(|(name, value)| WireProperty::new(name, value))
                .collect(),
        },
        deltas,
    })
}

/// A push frame for the fixture namespace.
pub fn shop_push(message: PushMessage) -> PushFrame {
    push_to(SHOP_ID, SHOP_VERSION, message)
}

/// A push frame for an arbitrary namespace.
pub fn push_to(namespace_id: u64, namespace_version: u64, message: PushMessage) -> PushFrame {
    PushFrame {
        log_context: "pushlc0001".to_string(),
        namespace_id,
        namespace_version,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_builder() {
        let delta = DeltaBuilder::new(ORDER_CLASS, "o1", 3)
            .set("status", text("paid"))
            .remove("draft")
            .build();
        assert_eq!(delta.version, 3);
        assert_eq!(delta.properties.len(), 1);
        assert_eq!(delta.deleted_properties, vec!["draft".to_string()]);
        assert!(!delta.deleted);
        assert!(DeltaBuilder::new(ORDER_CLASS, "o1", 4).deleted().build().deleted);
    }

    #[test]
    fn push_frames_survive_the_wire() {
        let frame = shop_push(entity_event(
            ORDER_SHIPPED_EVENT,
            ORDER_CLASS,
            "o1",
            vec![("carrier", text("post"))],
            Vec::new(),
        ));
        let decoded = PushFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.message.is_event());
    }
}
