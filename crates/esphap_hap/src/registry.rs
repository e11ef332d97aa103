use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::info;
use uuid::Uuid;

use crate::accessory::Accessory;

/// The accessory platform's registration surface.
///
/// Registration hands an accessory to the platform's persistence layer;
/// unregistration removes a stale record. Both are keyed by the plugin and
/// platform names the implementation was created with.
pub trait AccessoryRegistry: Send + Sync {
    fn register(&self, accessory: &Arc<Accessory>);

    fn unregister(&self, accessory: &Arc<Accessory>);
}

/// In-memory registry implementation.
///
/// Stands in for the platform's persistence layer: keeps the registered set
/// and a removal history so callers can audit what was handed over.
pub struct LocalRegistry {
    plugin_name: String,
    platform_name: String,
    registered: Mutex<HashMap<Uuid, Arc<Accessory>>>,
    removed: Mutex<Vec<Uuid>>,
}

impl LocalRegistry {
    pub fn new(plugin_name: impl Into<String>, platform_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            platform_name: platform_name.into(),
            registered: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of currently registered accessories.
    pub fn accessories(&self) -> Vec<Arc<Accessory>> {
        self.registered.lock().unwrap().values().cloned().collect()
    }

    pub fn accessory(&self, uuid: Uuid) -> Option<Arc<Accessory>> {
        self.registered.lock().unwrap().get(&uuid).cloned()
    }

    /// History of unregistered accessory UUIDs, in removal order.
    pub fn removed(&self) -> Vec<Uuid> {
        self.removed.lock().unwrap().clone()
    }
}

impl AccessoryRegistry for LocalRegistry {
    fn register(&self, accessory: &Arc<Accessory>) {
        info!(
            "registering accessory {} ({}) with {}/{}",
            accessory.name(),
            accessory.uuid(),
            self.plugin_name,
            self.platform_name
        );
        self.registered
            .lock()
            .unwrap()
            .insert(accessory.uuid(), accessory.clone());
    }

    fn unregister(&self, accessory: &Arc<Accessory>) {
        info!(
            "unregistering accessory {} ({}) from {}/{}",
            accessory.name(),
            accessory.uuid(),
            self.plugin_name,
            self.platform_name
        );
        self.registered.lock().unwrap().remove(&accessory.uuid());
        self.removed.lock().unwrap().push(accessory.uuid());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::accessory_uuid;

    #[test]
    fn test_register_and_unregister() {
        let registry = LocalRegistry::new("esphap", "esphome");
        let accessory = Accessory::new("Plug", accessory_uuid("Plug"));

        registry.register(&accessory);
        assert_eq!(registry.accessories().len(), 1);
        assert!(registry.accessory(accessory.uuid()).is_some());

        registry.unregister(&accessory);
        assert!(registry.accessories().is_empty());
        assert_eq!(registry.removed(), vec![accessory.uuid()]);
    }

    #[test]
    fn test_register_same_uuid_is_idempotent() {
        let registry = LocalRegistry::new("esphap", "esphome");
        let accessory = Accessory::new("Plug", accessory_uuid("Plug"));

        registry.register(&accessory);
        registry.register(&accessory);
        assert_eq!(registry.accessories().len(), 1);
    }
}
