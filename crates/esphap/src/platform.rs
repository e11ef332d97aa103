//! The bridge platform: device connection orchestration and the accessory
//! identity/cache layer.
//!
//! The platform owns one [`DeviceConnection`] per configured or discovered
//! device, resolves every announced component to a stable accessory record
//! keyed by its name-derived UUID, applies the exclusion list, dispatches
//! to the capability translators, and binds each record's reachable flag to
//! the owning connection. All component processing happens on one event
//! loop; the accessory map is keyed by UUID so resolution never invalidates
//! iteration elsewhere.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use esphap_hap::Accessory;
use esphap_hap::AccessoryRegistry;
use esphap_hap::accessory_uuid;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::accessories;
use crate::config::Config;
use crate::config::DeviceEntry;
use crate::discovery;
use crate::esphome::MqttApiClient;
use crate::esphome::client::ApiClient;
use crate::esphome::component::Component;
use crate::esphome::connection::DeviceConnection;

/// Capacity for the connection-to-platform component channel.
/// Provides backpressure when devices announce faster than translation.
const COMPONENT_CHANNEL_SIZE: usize = 64;

pub struct Platform {
    config: Config,
    registry: Arc<dyn AccessoryRegistry>,
    blacklist: HashSet<String>,
    accessories: StdMutex<HashMap<Uuid, Arc<Accessory>>>,
    connections: Mutex<Vec<DeviceConnection>>,
    components_tx: mpsc::Sender<Component>,
    components_rx: Mutex<mpsc::Receiver<Component>>,
}

impl Platform {
    pub fn new(config: Config, registry: Arc<dyn AccessoryRegistry>) -> Self {
        let blacklist = config.blacklist.iter().cloned().collect();
        let (components_tx, components_rx) = mpsc::channel(COMPONENT_CHANNEL_SIZE);
        Self {
            config,
            registry,
            blacklist,
            accessories: StdMutex::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
            components_tx,
            components_rx: Mutex::new(components_rx),
        }
    }

    /// Restore a cached accessory record handed back by the platform's
    /// persistence layer.
    ///
    /// Blacklisted records are unregistered instead of restored; everything
    /// else starts unreachable until its device connection confirms.
    pub fn configure_cached_accessory(&self, accessory: Arc<Accessory>) {
        if self.blacklist.contains(accessory.name()) {
            self.registry.unregister(&accessory);
            debug!(
                "unregistered cached accessory {} because it is blacklisted",
                accessory.name()
            );
            return;
        }
        accessory.set_reachable(false);
        debug!("restored cached accessory {}", accessory.name());
        self.accessories
            .lock()
            .unwrap()
            .insert(accessory.uuid(), accessory);
    }

    /// Start a connection for one device endpoint.
    pub async fn attach_device(&self, entry: DeviceEntry, client: Box<dyn ApiClient>) {
        let retry = entry.retry(self.config.retry_interval);
        info!("starting connection to {}", entry.host);
        let connection =
            DeviceConnection::spawn(entry.host, retry, client, self.components_tx.clone());
        self.connections.lock().await.push(connection);
    }

    /// Merge static config with discovery results, then start one
    /// connection per device.
    async fn start_devices(&self) {
        let devices = if self.config.discovery.enabled {
            let discovered = discovery::discover(self.config.discovery.timeout()).await;
            discovery::merge(&self.config.devices, discovered)
        } else {
            self.config.devices.clone()
        };

        if devices.is_empty() {
            error!(
                "no devices configured and none discovered; \
                 the bridge will not provide any accessories"
            );
        }

        for entry in devices {
            let client = match MqttApiClient::new(&entry) {
                Ok(client) => client,
                Err(e) => {
                    error!("failed to create a client for {}: {}", entry.host, e);
                    continue;
                }
            };
            self.attach_device(entry, Box::new(client)).await;
        }
    }

    /// Run the platform: start the devices, then resolve and translate
    /// components as connections announce them.
    pub async fn run(self: Arc<Self>) {
        self.start_devices().await;

        let mut components = self.components_rx.lock().await;
        while let Some(component) = components.recv().await {
            self.attach_component(component);
        }
    }

    /// Close every device connection and release their subscriptions.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.lock().await;
        for connection in connections.iter_mut() {
            connection.shutdown().await;
        }
        connections.clear();
        info!("platform shutdown complete");
    }

    /// Snapshot of resolved accessory records.
    pub fn accessories(&self) -> Vec<Arc<Accessory>> {
        self.accessories.lock().unwrap().values().cloned().collect()
    }

    fn drop_stale(&self, uuid: Uuid) {
        let removed = self.accessories.lock().unwrap().remove(&uuid);
        if let Some(accessory) = removed {
            self.registry.unregister(&accessory);
        }
    }

    /// Look up the record for a component name, or allocate a fresh one.
    /// Fresh records are not stored until translation succeeds.
    fn resolve(&self, name: &str) -> (Arc<Accessory>, bool) {
        let uuid = accessory_uuid(name);
        if let Some(existing) = self.accessories.lock().unwrap().get(&uuid) {
            return (existing.clone(), false);
        }
        debug!("{} must be a new accessory", name);
        (Accessory::new(name, uuid), true)
    }

    pub(crate) fn attach_component(&self, component: Component) {
        let name = component.info.name.clone();
        let kind = component.info.kind;

        if self.blacklist.contains(&name) {
            debug!("skipping blacklisted component {}", name);
            self.drop_stale(accessory_uuid(&name));
            return;
        }

        let Some(translator) = accessories::lookup(kind) else {
            info!("{} ({}) is currently not supported; skipping", name, kind);
            self.drop_stale(accessory_uuid(&name));
            return;
        };

        let (accessory, is_new) = self.resolve(&name);

        if !translator(&component, &accessory) {
            warn!("{} could not be mapped to an accessory", name);
            if !is_new {
                self.drop_stale(accessory.uuid());
            }
            return;
        }

        // Bind the record's reachable flag to the owning connection for the
        // rest of the process lifetime.
        let mut reachability = component.reachability();
        let bound = accessory.clone();
        tokio::spawn(async move {
            loop {
                bound.set_reachable(*reachability.borrow_and_update());
                if reachability.changed().await.is_err() {
                    bound.set_reachable(false);
                    break;
                }
            }
        });

        if is_new {
            self.accessories
                .lock()
                .unwrap()
                .insert(accessory.uuid(), accessory.clone());
            self.registry.register(&accessory);
            info!("{} discovered and set up", name);
        } else {
            debug!("{} rewired to its cached accessory", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use esphap_hap::LocalRegistry;
    use tokio::sync::watch;
    use tokio::time::sleep;

    use super::*;
    use crate::accessories::testutil;
    use crate::esphome::client::ClientEvent;
    use crate::esphome::client::MockApiClient;
    use crate::esphome::component::BinarySensorConfig;
    use crate::esphome::component::ComponentConfig;
    use crate::esphome::component::ComponentKind;

    fn platform_with(config: Config) -> (Arc<Platform>, Arc<LocalRegistry>) {
        let registry = Arc::new(LocalRegistry::new("esphap", "esphome"));
        let platform = Arc::new(Platform::new(config, registry.clone()));
        (platform, registry)
    }

    fn switch_component(name: &str) -> Component {
        let info = testutil::info(1, name, ComponentKind::Switch, ComponentConfig::Switch);
        testutil::component(info).0
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_resolution_reuses_the_record() {
        let (platform, registry) = platform_with(Config::default());

        platform.attach_component(switch_component("Plug"));
        platform.attach_component(switch_component("Plug"));

        assert_eq!(platform.accessories().len(), 1);
        assert_eq!(registry.accessories().len(), 1);
        assert_eq!(
            registry.accessories()[0].uuid(),
            accessory_uuid("Plug")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklisted_component_is_never_registered() {
        let config = Config {
            blacklist: vec!["Plug".to_string()],
            ..Config::default()
        };
        let (platform, registry) = platform_with(config);

        // A stale cached record exists from an earlier run.
        let cached = Accessory::new("Plug", accessory_uuid("Plug"));
        platform.configure_cached_accessory(cached);
        assert_eq!(registry.removed().len(), 1);

        platform.attach_component(switch_component("Plug"));
        assert!(registry.accessories().is_empty());
        assert!(platform.accessories().is_empty());
        // Unregistered exactly once.
        assert_eq!(registry.removed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_accessory_restores_unreachable() {
        let (platform, _registry) = platform_with(Config::default());

        let cached = Accessory::new("Plug", accessory_uuid("Plug"));
        cached.set_reachable(true);
        platform.configure_cached_accessory(cached.clone());

        assert!(!cached.reachable());
        assert_eq!(platform.accessories().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_translation_discards_fresh_record() {
        let (platform, registry) = platform_with(Config::default());

        let info = testutil::info(
            1,
            "Pin",
            ComponentKind::BinarySensor,
            ComponentConfig::BinarySensor(BinarySensorConfig { device_class: None }),
        );
        platform.attach_component(testutil::component(info).0);

        assert!(registry.accessories().is_empty());
        assert!(registry.removed().is_empty());
        assert!(platform.accessories().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_translation_unregisters_cached_record() {
        let (platform, registry) = platform_with(Config::default());

        let cached = Accessory::new("Pin", accessory_uuid("Pin"));
        platform.configure_cached_accessory(cached);

        let info = testutil::info(
            1,
            "Pin",
            ComponentKind::BinarySensor,
            ComponentConfig::BinarySensor(BinarySensorConfig { device_class: None }),
        );
        platform.attach_component(testutil::component(info).0);

        assert!(registry.accessories().is_empty());
        assert_eq!(registry.removed(), vec![accessory_uuid("Pin")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_kind_is_skipped() {
        let (platform, registry) = platform_with(Config::default());

        let info = testutil::info(
            1,
            "Version",
            ComponentKind::TextSensor,
            ComponentConfig::TextSensor,
        );
        platform.attach_component(testutil::component(info).0);

        assert!(registry.accessories().is_empty());
        assert!(platform.accessories().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachability_binds_to_connection_signal() {
        let (platform, _registry) = platform_with(Config::default());

        let info = testutil::info(1, "Plug", ComponentKind::Switch, ComponentConfig::Switch);
        let (state_tx, state_rx) = watch::channel(None);
        let (command_tx, _command_rx) = tokio::sync::mpsc::unbounded_channel();
        let (reachable_tx, reachable_rx) = watch::channel(true);
        let component = Component::new(info, state_rx, command_tx, reachable_rx);
        let _state_tx = state_tx;

        platform.attach_component(component);
        sleep(Duration::from_millis(10)).await;

        let accessory = &platform.accessories()[0];
        assert!(accessory.reachable());

        reachable_tx.send_replace(false);
        sleep(Duration::from_millis(10)).await;
        assert!(!accessory.reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_discovery_to_registration() {
        let (platform, registry) = platform_with(Config::default());

        let (client, handle) = MockApiClient::new();
        platform
            .attach_device(DeviceEntry::for_host("device.local"), Box::new(client))
            .await;

        let runner = tokio::spawn(platform.clone().run());

        handle
            .events
            .send(ClientEvent::EntityDiscovered(testutil::info(
                1,
                "Plug",
                ComponentKind::Switch,
                ComponentConfig::Switch,
            )))
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.accessories().len(), 1);
        assert_eq!(registry.accessories()[0].name(), "Plug");

        platform.shutdown().await;
        runner.abort();
    }
}
