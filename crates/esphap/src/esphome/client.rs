//! Device API client boundary.
//!
//! The bridge consumes each device through the [`ApiClient`] trait: connect,
//! a stream of discovery/state/availability events, and per-capability
//! command submission. [`MqttApiClient`] is the shipped transport, speaking
//! the device firmware's MQTT interface (discovery payloads, JSON/raw state
//! topics, per-field command topics). Any conforming client can stand in
//! behind the trait; tests use a scripted mock.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use super::component::BinarySensorConfig;
use super::component::ClimateConfig;
use super::component::ClimateFanMode;
use super::component::ClimateMode;
use super::component::ClimateSwingMode;
use super::component::ClimateUpdate;
use super::component::ComponentConfig;
use super::component::ComponentInfo;
use super::component::ComponentKind;
use super::component::ComponentState;
use super::component::CoverConfig;
use super::component::CoverOperation;
use super::component::CoverUpdate;
use super::component::FanConfig;
use super::component::FanDirection;
use super::component::FanSpeed;
use super::component::FanUpdate;
use super::component::LightColorMode;
use super::component::LightConfig;
use super::component::LightUpdate;
use super::component::SensorConfig;
use crate::config::DeviceEntry;

/// Light command payload. Channel and brightness values are 0.0 to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCommand {
    pub key: u32,
    pub on: bool,
    pub brightness: Option<f64>,
    pub red: Option<f64>,
    pub green: Option<f64>,
    pub blue: Option<f64>,
    pub color_mode: Option<LightColorMode>,
    pub effect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchCommand {
    pub key: u32,
    pub on: bool,
}

/// Momentary cover action for devices without position feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CoverAction {
    Open,
    Close,
    Stop,
}

/// Cover command payload. Position and tilt are fractions 0.0 to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverCommand {
    pub key: u32,
    pub position: Option<f64>,
    pub tilt: Option<f64>,
    pub action: Option<CoverAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanCommand {
    pub key: u32,
    pub on: Option<bool>,
    pub speed: Option<FanSpeed>,
    pub direction: Option<FanDirection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateCommand {
    pub key: u32,
    pub mode: ClimateMode,
    pub target_temperature: f64,
    pub target_temperature_low: f64,
    pub target_temperature_high: f64,
    pub fan_mode: Option<ClimateFanMode>,
    pub swing_mode: Option<ClimateSwingMode>,
}

/// Outbound device command, one variant per capability command service.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Light(LightCommand),
    Switch(SwitchCommand),
    Cover(CoverCommand),
    Fan(FanCommand),
    Climate(ClimateCommand),
}

impl Command {
    pub fn key(&self) -> u32 {
        match self {
            Command::Light(c) => c.key,
            Command::Switch(c) => c.key,
            Command::Cover(c) => c.key,
            Command::Fan(c) => c.key,
            Command::Climate(c) => c.key,
        }
    }
}

/// Events a device client reports to the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A capability instance was announced, once per discovery.
    EntityDiscovered(ComponentInfo),
    /// A component reported state.
    State { key: u32, state: ComponentState },
    /// Device-level liveness signal.
    Availability(bool),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Trait for device API clients.
///
/// This trait allows mocking the device link for testing purposes.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Establish the session. An error here is non-fatal to the bridge; the
    /// connection orchestrator retries on its interval.
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// Next event from the device. `None` means the session has ended.
    async fn poll_event(&mut self) -> Option<ClientEvent>;

    /// Submit an outbound command.
    async fn send_command(&mut self, command: Command) -> Result<(), ClientError>;

    /// Tear the session down.
    async fn disconnect(&mut self) -> Result<(), ClientError>;
}

/// Raw message received from a subscription.
#[derive(Debug, Clone)]
struct MqttMessage {
    topic: String,
    payload: Vec<u8>,
}

/// Where a state topic's payload feeds into the component model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateRoute {
    Switch,
    BinarySensor,
    Sensor,
    TextSensor,
    Light,
    CoverState,
    CoverPosition,
    CoverTilt,
    FanState,
    FanSpeed,
    FanDirection,
    ClimateMode,
    ClimateCurrentTemperature,
    ClimateTargetTemperature,
    ClimateTargetLow,
    ClimateTargetHigh,
    ClimateFanMode,
    ClimateSwingMode,
}

/// Command topics learned from a component's discovery payload.
#[derive(Debug, Clone, Default)]
struct CommandTopics {
    command: Option<String>,
    set_position: Option<String>,
    tilt: Option<String>,
    speed: Option<String>,
    direction: Option<String>,
    mode: Option<String>,
    temperature: Option<String>,
    temperature_low: Option<String>,
    temperature_high: Option<String>,
    fan_mode: Option<String>,
    swing_mode: Option<String>,
}

/// Discovery payload published by the device firmware.
///
/// A subset of the discovery schema: only the fields the bridge wires.
#[derive(Debug, Clone, Default, Deserialize)]
struct DiscoveryPayload {
    name: Option<String>,
    object_id: Option<String>,
    device_class: Option<String>,
    unit_of_measurement: Option<String>,
    icon: Option<String>,
    state_topic: Option<String>,
    command_topic: Option<String>,

    // Light
    brightness: Option<bool>,
    supported_color_modes: Option<Vec<String>>,
    effect_list: Option<Vec<String>>,

    // Cover
    optimistic: Option<bool>,
    position_topic: Option<String>,
    set_position_topic: Option<String>,
    tilt_status_topic: Option<String>,
    tilt_command_topic: Option<String>,
    payload_stop: Option<String>,

    // Fan
    speed_command_topic: Option<String>,
    speed_state_topic: Option<String>,
    direction_command_topic: Option<String>,
    direction_state_topic: Option<String>,

    // Climate
    modes: Option<Vec<String>>,
    fan_modes: Option<Vec<String>>,
    swing_modes: Option<Vec<String>>,
    min_temp: Option<f64>,
    max_temp: Option<f64>,
    mode_command_topic: Option<String>,
    mode_state_topic: Option<String>,
    current_temperature_topic: Option<String>,
    temperature_command_topic: Option<String>,
    temperature_state_topic: Option<String>,
    temperature_low_command_topic: Option<String>,
    temperature_low_state_topic: Option<String>,
    temperature_high_command_topic: Option<String>,
    temperature_high_state_topic: Option<String>,
    fan_mode_command_topic: Option<String>,
    fan_mode_state_topic: Option<String>,
    swing_mode_command_topic: Option<String>,
    swing_mode_state_topic: Option<String>,
}

/// Light state payload on the state topic. Channels are 0 to 255.
#[derive(Debug, Clone, Deserialize)]
struct LightStatePayload {
    state: Option<String>,
    brightness: Option<f64>,
    color_mode: Option<String>,
    color: Option<ColorPayload>,
    effect: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ColorPayload {
    r: f64,
    g: f64,
    b: f64,
}

/// FNV-1 32-bit hash, the device firmware's object-id to key derivation.
pub(crate) fn fnv1_hash(input: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in input.bytes() {
        hash = hash.wrapping_mul(16777619);
        hash ^= u32::from(byte);
    }
    hash
}

/// Parse a discovery topic into component kind, node id, and object id.
///
/// Topic format: homeassistant/{component}/{node_id}/{object_id}/config
fn parse_discovery_topic(topic: &str) -> Option<(&str, &str, &str)> {
    let without_prefix = topic.strip_prefix("homeassistant/")?;
    let parts: Vec<&str> = without_prefix.split('/').collect();
    if parts.len() != 4 || parts[3] != "config" {
        return None;
    }
    Some((parts[0], parts[1], parts[2]))
}

fn parse_on_off(payload: &str) -> Option<bool> {
    match payload.trim().to_uppercase().as_str() {
        "ON" | "TRUE" | "1" => Some(true),
        "OFF" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// Node id the firmware uses in discovery topics: lowercased, with
/// everything outside `[a-z0-9]` collapsed to underscores.
fn sanitize_node_id(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Build the component model from a discovery payload.
///
/// Returns the component info, its command topics, and the state topics to
/// subscribe to with their routes.
fn component_from_discovery(
    kind: ComponentKind,
    object_id: &str,
    payload: &DiscoveryPayload,
) -> (ComponentInfo, CommandTopics, Vec<(String, StateRoute)>) {
    let key = fnv1_hash(object_id);
    let name = payload
        .name
        .clone()
        .unwrap_or_else(|| object_id.replace('_', " "));

    let mut topics = CommandTopics {
        command: payload.command_topic.clone(),
        set_position: payload.set_position_topic.clone(),
        tilt: payload.tilt_command_topic.clone(),
        speed: payload.speed_command_topic.clone(),
        direction: payload.direction_command_topic.clone(),
        mode: payload.mode_command_topic.clone(),
        temperature: payload.temperature_command_topic.clone(),
        temperature_low: payload.temperature_low_command_topic.clone(),
        temperature_high: payload.temperature_high_command_topic.clone(),
        fan_mode: payload.fan_mode_command_topic.clone(),
        swing_mode: payload.swing_mode_command_topic.clone(),
    };

    let mut routes = Vec::new();
    let mut route = |topic: &Option<String>, route: StateRoute| {
        if let Some(topic) = topic {
            routes.push((topic.clone(), route));
        }
    };

    let config = match kind {
        ComponentKind::Light => {
            route(&payload.state_topic, StateRoute::Light);
            let color_modes = payload.supported_color_modes.clone().unwrap_or_default();
            ComponentConfig::Light(LightConfig {
                supports_rgb: color_modes.iter().any(|m| m == "rgb"),
                supports_brightness: payload.brightness.unwrap_or(false)
                    || color_modes.iter().any(|m| m == "brightness"),
                effects: payload.effect_list.clone().unwrap_or_default(),
            })
        }
        ComponentKind::Switch => {
            route(&payload.state_topic, StateRoute::Switch);
            ComponentConfig::Switch
        }
        ComponentKind::BinarySensor => {
            route(&payload.state_topic, StateRoute::BinarySensor);
            ComponentConfig::BinarySensor(BinarySensorConfig {
                device_class: payload.device_class.clone(),
            })
        }
        ComponentKind::Sensor => {
            route(&payload.state_topic, StateRoute::Sensor);
            ComponentConfig::Sensor(SensorConfig {
                unit_of_measurement: payload.unit_of_measurement.clone(),
                device_class: payload.device_class.clone(),
                icon: payload.icon.clone(),
            })
        }
        ComponentKind::TextSensor => {
            route(&payload.state_topic, StateRoute::TextSensor);
            ComponentConfig::TextSensor
        }
        ComponentKind::Cover => {
            route(&payload.state_topic, StateRoute::CoverState);
            route(&payload.position_topic, StateRoute::CoverPosition);
            route(&payload.tilt_status_topic, StateRoute::CoverTilt);
            ComponentConfig::Cover(CoverConfig {
                device_class: payload.device_class.clone(),
                assumed_state: payload.optimistic.unwrap_or(false),
                supports_position: payload.position_topic.is_some(),
                supports_tilt: payload.tilt_status_topic.is_some()
                    || payload.tilt_command_topic.is_some(),
                supports_stop: payload.payload_stop.is_some(),
            })
        }
        ComponentKind::Fan => {
            route(&payload.state_topic, StateRoute::FanState);
            route(&payload.speed_state_topic, StateRoute::FanSpeed);
            route(&payload.direction_state_topic, StateRoute::FanDirection);
            ComponentConfig::Fan(FanConfig {
                supports_speed: payload.speed_command_topic.is_some(),
                supports_direction: payload.direction_command_topic.is_some(),
            })
        }
        ComponentKind::Climate => {
            route(&payload.mode_state_topic, StateRoute::ClimateMode);
            route(
                &payload.current_temperature_topic,
                StateRoute::ClimateCurrentTemperature,
            );
            route(
                &payload.temperature_state_topic,
                StateRoute::ClimateTargetTemperature,
            );
            route(
                &payload.temperature_low_state_topic,
                StateRoute::ClimateTargetLow,
            );
            route(
                &payload.temperature_high_state_topic,
                StateRoute::ClimateTargetHigh,
            );
            route(&payload.fan_mode_state_topic, StateRoute::ClimateFanMode);
            route(
                &payload.swing_mode_state_topic,
                StateRoute::ClimateSwingMode,
            );
            let parse_modes = |values: &Option<Vec<String>>| -> Vec<ClimateMode> {
                values
                    .iter()
                    .flatten()
                    .filter_map(|m| ClimateMode::from_str(m).ok())
                    .collect()
            };
            ComponentConfig::Climate(ClimateConfig {
                supports_two_point: payload.temperature_low_command_topic.is_some()
                    && payload.temperature_high_command_topic.is_some(),
                supports_current_temperature: payload.current_temperature_topic.is_some(),
                visual_min_temperature: payload.min_temp,
                visual_max_temperature: payload.max_temp,
                supported_modes: parse_modes(&payload.modes),
                supported_fan_modes: payload
                    .fan_modes
                    .iter()
                    .flatten()
                    .filter_map(|m| ClimateFanMode::from_str(m).ok())
                    .collect(),
                supported_swing_modes: payload
                    .swing_modes
                    .iter()
                    .flatten()
                    .filter_map(|m| ClimateSwingMode::from_str(m).ok())
                    .collect(),
            })
        }
    };

    // Non-command kinds keep no command topic.
    if matches!(
        kind,
        ComponentKind::BinarySensor | ComponentKind::Sensor | ComponentKind::TextSensor
    ) {
        topics.command = None;
    }

    (
        ComponentInfo {
            key,
            name,
            kind,
            config,
        },
        topics,
        routes,
    )
}

/// Device client speaking the firmware's MQTT interface over rumqttc.
pub struct MqttApiClient {
    /// MQTT connection options (stored for lazy initialization)
    options: MqttOptions,

    topic_prefix: String,
    node_id: String,
    status_topic: String,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Raw message receiver (created in connect())
    messages: Option<mpsc::UnboundedReceiver<MqttMessage>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,

    /// State topic -> (component key, payload route)
    routes: HashMap<String, (u32, StateRoute)>,

    /// Component key -> learned command topics
    commands: HashMap<u32, CommandTopics>,

    // Multi-topic components are reassembled into full state frames.
    cover_cache: HashMap<u32, CoverUpdate>,
    fan_cache: HashMap<u32, FanUpdate>,
    climate_cache: HashMap<u32, ClimateUpdate>,
}

impl MqttApiClient {
    /// Create a client for one configured device endpoint.
    pub fn new(entry: &DeviceEntry) -> anyhow::Result<Self> {
        let topic_prefix = entry.prefix();
        let node_id = sanitize_node_id(&topic_prefix);

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "esphap".to_string());
        let client_id = format!("esphap-{}-{}", host, node_id);

        let mut options = MqttOptions::new(client_id, entry.host.clone(), entry.port);
        options.set_keep_alive(Duration::from_secs(30));

        // Allow large packets (2 MiB) for discovery payloads
        options.set_max_packet_size(2 * 1024 * 1024, 2 * 1024 * 1024);

        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let status_topic = format!("{}/status", topic_prefix);
        Ok(Self {
            options,
            topic_prefix,
            node_id,
            status_topic,
            client: None,
            messages: None,
            event_loop_task: None,
            routes: HashMap::new(),
            commands: HashMap::new(),
            cover_cache: HashMap::new(),
            fan_cache: HashMap::new(),
            climate_cache: HashMap::new(),
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let client = self.client.as_ref().ok_or(ClientError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        let client = self.client.as_ref().ok_or(ClientError::NotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.into())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn handle_discovery(&mut self, msg: &MqttMessage) -> Option<ClientEvent> {
        let (kind, node_id, object_id) = parse_discovery_topic(&msg.topic)?;
        if node_id != self.node_id {
            // Another device sharing the broker.
            return None;
        }
        let Ok(kind) = ComponentKind::from_str(kind) else {
            debug!("ignoring discovery for unsupported component kind {}", kind);
            return None;
        };
        if msg.payload.is_empty() {
            debug!("ignoring discovery removal for {}", object_id);
            return None;
        }
        let payload: DiscoveryPayload = match serde_json::from_slice(&msg.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("invalid discovery payload on {}: {}", msg.topic, e);
                return None;
            }
        };

        let (info, topics, routes) = component_from_discovery(kind, object_id, &payload);

        for (topic, route) in routes {
            if let Err(e) = self.subscribe(&topic).await {
                warn!("failed to subscribe to {}: {}", topic, e);
            }
            self.routes.insert(topic, (info.key, route));
        }
        self.commands.insert(info.key, topics);
        match kind {
            ComponentKind::Cover => {
                self.cover_cache.entry(info.key).or_default();
            }
            ComponentKind::Fan => {
                self.fan_cache.entry(info.key).or_default();
            }
            ComponentKind::Climate => {
                self.climate_cache.entry(info.key).or_default();
            }
            _ => {}
        }

        Some(ClientEvent::EntityDiscovered(info))
    }

    fn decode_state(&mut self, key: u32, route: StateRoute, payload: &str) -> Option<ComponentState> {
        match route {
            StateRoute::Switch => parse_on_off(payload).map(ComponentState::Switch),
            StateRoute::BinarySensor => parse_on_off(payload).map(ComponentState::BinarySensor),
            StateRoute::Sensor => Some(ComponentState::Sensor(payload.trim().parse().ok())),
            StateRoute::TextSensor => Some(ComponentState::Text(payload.trim().to_string())),
            StateRoute::Light => {
                let parsed: LightStatePayload = match serde_json::from_str(payload) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("invalid light state payload: {}", e);
                        return None;
                    }
                };
                Some(ComponentState::Light(LightUpdate {
                    on: parsed.state.as_deref().map(str::to_uppercase).as_deref() == Some("ON"),
                    brightness: parsed.brightness.map(|b| b / 255.0),
                    red: parsed.color.as_ref().map(|c| c.r / 255.0),
                    green: parsed.color.as_ref().map(|c| c.g / 255.0),
                    blue: parsed.color.as_ref().map(|c| c.b / 255.0),
                    color_mode: parsed
                        .color_mode
                        .as_deref()
                        .and_then(|m| LightColorMode::from_str(m).ok()),
                    effect: parsed.effect,
                }))
            }
            StateRoute::CoverState => {
                let cache = self.cover_cache.entry(key).or_default();
                cache.operation = match payload.trim().to_lowercase().as_str() {
                    "opening" => Some(CoverOperation::Opening),
                    "closing" => Some(CoverOperation::Closing),
                    "open" | "closed" => Some(CoverOperation::Idle),
                    _ => cache.operation,
                };
                Some(ComponentState::Cover(cache.clone()))
            }
            StateRoute::CoverPosition => {
                let position: f64 = payload.trim().parse().ok()?;
                let cache = self.cover_cache.entry(key).or_default();
                cache.position = Some(position / 100.0);
                Some(ComponentState::Cover(cache.clone()))
            }
            StateRoute::CoverTilt => {
                let tilt: f64 = payload.trim().parse().ok()?;
                let cache = self.cover_cache.entry(key).or_default();
                cache.tilt = Some(tilt / 100.0);
                Some(ComponentState::Cover(cache.clone()))
            }
            StateRoute::FanState => {
                let on = parse_on_off(payload)?;
                let cache = self.fan_cache.entry(key).or_default();
                cache.on = on;
                Some(ComponentState::Fan(cache.clone()))
            }
            StateRoute::FanSpeed => {
                let speed = FanSpeed::from_str(payload.trim()).ok()?;
                let cache = self.fan_cache.entry(key).or_default();
                cache.speed = Some(speed);
                Some(ComponentState::Fan(cache.clone()))
            }
            StateRoute::FanDirection => {
                let direction = FanDirection::from_str(payload.trim()).ok()?;
                let cache = self.fan_cache.entry(key).or_default();
                cache.direction = Some(direction);
                Some(ComponentState::Fan(cache.clone()))
            }
            StateRoute::ClimateMode => {
                let mode = ClimateMode::from_str(payload.trim()).ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.mode = mode;
                Some(ComponentState::Climate(cache.clone()))
            }
            StateRoute::ClimateCurrentTemperature => {
                let value: f64 = payload.trim().parse().ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.current_temperature = Some(value);
                Some(ComponentState::Climate(cache.clone()))
            }
            StateRoute::ClimateTargetTemperature => {
                let value: f64 = payload.trim().parse().ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.target_temperature = value;
                Some(ComponentState::Climate(cache.clone()))
            }
            StateRoute::ClimateTargetLow => {
                let value: f64 = payload.trim().parse().ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.target_temperature_low = value;
                Some(ComponentState::Climate(cache.clone()))
            }
            StateRoute::ClimateTargetHigh => {
                let value: f64 = payload.trim().parse().ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.target_temperature_high = value;
                Some(ComponentState::Climate(cache.clone()))
            }
            StateRoute::ClimateFanMode => {
                let mode = ClimateFanMode::from_str(payload.trim()).ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.fan_mode = Some(mode);
                Some(ComponentState::Climate(cache.clone()))
            }
            StateRoute::ClimateSwingMode => {
                let mode = ClimateSwingMode::from_str(payload.trim()).ok()?;
                let cache = self.climate_cache.entry(key).or_default();
                cache.swing_mode = Some(mode);
                Some(ComponentState::Climate(cache.clone()))
            }
        }
    }

    async fn translate(&mut self, msg: MqttMessage) -> Option<ClientEvent> {
        if msg.topic == self.status_topic {
            let online = String::from_utf8_lossy(&msg.payload).trim().to_lowercase() == "online";
            return Some(ClientEvent::Availability(online));
        }
        if msg.topic.ends_with("/config") {
            return self.handle_discovery(&msg).await;
        }
        if let Some((key, route)) = self.routes.get(&msg.topic).copied() {
            let payload = String::from_utf8_lossy(&msg.payload).into_owned();
            return self
                .decode_state(key, route, &payload)
                .map(|state| ClientEvent::State { key, state });
        }
        debug!("unroutable message on {}", msg.topic);
        None
    }
}

#[async_trait]
impl ApiClient for MqttApiClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), 10);

        // Wait for the broker acknowledgement before declaring the link up.
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(e) => return Err(ClientError::Transport(e.to_string())),
            }
        }

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };
                        if message_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {
                        // Ignore other packets (suback, puback, pings).
                    }
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        break;
                    }
                }
            }
            debug!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.messages = Some(message_rx);
        self.event_loop_task = Some(task);

        self.subscribe(&format!("homeassistant/+/{}/+/config", self.node_id))
            .await?;
        let status_topic = self.status_topic.clone();
        self.subscribe(&status_topic).await?;
        debug!("subscribed to discovery and status for {}", self.topic_prefix);

        Ok(())
    }

    async fn poll_event(&mut self) -> Option<ClientEvent> {
        loop {
            let msg = self.messages.as_mut()?.recv().await?;
            if let Some(event) = self.translate(msg).await {
                return Some(event);
            }
        }
    }

    async fn send_command(&mut self, command: Command) -> Result<(), ClientError> {
        let Some(topics) = self.commands.get(&command.key()).cloned() else {
            warn!("no command topics known for component key {}", command.key());
            return Ok(());
        };

        match command {
            Command::Light(cmd) => {
                let mut payload = serde_json::json!({
                    "state": if cmd.on { "ON" } else { "OFF" },
                });
                if let Some(brightness) = cmd.brightness {
                    payload["brightness"] = serde_json::json!((brightness * 255.0).round());
                }
                if let (Some(r), Some(g), Some(b)) = (cmd.red, cmd.green, cmd.blue) {
                    payload["color"] = serde_json::json!({
                        "r": (r * 255.0).round(),
                        "g": (g * 255.0).round(),
                        "b": (b * 255.0).round(),
                    });
                }
                if let Some(mode) = cmd.color_mode {
                    payload["color_mode"] = serde_json::json!(mode.to_string());
                }
                if let Some(effect) = &cmd.effect {
                    payload["effect"] = serde_json::json!(effect);
                }
                if let Some(topic) = &topics.command {
                    self.publish(topic, payload.to_string()).await?;
                }
            }
            Command::Switch(cmd) => {
                if let Some(topic) = &topics.command {
                    self.publish(topic, if cmd.on { "ON" } else { "OFF" }).await?;
                }
            }
            Command::Cover(cmd) => {
                if let (Some(action), Some(topic)) = (cmd.action, &topics.command) {
                    self.publish(topic, action.to_string()).await?;
                }
                if let (Some(position), Some(topic)) = (cmd.position, &topics.set_position) {
                    self.publish(topic, format!("{}", (position * 100.0).round()))
                        .await?;
                }
                if let (Some(tilt), Some(topic)) = (cmd.tilt, &topics.tilt) {
                    self.publish(topic, format!("{}", (tilt * 100.0).round()))
                        .await?;
                }
            }
            Command::Fan(cmd) => {
                if let (Some(on), Some(topic)) = (cmd.on, &topics.command) {
                    self.publish(topic, if on { "ON" } else { "OFF" }).await?;
                }
                if let (Some(speed), Some(topic)) = (cmd.speed, &topics.speed) {
                    self.publish(topic, speed.to_string()).await?;
                }
                if let (Some(direction), Some(topic)) = (cmd.direction, &topics.direction) {
                    self.publish(topic, direction.to_string()).await?;
                }
            }
            Command::Climate(cmd) => {
                if let Some(topic) = &topics.mode {
                    self.publish(topic, cmd.mode.to_string()).await?;
                }
                if let Some(topic) = &topics.temperature {
                    self.publish(topic, format!("{}", cmd.target_temperature))
                        .await?;
                }
                if let Some(topic) = &topics.temperature_low {
                    self.publish(topic, format!("{}", cmd.target_temperature_low))
                        .await?;
                }
                if let Some(topic) = &topics.temperature_high {
                    self.publish(topic, format!("{}", cmd.target_temperature_high))
                        .await?;
                }
                if let (Some(mode), Some(topic)) = (cmd.fan_mode, &topics.fan_mode) {
                    self.publish(topic, mode.to_string()).await?;
                }
                if let (Some(mode), Some(topic)) = (cmd.swing_mode, &topics.swing_mode) {
                    self.publish(topic, mode.to_string()).await?;
                }
            }
        }

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
        self.messages = None;
        if let Some(client) = self.client.take() {
            client
                .disconnect()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for MqttApiClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

/// Scripted device client for tests.
#[cfg(test)]
pub(crate) struct MockApiClient {
    events: mpsc::UnboundedReceiver<ClientEvent>,
    commands: std::sync::Arc<std::sync::Mutex<Vec<Command>>>,
    connect_failures: std::sync::Arc<std::sync::atomic::AtomicU32>,
    connects: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

/// Test-side controls for a [`MockApiClient`].
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockHandle {
    pub events: mpsc::UnboundedSender<ClientEvent>,
    pub commands: std::sync::Arc<std::sync::Mutex<Vec<Command>>>,
    pub connect_failures: std::sync::Arc<std::sync::atomic::AtomicU32>,
    pub connects: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[cfg(test)]
impl MockApiClient {
    pub fn new() -> (Self, MockHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let commands = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let connect_failures = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let connects = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let handle = MockHandle {
            events: events_tx,
            commands: commands.clone(),
            connect_failures: connect_failures.clone(),
            connects: connects.clone(),
        };
        (
            Self {
                events: events_rx,
                commands,
                connect_failures,
                connects,
            },
            handle,
        )
    }
}

#[cfg(test)]
#[async_trait]
impl ApiClient for MockApiClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        use std::sync::atomic::Ordering;

        self.connects.fetch_add(1, Ordering::SeqCst);
        let failures = self.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.connect_failures.store(failures - 1, Ordering::SeqCst);
            return Err(ClientError::Transport("scripted failure".to_string()));
        }
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    async fn send_command(&mut self, command: Command) -> Result<(), ClientError> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}
