//! The component model exposed by a device connection.
//!
//! A component is one capability instance announced by a device: immutable
//! kind-specific configuration plus a live state stream. State is published
//! through a watch channel, so a subscriber always sees the latest known
//! value on subscribe (replay-one) and every update after it.

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;

use super::client::Command;

/// Capability kind tag reported by the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComponentKind {
    Light,
    Switch,
    BinarySensor,
    Sensor,
    TextSensor,
    Cover,
    Fan,
    Climate,
}

/// Device climate mode. Discriminants match the device protocol.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::FromRepr,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ClimateMode {
    Off = 0,
    Auto = 1,
    Cool = 2,
    Heat = 3,
    FanOnly = 4,
    Dry = 5,
}

/// Device climate fan mode. Discriminants match the device protocol.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::FromRepr,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ClimateFanMode {
    On = 0,
    Off = 1,
    Auto = 2,
    Low = 3,
    Medium = 4,
    High = 5,
    Middle = 6,
    Focus = 7,
    Diffused = 8,
    Quiet = 9,
}

/// Device swing mode. Discriminants match the device protocol.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::FromRepr,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ClimateSwingMode {
    Off = 0,
    Both = 1,
    Vertical = 2,
    Horizontal = 3,
}

/// Quantized fan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FanSpeed {
    Low,
    Medium,
    High,
}

/// Fan rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FanDirection {
    Forward,
    Reverse,
}

/// Cover motion reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CoverOperation {
    Idle,
    Opening,
    Closing,
}

/// Light color model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LightColorMode {
    White,
    Rgb,
}

/// Static configuration for a light component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightConfig {
    pub supports_rgb: bool,
    pub supports_brightness: bool,
    /// Named effects, including the device's "None" sentinel if reported.
    pub effects: Vec<String>,
}

/// Static configuration for a binary sensor component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinarySensorConfig {
    pub device_class: Option<String>,
}

/// Static configuration for a numeric sensor component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorConfig {
    pub unit_of_measurement: Option<String>,
    pub device_class: Option<String>,
    pub icon: Option<String>,
}

/// Static configuration for a cover component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverConfig {
    pub device_class: Option<String>,
    /// The device only accepts commands and cannot report real position.
    pub assumed_state: bool,
    pub supports_position: bool,
    pub supports_tilt: bool,
    pub supports_stop: bool,
}

/// Static configuration for a fan component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanConfig {
    pub supports_speed: bool,
    pub supports_direction: bool,
}

/// Static configuration for a climate component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClimateConfig {
    /// Independent low/high thresholds rather than one setpoint.
    pub supports_two_point: bool,
    pub supports_current_temperature: bool,
    pub visual_min_temperature: Option<f64>,
    pub visual_max_temperature: Option<f64>,
    pub supported_modes: Vec<ClimateMode>,
    pub supported_fan_modes: Vec<ClimateFanMode>,
    pub supported_swing_modes: Vec<ClimateSwingMode>,
}

/// Kind-specific immutable configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentConfig {
    Light(LightConfig),
    Switch,
    BinarySensor(BinarySensorConfig),
    Sensor(SensorConfig),
    TextSensor,
    Cover(CoverConfig),
    Fan(FanConfig),
    Climate(ClimateConfig),
}

/// Component metadata announced by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInfo {
    /// Stable device-local numeric id.
    pub key: u32,
    /// Display name; the accessory identity derives from it.
    pub name: String,
    pub kind: ComponentKind,
    pub config: ComponentConfig,
}

/// Light state report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightUpdate {
    pub on: bool,
    /// 0.0 to 1.0.
    pub brightness: Option<f64>,
    /// Channel values 0.0 to 1.0.
    pub red: Option<f64>,
    pub green: Option<f64>,
    pub blue: Option<f64>,
    pub color_mode: Option<LightColorMode>,
    pub effect: Option<String>,
}

/// Cover state report. Position and tilt are fractions 0.0 to 1.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverUpdate {
    pub position: Option<f64>,
    pub tilt: Option<f64>,
    pub operation: Option<CoverOperation>,
}

/// Fan state report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanUpdate {
    pub on: bool,
    pub speed: Option<FanSpeed>,
    pub direction: Option<FanDirection>,
}

/// Climate state report. Reports overwrite the local mirror completely.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateUpdate {
    pub mode: ClimateMode,
    pub current_temperature: Option<f64>,
    pub target_temperature: f64,
    pub target_temperature_low: f64,
    pub target_temperature_high: f64,
    pub fan_mode: Option<ClimateFanMode>,
    pub swing_mode: Option<ClimateSwingMode>,
}

impl Default for ClimateUpdate {
    fn default() -> Self {
        Self {
            mode: ClimateMode::Off,
            current_temperature: None,
            target_temperature: 0.0,
            target_temperature_low: 0.0,
            target_temperature_high: 0.0,
            fan_mode: None,
            swing_mode: None,
        }
    }
}

/// Kind-specific live state payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Light(LightUpdate),
    Switch(bool),
    BinarySensor(bool),
    Sensor(Option<f64>),
    Text(String),
    Cover(CoverUpdate),
    Fan(FanUpdate),
    Climate(ClimateUpdate),
}

/// Receiving end of a component's state stream.
pub type StateReceiver = watch::Receiver<Option<ComponentState>>;

/// A live component handle: metadata, state stream, and the command path
/// back to the owning device connection.
#[derive(Clone)]
pub struct Component {
    pub info: ComponentInfo,
    state: StateReceiver,
    commands: mpsc::UnboundedSender<Command>,
    reachable: watch::Receiver<bool>,
}

impl Component {
    pub fn new(
        info: ComponentInfo,
        state: StateReceiver,
        commands: mpsc::UnboundedSender<Command>,
        reachable: watch::Receiver<bool>,
    ) -> Self {
        Self {
            info,
            state,
            commands,
            reachable,
        }
    }

    /// Subscribe to the state stream. The receiver holds the latest known
    /// state immediately and observes every subsequent update.
    pub fn state_stream(&self) -> StateReceiver {
        self.state.clone()
    }

    /// Reachability of the owning device connection.
    pub fn reachability(&self) -> watch::Receiver<bool> {
        self.reachable.clone()
    }

    /// Queue an outbound command. Dropped connections are logged, not fatal:
    /// the retry loop will bring the device back.
    pub fn send_command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(
                "dropping command for {}: device connection closed",
                self.info.name
            );
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("key", &self.info.key)
            .field("name", &self.info.name)
            .field("kind", &self.info.kind)
            .finish()
    }
}
