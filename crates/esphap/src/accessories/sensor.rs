//! Numeric sensor translator.
//!
//! Sensors map by unit of measurement and icon/class hints: temperature
//! units (with Fahrenheit converted, the capability mandates Celsius),
//! percentage plus a humidity hint, and PM2.5 mass concentration, which
//! additionally derives a discrete air quality level. Read-only.

use std::sync::Arc;

use esphap_hap::Accessory;
use esphap_hap::CharacteristicKind;
use esphap_hap::ServiceKind;

use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;
use crate::esphome::component::SensorConfig;

const CELSIUS_UNIT: &str = "°C";
const FAHRENHEIT_UNIT: &str = "°F";
const PERCENT_UNIT: &str = "%";
const PM25_UNIT: &str = "µg/m³";
const HUMIDITY_ICON: &str = "mdi:water-percent";

fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Discrete air quality derived from a PM2.5 mass concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AirQualityLevel {
    Unknown = 0,
    Excellent = 1,
    Good = 2,
    Fair = 3,
    Inferior = 4,
    Poor = 5,
}

impl AirQualityLevel {
    /// Fixed PM2.5 breakpoints. A missing or zero reading is unknown.
    pub(crate) fn from_pm25(value: Option<f64>) -> Self {
        match value {
            None => AirQualityLevel::Unknown,
            Some(v) if v <= 0.0 => AirQualityLevel::Unknown,
            Some(v) if v <= 12.0 => AirQualityLevel::Excellent,
            Some(v) if v <= 35.0 => AirQualityLevel::Good,
            Some(v) if v <= 55.0 => AirQualityLevel::Fair,
            Some(v) if v <= 150.0 => AirQualityLevel::Inferior,
            Some(_) => AirQualityLevel::Poor,
        }
    }
}

enum SensorRole {
    Temperature { fahrenheit: bool },
    Humidity,
    AirQuality,
}

/// Decide how a sensor maps, from its unit and icon/class hints.
fn role_for(config: &SensorConfig) -> Option<SensorRole> {
    let unit = config.unit_of_measurement.as_deref()?;
    match unit {
        CELSIUS_UNIT => Some(SensorRole::Temperature { fahrenheit: false }),
        FAHRENHEIT_UNIT => Some(SensorRole::Temperature { fahrenheit: true }),
        PERCENT_UNIT => {
            let humidity_hint = config.icon.as_deref() == Some(HUMIDITY_ICON)
                || config.device_class.as_deref() == Some("humidity");
            humidity_hint.then_some(SensorRole::Humidity)
        }
        PM25_UNIT => Some(SensorRole::AirQuality),
        _ => None,
    }
}

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    let ComponentConfig::Sensor(config) = &component.info.config else {
        return false;
    };
    let Some(role) = role_for(config) else {
        return false;
    };

    let name = &component.info.name;
    let mut stream = component.state_stream();

    match role {
        SensorRole::Temperature { fahrenheit } => {
            let characteristic = accessory
                .service(ServiceKind::TemperatureSensor, name)
                .characteristic(CharacteristicKind::CurrentTemperature);
            tokio::spawn(async move {
                loop {
                    let reading = match &*stream.borrow_and_update() {
                        Some(ComponentState::Sensor(reading)) => *reading,
                        _ => None,
                    };
                    if let Some(reading) = reading {
                        let celsius = if fahrenheit {
                            fahrenheit_to_celsius(reading)
                        } else {
                            reading
                        };
                        characteristic.update_value(celsius);
                    }
                    if stream.changed().await.is_err() {
                        break;
                    }
                }
            });
        }
        SensorRole::Humidity => {
            let characteristic = accessory
                .service(ServiceKind::HumiditySensor, name)
                .characteristic(CharacteristicKind::CurrentRelativeHumidity);
            tokio::spawn(async move {
                loop {
                    let reading = match &*stream.borrow_and_update() {
                        Some(ComponentState::Sensor(reading)) => *reading,
                        _ => None,
                    };
                    if let Some(reading) = reading {
                        characteristic.update_value(reading);
                    }
                    if stream.changed().await.is_err() {
                        break;
                    }
                }
            });
        }
        SensorRole::AirQuality => {
            let service = accessory.service(ServiceKind::AirQualitySensor, name);
            let density = service.characteristic(CharacteristicKind::Pm2_5Density);
            let quality = service.characteristic(CharacteristicKind::AirQuality);
            tokio::spawn(async move {
                loop {
                    let reading = match &*stream.borrow_and_update() {
                        Some(ComponentState::Sensor(reading)) => Some(*reading),
                        _ => None,
                    };
                    if let Some(reading) = reading {
                        if let Some(value) = reading {
                            density.update_value(value);
                        }
                        quality.update_value(AirQualityLevel::from_pm25(reading) as i64);
                    }
                    if stream.changed().await.is_err() {
                        break;
                    }
                }
            });
        }
    }

    true
}
