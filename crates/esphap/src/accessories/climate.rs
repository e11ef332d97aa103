//! Climate translator.
//!
//! The heater/cooler surface exposes independent cooling and heating
//! threshold controls even for devices with a single combined target; the
//! paired-edit inference in [`ClimateState`] decides between an auto range
//! and a direct mode switch. Threshold-triggered flushes are deferred by the
//! pairing window so one range gesture emits one device command;
//! every other setter flushes immediately.

use std::sync::Arc;
use std::sync::Mutex;

use esphap_hap::Accessory;
use esphap_hap::CharacteristicKind;
use esphap_hap::CharacteristicProps;
use esphap_hap::ServiceKind;

use super::climate_state::ClimateState;
use super::climate_state::THRESHOLD_PAIR_WINDOW;
use crate::esphome::client::Command;
use crate::esphome::component::ClimateFanMode;
use crate::esphome::component::ClimateMode;
use crate::esphome::component::ClimateSwingMode;
use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;

const TARGET_STATE_AUTO: i64 = 0;
const TARGET_STATE_HEAT: i64 = 1;
const TARGET_STATE_COOL: i64 = 2;

const CURRENT_STATE_INACTIVE: i64 = 0;
const CURRENT_STATE_HEATING: i64 = 2;
const CURRENT_STATE_COOLING: i64 = 3;

fn target_state_value(mode: ClimateMode) -> Option<i64> {
    match mode {
        ClimateMode::Auto => Some(TARGET_STATE_AUTO),
        ClimateMode::Heat => Some(TARGET_STATE_HEAT),
        ClimateMode::Cool => Some(TARGET_STATE_COOL),
        _ => None,
    }
}

fn mode_for_target_state(value: i64) -> Option<ClimateMode> {
    match value {
        TARGET_STATE_AUTO => Some(ClimateMode::Auto),
        TARGET_STATE_HEAT => Some(ClimateMode::Heat),
        TARGET_STATE_COOL => Some(ClimateMode::Cool),
        _ => None,
    }
}

/// Derived current heater/cooler state from the target mode.
fn current_state_value(mode: ClimateMode) -> i64 {
    match mode {
        ClimateMode::Auto | ClimateMode::Heat => CURRENT_STATE_HEATING,
        ClimateMode::Cool => CURRENT_STATE_COOLING,
        _ => CURRENT_STATE_INACTIVE,
    }
}

type Flush = Arc<dyn Fn() + Send + Sync>;

/// Flush after the pairing window so a possible second threshold edit is
/// folded into the same command.
fn flush_after_window(flush: Flush) {
    tokio::spawn(async move {
        tokio::time::sleep(THRESHOLD_PAIR_WINDOW).await;
        flush();
    });
}

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    let ComponentConfig::Climate(config) = component.info.config.clone() else {
        return false;
    };

    let service = accessory.service(ServiceKind::HeaterCooler, &component.info.name);
    let state = Arc::new(Mutex::new(ClimateState::new(component.info.key)));

    let flush: Flush = {
        let state = state.clone();
        let component = component.clone();
        Arc::new(move || {
            if let Some(command) = state.lock().unwrap().take_command() {
                component.send_command(Command::Climate(command));
            }
        })
    };

    let active = service.characteristic(CharacteristicKind::Active);
    {
        let state = state.clone();
        let flush = flush.clone();
        active.on_set(move |value| {
            if let Some(on) = value.as_bool() {
                state.lock().unwrap().set_active(on);
                flush();
            }
        });
    }

    let threshold_props = CharacteristicProps {
        min_value: config.visual_min_temperature,
        max_value: config.visual_max_temperature,
        min_step: Some(1.0),
        valid_values: None,
    };

    let cooling = service.characteristic(CharacteristicKind::CoolingThresholdTemperature);
    cooling.set_props(threshold_props.clone());
    if let Some(min) = config.visual_min_temperature {
        cooling.update_value(min);
    }
    {
        let state = state.clone();
        let flush = flush.clone();
        cooling.on_set(move |value| {
            if let Some(threshold) = value.as_f64() {
                state.lock().unwrap().set_target_temperature_low(threshold);
                flush_after_window(flush.clone());
            }
        });
    }

    let heating = service.characteristic(CharacteristicKind::HeatingThresholdTemperature);
    heating.set_props(threshold_props);
    if let Some(min) = config.visual_min_temperature {
        heating.update_value(min);
    }
    {
        let state = state.clone();
        let flush = flush.clone();
        heating.on_set(move |value| {
            if let Some(threshold) = value.as_f64() {
                state.lock().unwrap().set_target_temperature_high(threshold);
                flush_after_window(flush.clone());
            }
        });
    }

    let target_temperature = service.characteristic(CharacteristicKind::TargetTemperature);
    {
        let state = state.clone();
        let flush = flush.clone();
        target_temperature.on_set(move |value| {
            if let Some(target) = value.as_f64() {
                state.lock().unwrap().set_target_temperature(target);
                flush();
            }
        });
    }

    let target_state_values: Vec<i64> = config
        .supported_modes
        .iter()
        .copied()
        .filter_map(target_state_value)
        .collect();
    if !target_state_values.is_empty() {
        let target_state = service.characteristic(CharacteristicKind::TargetHeaterCoolerState);
        target_state.set_props(CharacteristicProps {
            valid_values: Some(target_state_values),
            ..CharacteristicProps::default()
        });
        let state = state.clone();
        let flush = flush.clone();
        target_state.on_set(move |value| {
            if let Some(mode) = value.as_i64().and_then(mode_for_target_state) {
                state.lock().unwrap().set_mode(mode);
                flush();
            }
        });
    }

    if !config.supported_fan_modes.is_empty() {
        let fan_state = service.characteristic(CharacteristicKind::CurrentFanState);
        fan_state.set_props(CharacteristicProps {
            valid_values: Some(config.supported_fan_modes.iter().map(|m| *m as i64).collect()),
            ..CharacteristicProps::default()
        });
        let state = state.clone();
        let flush = flush.clone();
        fan_state.on_set(move |value| {
            let mode = value
                .as_i64()
                .and_then(|v| u8::try_from(v).ok())
                .and_then(ClimateFanMode::from_repr);
            if let Some(mode) = mode {
                state.lock().unwrap().set_fan_mode(mode);
                flush();
            }
        });
    }

    if !config.supported_swing_modes.is_empty() {
        let swing = service.characteristic(CharacteristicKind::SwingMode);
        swing.set_props(CharacteristicProps {
            valid_values: Some(
                config
                    .supported_swing_modes
                    .iter()
                    .map(|m| *m as i64)
                    .collect(),
            ),
            ..CharacteristicProps::default()
        });
        let state = state.clone();
        let flush = flush.clone();
        swing.on_set(move |value| {
            let mode = value
                .as_i64()
                .and_then(|v| u8::try_from(v).ok())
                .and_then(ClimateSwingMode::from_repr);
            if let Some(mode) = mode {
                state.lock().unwrap().set_swing_mode(mode);
                flush();
            }
        });
    }

    let mut stream = component.state_stream();
    let report_service = service.clone();
    let report_config = config;
    let report_state = state;
    tokio::spawn(async move {
        loop {
            let update = match &*stream.borrow_and_update() {
                Some(ComponentState::Climate(update)) => Some(update.clone()),
                _ => None,
            };
            if let Some(update) = update {
                report_state.lock().unwrap().apply_report(&update);

                report_service
                    .characteristic(CharacteristicKind::Active)
                    .update_value(update.mode != ClimateMode::Off);
                if report_config.supports_current_temperature {
                    if let Some(current) = update.current_temperature {
                        report_service
                            .characteristic(CharacteristicKind::CurrentTemperature)
                            .update_value(current);
                    }
                }
                report_service
                    .characteristic(CharacteristicKind::TargetTemperature)
                    .update_value(update.target_temperature);
                report_service
                    .characteristic(CharacteristicKind::CoolingThresholdTemperature)
                    .update_value(update.target_temperature_low);
                report_service
                    .characteristic(CharacteristicKind::HeatingThresholdTemperature)
                    .update_value(update.target_temperature_high);

                if !report_config.supported_modes.is_empty() {
                    report_service
                        .characteristic(CharacteristicKind::CurrentHeaterCoolerState)
                        .update_value(current_state_value(update.mode));
                    if let Some(value) = target_state_value(update.mode) {
                        report_service
                            .characteristic(CharacteristicKind::TargetHeaterCoolerState)
                            .update_value(value);
                    }
                }
                if !report_config.supported_fan_modes.is_empty() {
                    if let Some(mode) = update.fan_mode {
                        report_service
                            .characteristic(CharacteristicKind::CurrentFanState)
                            .update_value(mode as i64);
                    }
                }
                if !report_config.supported_swing_modes.is_empty() {
                    if let Some(mode) = update.swing_mode {
                        report_service
                            .characteristic(CharacteristicKind::SwingMode)
                            .update_value(mode as i64);
                    }
                }
            }
            if stream.changed().await.is_err() {
                break;
            }
        }
    });

    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use esphap_hap::accessory_uuid;
    use tokio::time::sleep;

    use super::super::testutil;
    use super::*;
    use crate::esphome::component::ClimateConfig;
    use crate::esphome::component::ClimateUpdate;
    use crate::esphome::component::ComponentKind;

    fn climate_config() -> ComponentConfig {
        ComponentConfig::Climate(ClimateConfig {
            supports_two_point: true,
            supports_current_temperature: true,
            visual_min_temperature: Some(10.0),
            visual_max_temperature: Some(30.0),
            supported_modes: vec![
                ClimateMode::Off,
                ClimateMode::Auto,
                ClimateMode::Cool,
                ClimateMode::Heat,
            ],
            supported_fan_modes: vec![ClimateFanMode::Low, ClimateFanMode::High],
            supported_swing_modes: vec![ClimateSwingMode::Off, ClimateSwingMode::Vertical],
        })
    }

    fn setup() -> (
        std::sync::Arc<Accessory>,
        tokio::sync::mpsc::UnboundedReceiver<Command>,
        tokio::sync::watch::Sender<Option<ComponentState>>,
    ) {
        let info = testutil::info(9, "Heat Pump", ComponentKind::Climate, climate_config());
        let (component, commands, state_tx) = testutil::component(info);
        let accessory = Accessory::new("Heat Pump", accessory_uuid("Heat Pump"));
        assert!(translate(&component, &accessory));
        (accessory, commands, state_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_gesture_emits_single_auto_command() {
        let (accessory, mut commands, _state_tx) = setup();
        let service = accessory.find_service(ServiceKind::HeaterCooler).unwrap();

        service
            .characteristic(CharacteristicKind::CoolingThresholdTemperature)
            .set(18.0);
        sleep(Duration::from_millis(10)).await;
        service
            .characteristic(CharacteristicKind::HeatingThresholdTemperature)
            .set(24.0);
        sleep(Duration::from_millis(200)).await;

        let sent = testutil::drain(&mut commands);
        assert_eq!(sent.len(), 1);
        let Command::Climate(command) = &sent[0] else {
            panic!("expected a climate command");
        };
        assert_eq!(command.mode, ClimateMode::Auto);
        assert_eq!(command.target_temperature_low, 18.0);
        assert_eq!(command.target_temperature_high, 24.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_cooling_edit_is_direct_cool() {
        let (accessory, mut commands, _state_tx) = setup();
        let service = accessory.find_service(ServiceKind::HeaterCooler).unwrap();

        service
            .characteristic(CharacteristicKind::CoolingThresholdTemperature)
            .set(18.0);
        sleep(Duration::from_millis(200)).await;

        let sent = testutil::drain(&mut commands);
        assert_eq!(sent.len(), 1);
        let Command::Climate(command) = &sent[0] else {
            panic!("expected a climate command");
        };
        assert_eq!(command.mode, ClimateMode::Cool);
        assert_eq!(command.target_temperature, 18.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_set_flushes_immediately() {
        let (accessory, mut commands, _state_tx) = setup();
        let service = accessory.find_service(ServiceKind::HeaterCooler).unwrap();

        service.characteristic(CharacteristicKind::Active).set(1i64);

        let sent = testutil::drain(&mut commands);
        assert_eq!(sent.len(), 1);
        let Command::Climate(command) = &sent[0] else {
            panic!("expected a climate command");
        };
        assert_eq!(command.mode, ClimateMode::Auto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_propagates_to_characteristics() {
        let (accessory, _commands, state_tx) = setup();
        let service = accessory.find_service(ServiceKind::HeaterCooler).unwrap();

        state_tx.send_replace(Some(ComponentState::Climate(ClimateUpdate {
            mode: ClimateMode::Cool,
            current_temperature: Some(23.5),
            target_temperature: 20.0,
            target_temperature_low: 19.0,
            target_temperature_high: 25.0,
            fan_mode: Some(ClimateFanMode::High),
            swing_mode: Some(ClimateSwingMode::Vertical),
        })));
        sleep(Duration::from_millis(10)).await;

        let value = |kind| service.characteristic(kind).value();
        assert_eq!(
            value(CharacteristicKind::Active),
            Some(esphap_hap::Value::Bool(true))
        );
        assert_eq!(
            value(CharacteristicKind::CurrentTemperature),
            Some(esphap_hap::Value::Float(23.5))
        );
        assert_eq!(
            value(CharacteristicKind::CurrentHeaterCoolerState),
            Some(esphap_hap::Value::Int(CURRENT_STATE_COOLING))
        );
        assert_eq!(
            value(CharacteristicKind::CurrentFanState),
            Some(esphap_hap::Value::Int(ClimateFanMode::High as i64))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_active_set_is_suppressed() {
        let (accessory, mut commands, state_tx) = setup();
        let service = accessory.find_service(ServiceKind::HeaterCooler).unwrap();

        state_tx.send_replace(Some(ComponentState::Climate(ClimateUpdate {
            mode: ClimateMode::Heat,
            target_temperature: 21.0,
            ..ClimateUpdate::default()
        })));
        sleep(Duration::from_millis(10)).await;

        // The platform echoes active=1 after the report; nothing changed.
        service.characteristic(CharacteristicKind::Active).set(1i64);
        assert!(testutil::drain(&mut commands).is_empty());
    }
}
