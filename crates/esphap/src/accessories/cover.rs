//! Cover translator.
//!
//! Two behavior modes, selected by the component's assumed-state flag.
//! Assumed-state devices (command-only, no position feedback) become three
//! momentary switches that reset themselves shortly after triggering, so
//! the platform's polling never sees them stuck on. Position-aware devices
//! become a position-capable cover with dirty-checked target writes.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use esphap_hap::Accessory;
use esphap_hap::CharacteristicKind;
use esphap_hap::ServiceKind;

use crate::esphome::client::Command;
use crate::esphome::client::CoverAction;
use crate::esphome::client::CoverCommand;
use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;
use crate::esphome::component::CoverOperation;

/// How long a momentary switch stays on before resetting itself.
const MOMENTARY_RESET: Duration = Duration::from_millis(200);

const POSITION_STATE_DECREASING: i64 = 0;
const POSITION_STATE_INCREASING: i64 = 1;
const POSITION_STATE_STOPPED: i64 = 2;

fn service_kind_for_class(device_class: Option<&str>) -> ServiceKind {
    match device_class {
        Some("garage") => ServiceKind::Door,
        Some("curtain") | Some("window") | Some("blind") => ServiceKind::WindowCovering,
        _ => ServiceKind::WindowCovering,
    }
}

fn position_state_value(operation: CoverOperation) -> i64 {
    match operation {
        CoverOperation::Idle => POSITION_STATE_STOPPED,
        CoverOperation::Opening => POSITION_STATE_INCREASING,
        CoverOperation::Closing => POSITION_STATE_DECREASING,
    }
}

/// Last committed targets, in the capability domains (0-100 position,
/// 0-180 tilt degrees).
struct CoverTargets {
    position: f64,
    tilt: f64,
}

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    let ComponentConfig::Cover(config) = component.info.config.clone() else {
        return false;
    };

    let key = component.info.key;
    let name = component.info.name.clone();

    if config.assumed_state {
        let mut actions = vec![(CoverAction::Open, "Open"), (CoverAction::Close, "Close")];
        if config.supports_stop {
            actions.push((CoverAction::Stop, "Stop"));
        }
        for (action, label) in actions {
            let switch = accessory.service(ServiceKind::Switch, &format!("{} {}", name, label));
            let characteristic = switch.characteristic(CharacteristicKind::On);
            let component = component.clone();
            let reset_target = characteristic.clone();
            characteristic.on_set(move |value| {
                if value.as_bool() != Some(true) {
                    return;
                }
                component.send_command(Command::Cover(CoverCommand {
                    key,
                    position: None,
                    tilt: None,
                    action: Some(action),
                }));
                let reset_target = reset_target.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(MOMENTARY_RESET).await;
                    reset_target.update_value(false);
                });
            });
        }
        return true;
    }

    let service = accessory.service(service_kind_for_class(config.device_class.as_deref()), &name);
    let targets = Arc::new(Mutex::new(CoverTargets {
        position: 0.0,
        tilt: 0.0,
    }));

    let target_position = service.characteristic(CharacteristicKind::TargetPosition);
    {
        let targets = targets.clone();
        let component = component.clone();
        let supports_tilt = config.supports_tilt;
        target_position.on_set(move |value| {
            let Some(requested) = value.as_f64() else {
                return;
            };
            let mut targets = targets.lock().unwrap();
            if targets.position == requested {
                return;
            }
            targets.position = requested;
            component.send_command(Command::Cover(CoverCommand {
                key,
                position: Some(requested / 100.0),
                tilt: supports_tilt.then_some(targets.tilt / 180.0),
                action: None,
            }));
        });
    }

    if config.supports_tilt {
        let target_tilt = service.characteristic(CharacteristicKind::TargetTiltAngle);
        let targets = targets.clone();
        let component = component.clone();
        target_tilt.on_set(move |value| {
            let Some(requested) = value.as_f64() else {
                return;
            };
            let mut targets = targets.lock().unwrap();
            if targets.tilt == requested {
                return;
            }
            targets.tilt = requested;
            component.send_command(Command::Cover(CoverCommand {
                key,
                position: Some(targets.position / 100.0),
                tilt: Some(requested / 180.0),
                action: None,
            }));
        });
    }

    let mut stream = component.state_stream();
    let report_service = service.clone();
    tokio::spawn(async move {
        loop {
            let update = match &*stream.borrow_and_update() {
                Some(ComponentState::Cover(update)) => Some(update.clone()),
                _ => None,
            };
            if let Some(update) = update {
                if let Some(position) = update.position {
                    let percent = position * 100.0;
                    targets.lock().unwrap().position = percent;
                    report_service
                        .characteristic(CharacteristicKind::CurrentPosition)
                        .update_value(percent);
                }
                if config.supports_tilt {
                    if let Some(tilt) = update.tilt {
                        let degrees = tilt * 180.0;
                        targets.lock().unwrap().tilt = degrees;
                        report_service
                            .characteristic(CharacteristicKind::CurrentTiltAngle)
                            .update_value(degrees);
                    }
                }
                if let Some(operation) = update.operation {
                    report_service
                        .characteristic(CharacteristicKind::PositionState)
                        .update_value(position_state_value(operation));
                }
            }
            if stream.changed().await.is_err() {
                break;
            }
        }
    });

    true
}
