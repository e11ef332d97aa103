//! Fan translator.
//!
//! The device reports speed as a small enumeration; the capability surface
//! wants a continuous 0-100 percentage. Inbound speeds use the fixed table
//! directly; outbound percentages snap to the nearest table entry by
//! absolute distance, never interpolated, with ties keeping the earlier
//! entry.

use std::sync::Arc;

use esphap_hap::Accessory;
use esphap_hap::CharacteristicKind;
use esphap_hap::ServiceKind;

use crate::esphome::client::Command;
use crate::esphome::client::FanCommand;
use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;
use crate::esphome::component::FanDirection;
use crate::esphome::component::FanSpeed;

const ROTATION_CLOCKWISE: i64 = 0;
const ROTATION_COUNTER_CLOCKWISE: i64 = 1;

/// Percentage steps for the quantized device speeds. Order matters: ties
/// resolve to the earlier entry.
const SPEED_STEPS: [(f64, Option<FanSpeed>); 4] = [
    (0.0, None),
    (33.0, Some(FanSpeed::Low)),
    (66.0, Some(FanSpeed::Medium)),
    (100.0, Some(FanSpeed::High)),
];

/// Nearest table entry for a requested percentage.
fn nearest_speed(percentage: f64) -> Option<FanSpeed> {
    SPEED_STEPS
        .iter()
        .copied()
        .reduce(|previous, current| {
            if (current.0 - percentage).abs() < (previous.0 - percentage).abs() {
                current
            } else {
                previous
            }
        })
        .and_then(|(_, speed)| speed)
}

/// Table percentage for a reported speed.
fn percentage_for(speed: FanSpeed) -> f64 {
    match speed {
        FanSpeed::Low => 33.0,
        FanSpeed::Medium => 66.0,
        FanSpeed::High => 100.0,
    }
}

fn direction_value(direction: FanDirection) -> i64 {
    match direction {
        FanDirection::Forward => ROTATION_CLOCKWISE,
        FanDirection::Reverse => ROTATION_COUNTER_CLOCKWISE,
    }
}

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    let ComponentConfig::Fan(config) = component.info.config.clone() else {
        return false;
    };

    let key = component.info.key;
    let service = accessory.service(ServiceKind::Fan, &component.info.name);

    let on = service.characteristic(CharacteristicKind::On);
    {
        let component = component.clone();
        on.on_set(move |value| {
            if let Some(state) = value.as_bool() {
                component.send_command(Command::Fan(FanCommand {
                    key,
                    on: Some(state),
                    speed: None,
                    direction: None,
                }));
            }
        });
    }

    if config.supports_speed {
        let rotation_speed = service.characteristic(CharacteristicKind::RotationSpeed);
        let component = component.clone();
        rotation_speed.on_set(move |value| {
            let Some(percentage) = value.as_f64() else {
                return;
            };
            // Percentage 0 has no device speed; the On characteristic
            // carries the off intent.
            if let Some(speed) = nearest_speed(percentage) {
                component.send_command(Command::Fan(FanCommand {
                    key,
                    on: None,
                    speed: Some(speed),
                    direction: None,
                }));
            }
        });
    }

    if config.supports_direction {
        let rotation_direction = service.characteristic(CharacteristicKind::RotationDirection);
        let component = component.clone();
        rotation_direction.on_set(move |value| {
            let Some(requested) = value.as_i64() else {
                return;
            };
            let direction = if requested == ROTATION_CLOCKWISE {
                FanDirection::Forward
            } else {
                FanDirection::Reverse
            };
            component.send_command(Command::Fan(FanCommand {
                key,
                on: None,
                speed: None,
                direction: Some(direction),
            }));
        });
    }

    let mut stream = component.state_stream();
    let report_service = service.clone();
    tokio::spawn(async move {
        loop {
            let update = match &*stream.borrow_and_update() {
                Some(ComponentState::Fan(update)) => Some(update.clone()),
                _ => None,
            };
            if let Some(update) = update {
                report_service
                    .characteristic(CharacteristicKind::On)
                    .update_value(update.on);
                if config.supports_speed {
                    if let Some(speed) = update.speed {
                        report_service
                            .characteristic(CharacteristicKind::RotationSpeed)
                            .update_value(percentage_for(speed));
                    }
                }
                if config.supports_direction {
                    if let Some(direction) = update.direction {
                        report_service
                            .characteristic(CharacteristicKind::RotationDirection)
                            .update_value(direction_value(direction));
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

    use esphap_hap::Value;
    use esphap_hap::accessory_uuid;
    use tokio::time::sleep;

    use super::super::testutil;
    use super::*;
    use crate::esphome::component::ComponentKind;
    use crate::esphome::component::FanConfig;
    use crate::esphome::component::FanUpdate;

    fn fan() -> ComponentConfig {
        ComponentConfig::Fan(FanConfig {
            supports_speed: true,
            supports_direction: true,
        })
    }

    #[test]
    fn test_nearest_speed_boundaries() {
        assert_eq!(nearest_speed(0.0), None);
        assert_eq!(nearest_speed(16.0), None);
        assert_eq!(nearest_speed(17.0), Some(FanSpeed::Low));
        assert_eq!(nearest_speed(33.0), Some(FanSpeed::Low));
        assert_eq!(nearest_speed(49.0), Some(FanSpeed::Low));
        assert_eq!(nearest_speed(50.0), Some(FanSpeed::Medium));
        assert_eq!(nearest_speed(83.0), Some(FanSpeed::Medium));
        assert_eq!(nearest_speed(84.0), Some(FanSpeed::High));
        assert_eq!(nearest_speed(100.0), Some(FanSpeed::High));
    }

    #[test]
    fn test_nearest_speed_midpoint_keeps_earlier_entry() {
        // Equidistant between 0 and 33: the earlier table entry wins.
        assert_eq!(nearest_speed(16.5), None);
    }

    #[test]
    fn test_nearest_speed_is_monotonic() {
        let rank = |speed: Option<FanSpeed>| match speed {
            None => 0,
            Some(FanSpeed::Low) => 1,
            Some(FanSpeed::Medium) => 2,
            Some(FanSpeed::High) => 3,
        };
        let mut previous = 0;
        for percentage in 0..=100 {
            let current = rank(nearest_speed(f64::from(percentage)));
            assert!(current >= previous, "regressed at {}%", percentage);
            previous = current;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_speed_snaps_to_table() {
        let info = testutil::info(5, "Ceiling Fan", ComponentKind::Fan, fan());
        let (component, mut commands, _state_tx) = testutil::component(info);
        let accessory = Accessory::new("Ceiling Fan", accessory_uuid("Ceiling Fan"));
        assert!(translate(&component, &accessory));

        let service = accessory.find_service(ServiceKind::Fan).unwrap();
        service
            .characteristic(CharacteristicKind::RotationSpeed)
            .set(80.0);

        let sent = testutil::drain(&mut commands);
        assert_eq!(sent.len(), 1);
        let Command::Fan(command) = &sent[0] else {
            panic!("expected a fan command");
        };
        assert_eq!(command.speed, Some(FanSpeed::Medium));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_maps_one_to_one() {
        let info = testutil::info(5, "Ceiling Fan", ComponentKind::Fan, fan());
        let (component, mut commands, _state_tx) = testutil::component(info);
        let accessory = Accessory::new("Ceiling Fan", accessory_uuid("Ceiling Fan"));
        assert!(translate(&component, &accessory));

        let service = accessory.find_service(ServiceKind::Fan).unwrap();
        service
            .characteristic(CharacteristicKind::RotationDirection)
            .set(ROTATION_COUNTER_CLOCKWISE);

        let sent = testutil::drain(&mut commands);
        let Command::Fan(command) = &sent[0] else {
            panic!("expected a fan command");
        };
        assert_eq!(command.direction, Some(FanDirection::Reverse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_report_updates_characteristics() {
        let info = testutil::info(5, "Ceiling Fan", ComponentKind::Fan, fan());
        let (component, _commands, state_tx) = testutil::component(info);
        let accessory = Accessory::new("Ceiling Fan", accessory_uuid("Ceiling Fan"));
        assert!(translate(&component, &accessory));

        state_tx.send_replace(Some(ComponentState::Fan(FanUpdate {
            on: true,
            speed: Some(FanSpeed::High),
            direction: Some(FanDirection::Reverse),
        })));
        sleep(Duration::from_millis(10)).await;

        let service = accessory.find_service(ServiceKind::Fan).unwrap();
        assert_eq!(
            service.characteristic(CharacteristicKind::On).value(),
            Some(Value::Bool(true))
        );
        assert_eq!(
            service
                .characteristic(CharacteristicKind::RotationSpeed)
                .value(),
            Some(Value::Float(100.0))
        );
        assert_eq!(
            service
                .characteristic(CharacteristicKind::RotationDirection)
                .value(),
            Some(Value::Int(ROTATION_COUNTER_CLOCKWISE))
        );
    }
}
