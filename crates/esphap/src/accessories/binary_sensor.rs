//! Binary sensor translator.
//!
//! Device classes map to sensor capabilities through a static table; a
//! sensor whose class has no entry is not translated. Read-only: inbound
//! boolean state echoes to the characteristic, no set handler exists.

use std::sync::Arc;

use esphap_hap::Accessory;
use esphap_hap::CharacteristicKind;
use esphap_hap::ServiceKind;

use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;

/// Device-class to capability mapping.
fn capability_for_class(device_class: &str) -> Option<(ServiceKind, CharacteristicKind)> {
    match device_class {
        "motion" => Some((ServiceKind::MotionSensor, CharacteristicKind::MotionDetected)),
        "window" | "door" | "garage_door" => Some((
            ServiceKind::ContactSensor,
            CharacteristicKind::ContactSensorState,
        )),
        "smoke" => Some((ServiceKind::SmokeSensor, CharacteristicKind::SmokeDetected)),
        "moisture" => Some((ServiceKind::LeakSensor, CharacteristicKind::LeakDetected)),
        _ => None,
    }
}

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    let ComponentConfig::BinarySensor(config) = &component.info.config else {
        return false;
    };
    let Some((service_kind, characteristic_kind)) =
        config.device_class.as_deref().and_then(capability_for_class)
    else {
        return false;
    };

    let service = accessory.service(service_kind, &component.info.name);
    let characteristic = service.characteristic(characteristic_kind);

    let mut stream = component.state_stream();
    tokio::spawn(async move {
        loop {
            let state = match &*stream.borrow_and_update() {
                Some(ComponentState::BinarySensor(state)) => Some(*state),
                _ => None,
            };
            if let Some(state) = state {
                characteristic.update_value(state);
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
    use crate::esphome::component::BinarySensorConfig;
    use crate::esphome::component::ComponentKind;

    fn binary_sensor(device_class: Option<&str>) -> ComponentConfig {
        ComponentConfig::BinarySensor(BinarySensorConfig {
            device_class: device_class.map(str::to_string),
        })
    }

    #[test]
    fn test_class_table() {
        assert_eq!(
            capability_for_class("motion"),
            Some((ServiceKind::MotionSensor, CharacteristicKind::MotionDetected))
        );
        assert_eq!(
            capability_for_class("garage_door"),
            Some((
                ServiceKind::ContactSensor,
                CharacteristicKind::ContactSensorState
            ))
        );
        assert_eq!(
            capability_for_class("moisture"),
            Some((ServiceKind::LeakSensor, CharacteristicKind::LeakDetected))
        );
        assert_eq!(capability_for_class("vibration"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_class_fails_translation() {
        let info = testutil::info(
            3,
            "Shaker",
            ComponentKind::BinarySensor,
            binary_sensor(Some("vibration")),
        );
        let (component, _commands, _state_tx) = testutil::component(info);
        let accessory = Accessory::new("Shaker", accessory_uuid("Shaker"));
        assert!(!translate(&component, &accessory));
        assert!(accessory.services().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_class_fails_translation() {
        let info = testutil::info(3, "Pin", ComponentKind::BinarySensor, binary_sensor(None));
        let (component, _commands, _state_tx) = testutil::component(info);
        let accessory = Accessory::new("Pin", accessory_uuid("Pin"));
        assert!(!translate(&component, &accessory));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_state_echoes_to_characteristic() {
        let info = testutil::info(
            3,
            "Hallway",
            ComponentKind::BinarySensor,
            binary_sensor(Some("motion")),
        );
        let (component, mut commands, state_tx) = testutil::component(info);
        let accessory = Accessory::new("Hallway", accessory_uuid("Hallway"));
        assert!(translate(&component, &accessory));

        state_tx.send_replace(Some(ComponentState::BinarySensor(true)));
        sleep(Duration::from_millis(10)).await;

        let characteristic = accessory
            .find_service(ServiceKind::MotionSensor)
            .unwrap()
            .characteristic(CharacteristicKind::MotionDetected);
        assert_eq!(characteristic.value(), Some(Value::Bool(true)));
        // Pure sensor: no outbound device traffic.
        assert!(testutil::drain(&mut commands).is_empty());
    }
}
