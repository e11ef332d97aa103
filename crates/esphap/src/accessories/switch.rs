//! Switch translator.
//!
//! Outbound sets are suppressed unless the requested value differs from the
//! last state the device reported; inbound reports overwrite the exposed
//! characteristic unconditionally.

use std::sync::Arc;
use std::sync::Mutex;

use esphap_hap::Accessory;
use esphap_hap::CharacteristicKind;
use esphap_hap::ServiceKind;

use crate::esphome::client::Command;
use crate::esphome::client::SwitchCommand;
use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    if component.info.config != ComponentConfig::Switch {
        return false;
    }

    let key = component.info.key;
    let service = accessory.service(ServiceKind::Switch, &component.info.name);
    let on = service.characteristic(CharacteristicKind::On);
    let last_reported: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));

    {
        let last_reported = last_reported.clone();
        let component = component.clone();
        on.on_set(move |value| {
            let Some(requested) = value.as_bool() else {
                return;
            };
            if *last_reported.lock().unwrap() == Some(requested) {
                return;
            }
            component.send_command(Command::Switch(SwitchCommand {
                key,
                on: requested,
            }));
        });
    }

    let mut stream = component.state_stream();
    tokio::spawn(async move {
        loop {
            let state = match &*stream.borrow_and_update() {
                Some(ComponentState::Switch(state)) => Some(*state),
                _ => None,
            };
            if let Some(state) = state {
                *last_reported.lock().unwrap() = Some(state);
                on.update_value(state);
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

    fn setup() -> (
        Arc<Accessory>,
        tokio::sync::mpsc::UnboundedReceiver<Command>,
        tokio::sync::watch::Sender<Option<ComponentState>>,
    ) {
        let info = testutil::info(2, "Plug", ComponentKind::Switch, ComponentConfig::Switch);
        let (component, commands, state_tx) = testutil::component(info);
        let accessory = Accessory::new("Plug", accessory_uuid("Plug"));
        assert!(translate(&component, &accessory));
        (accessory, commands, state_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_issues_command_when_state_differs() {
        let (accessory, mut commands, _state_tx) = setup();
        let on = accessory
            .find_service(ServiceKind::Switch)
            .unwrap()
            .characteristic(CharacteristicKind::On);

        on.set(true);
        assert_eq!(
            testutil::drain(&mut commands),
            vec![Command::Switch(SwitchCommand { key: 2, on: true })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_set_is_suppressed() {
        let (accessory, mut commands, state_tx) = setup();
        let on = accessory
            .find_service(ServiceKind::Switch)
            .unwrap()
            .characteristic(CharacteristicKind::On);

        state_tx.send_replace(Some(ComponentState::Switch(true)));
        sleep(Duration::from_millis(10)).await;

        on.set(true);
        assert!(testutil::drain(&mut commands).is_empty());

        on.set(false);
        assert_eq!(
            testutil::drain(&mut commands),
            vec![Command::Switch(SwitchCommand { key: 2, on: false })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_state_overwrites_characteristic() {
        let (accessory, _commands, state_tx) = setup();
        let on = accessory
            .find_service(ServiceKind::Switch)
            .unwrap()
            .characteristic(CharacteristicKind::On);

        state_tx.send_replace(Some(ComponentState::Switch(true)));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(on.value(), Some(Value::Bool(true)));

        state_tx.send_replace(Some(ComponentState::Switch(false)));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(on.value(), Some(Value::Bool(false)));
    }
}
