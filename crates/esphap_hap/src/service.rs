use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use crate::characteristic::Characteristic;
use crate::characteristic::CharacteristicKind;

/// The capability surfaces an accessory can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ServiceKind {
    Lightbulb,
    Switch,
    MotionSensor,
    ContactSensor,
    SmokeSensor,
    LeakSensor,
    TemperatureSensor,
    HumiditySensor,
    AirQualitySensor,
    WindowCovering,
    Door,
    GarageDoorOpener,
    Fan,
    HeaterCooler,
}

/// One capability surface on an accessory.
///
/// Characteristics are created on first access, mirroring the platform's
/// get-or-create `getCharacteristic` contract.
pub struct Service {
    kind: ServiceKind,
    name: String,
    characteristics: Mutex<Vec<Arc<Characteristic>>>,
}

impl Service {
    pub fn new(kind: ServiceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            characteristics: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get or create the characteristic of the given kind.
    pub fn characteristic(&self, kind: CharacteristicKind) -> Arc<Characteristic> {
        let mut characteristics = self.characteristics.lock().unwrap();
        if let Some(existing) = characteristics.iter().find(|c| c.kind() == kind) {
            return existing.clone();
        }
        let created = Arc::new(Characteristic::new(kind));
        characteristics.push(created.clone());
        created
    }

    /// Look up an already-wired characteristic.
    pub fn get_characteristic(&self, kind: CharacteristicKind) -> Option<Arc<Characteristic>> {
        self.characteristics
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.kind() == kind)
            .cloned()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_get_or_create() {
        let service = Service::new(ServiceKind::Lightbulb, "Desk Lamp");
        let first = service.characteristic(CharacteristicKind::On);
        let second = service.characteristic(CharacteristicKind::On);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_characteristic_absent() {
        let service = Service::new(ServiceKind::Switch, "Plug");
        assert!(service.get_characteristic(CharacteristicKind::Hue).is_none());
    }
}
