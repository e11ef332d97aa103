use std::fmt;
use std::sync::Mutex;

use crate::value::Value;

/// The fixed vocabulary of characteristics the bridge knows how to wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CharacteristicKind {
    On,
    Brightness,
    Hue,
    Saturation,
    MotionDetected,
    ContactSensorState,
    SmokeDetected,
    LeakDetected,
    CurrentTemperature,
    CurrentRelativeHumidity,
    AirQuality,
    Pm2_5Density,
    CurrentPosition,
    TargetPosition,
    PositionState,
    CurrentTiltAngle,
    TargetTiltAngle,
    RotationSpeed,
    RotationDirection,
    Active,
    CurrentHeaterCoolerState,
    TargetHeaterCoolerState,
    CoolingThresholdTemperature,
    HeatingThresholdTemperature,
    TargetTemperature,
    CurrentFanState,
    SwingMode,
}

/// Value constraints advertised to the platform for a characteristic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacteristicProps {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_step: Option<f64>,
    pub valid_values: Option<Vec<i64>>,
}

type SetHandler = Box<dyn Fn(&Value) + Send + Sync>;

/// One characteristic on a service.
///
/// Holds the last known value, optional value constraints, and at most one
/// set handler. `set` models a write arriving from the platform (user
/// action); `update_value` models a device-driven update and never invokes
/// the handler.
pub struct Characteristic {
    kind: CharacteristicKind,
    value: Mutex<Option<Value>>,
    props: Mutex<CharacteristicProps>,
    on_set: Mutex<Option<SetHandler>>,
}

impl Characteristic {
    pub(crate) fn new(kind: CharacteristicKind) -> Self {
        Self {
            kind,
            value: Mutex::new(None),
            props: Mutex::new(CharacteristicProps::default()),
            on_set: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> CharacteristicKind {
        self.kind
    }

    /// Last known value, from either direction.
    pub fn value(&self) -> Option<Value> {
        *self.value.lock().unwrap()
    }

    /// Store a device-driven value without invoking the set handler.
    pub fn update_value(&self, value: impl Into<Value>) {
        *self.value.lock().unwrap() = Some(value.into());
    }

    /// Install the set handler, replacing any previous one. Re-translation of
    /// a component after a reconnect rewires the same characteristic.
    pub fn on_set(&self, handler: impl Fn(&Value) + Send + Sync + 'static) {
        *self.on_set.lock().unwrap() = Some(Box::new(handler));
    }

    /// A platform-driven write: stores the value, then invokes the handler.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        *self.value.lock().unwrap() = Some(value);
        if let Some(handler) = self.on_set.lock().unwrap().as_ref() {
            handler(&value);
        }
    }

    pub fn set_props(&self, props: CharacteristicProps) {
        *self.props.lock().unwrap() = props;
    }

    pub fn props(&self) -> CharacteristicProps {
        self.props.lock().unwrap().clone()
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("kind", &self.kind)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_update_value_does_not_invoke_handler() {
        let characteristic = Characteristic::new(CharacteristicKind::On);
        let fired = Arc::new(Mutex::new(0));
        let fired_in_handler = fired.clone();
        characteristic.on_set(move |_| {
            *fired_in_handler.lock().unwrap() += 1;
        });

        characteristic.update_value(true);
        assert_eq!(*fired.lock().unwrap(), 0);
        assert_eq!(characteristic.value(), Some(Value::Bool(true)));
    }

    #[test]
    fn test_set_stores_then_invokes_handler() {
        let characteristic = Characteristic::new(CharacteristicKind::Brightness);
        let seen = Arc::new(Mutex::new(None));
        let seen_in_handler = seen.clone();
        characteristic.on_set(move |value| {
            *seen_in_handler.lock().unwrap() = value.as_f64();
        });

        characteristic.set(42.0);
        assert_eq!(*seen.lock().unwrap(), Some(42.0));
        assert_eq!(characteristic.value(), Some(Value::Float(42.0)));
    }

    #[test]
    fn test_handler_replacement() {
        let characteristic = Characteristic::new(CharacteristicKind::On);
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));

        let counter = first.clone();
        characteristic.on_set(move |_| *counter.lock().unwrap() += 1);
        let counter = second.clone();
        characteristic.on_set(move |_| *counter.lock().unwrap() += 1);

        characteristic.set(true);
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }
}
