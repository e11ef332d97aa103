//! Capability translators.
//!
//! Each translator binds one component's live state to one accessory's
//! capability surfaces, bidirectionally, and reports whether the component
//! could be mapped. Dispatch is a closed match over the component kind:
//! kinds without an entry are unsupported and skipped by the platform.

mod binary_sensor;
mod climate;
mod climate_state;
mod cover;
mod fan;
mod light;
mod sensor;
mod switch;

use std::sync::Arc;

use esphap_hap::Accessory;

use crate::esphome::Component;
use crate::esphome::ComponentKind;

/// Uniform translator contract: wire the capability surfaces and subscribe
/// to the component's state stream. Wiring never blocks.
pub type Translator = fn(&Component, &Arc<Accessory>) -> bool;

/// Look up the translator for a capability kind.
pub fn lookup(kind: ComponentKind) -> Option<Translator> {
    match kind {
        ComponentKind::Light => Some(light::translate),
        ComponentKind::Switch => Some(switch::translate),
        ComponentKind::BinarySensor => Some(binary_sensor::translate),
        ComponentKind::Sensor => Some(sensor::translate),
        ComponentKind::Cover => Some(cover::translate),
        ComponentKind::Fan => Some(fan::translate),
        ComponentKind::Climate => Some(climate::translate),
        ComponentKind::TextSensor => None,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_supported_kinds() {
        assert!(lookup(ComponentKind::Light).is_some());
        assert!(lookup(ComponentKind::Climate).is_some());
        assert!(lookup(ComponentKind::Cover).is_some());
    }

    #[test]
    fn test_lookup_unsupported_kind() {
        assert!(lookup(ComponentKind::TextSensor).is_none());
    }
}
