//! The accessory-platform surface consumed by the bridge.
//!
//! This crate models the capability registry the translators wire against:
//! accessories carrying services, services carrying characteristics with
//! get/set semantics, and deterministic accessory identity derived from a
//! component's display name. The platform's own persistence and transport
//! are not implemented here; [`AccessoryRegistry`] is the hand-off point.

mod accessory;
mod characteristic;
mod ident;
mod registry;
mod service;
mod value;

pub use accessory::Accessory;
pub use characteristic::Characteristic;
pub use characteristic::CharacteristicKind;
pub use characteristic::CharacteristicProps;
pub use ident::accessory_uuid;
pub use registry::AccessoryRegistry;
pub use registry::LocalRegistry;
pub use service::Service;
pub use service::ServiceKind;
pub use value::Value;
