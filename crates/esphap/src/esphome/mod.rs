//! The device-connection collaborator boundary: component model, API client
//! trait with the MQTT transport, and per-device connection lifecycle.

pub mod client;
pub mod component;
pub mod connection;

pub use client::ApiClient;
pub use client::ClientEvent;
pub use client::Command;
pub use client::MqttApiClient;
pub use component::Component;
pub use component::ComponentKind;
pub use connection::DeviceConnection;
