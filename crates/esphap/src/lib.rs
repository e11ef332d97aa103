pub mod accessories;
pub mod config;
pub mod discovery;
pub mod esphome;
pub mod platform;

/// Plugin identifier used for accessory registration.
pub const PLUGIN_NAME: &str = "esphap";

/// Platform identifier used for accessory registration.
pub const PLATFORM_NAME: &str = "esphome";

pub use config::Config;
pub use config::ConfigError;
pub use config::DeviceEntry;
pub use config::LogLevel;
pub use platform::Platform;
