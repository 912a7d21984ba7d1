//! Configuration: TOML file, CLI overrides, lock-free runtime reads

mod schema;
mod store;

pub use schema::{AgentConfig, AppConfig, DeviceConfig, GestureConfig, WebConfig};
pub use store::ConfigStore;
