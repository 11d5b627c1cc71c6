mod device;
mod engine;
mod message;
mod relay;
pub mod state;

pub use device::Device;
pub use engine::Engine;
pub use engine::EngineConfig;
pub use engine::Mode;
pub use state::RELAY_COUNT;
pub use state::RelayState;
pub use state::StatusRecord;
pub use state::check_relay;
