pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod transport;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Device;
pub use engine::Engine;
pub use engine::EngineConfig;
pub use engine::Mode;
pub use engine::RelayState;
pub use engine::StatusRecord;
pub use error::Error;
pub use error::Result;
