/// Errors surfaced by the status engine and relay controller.
///
/// Errors are `Clone` because a single failed fetch is delivered to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The device could not be reached (connection refused, timeout, ...).
    #[error("failed to reach device: {0}")]
    Transport(String),

    /// The device answered, but the body was not a valid status record.
    #[error("failed to decode device response: {0}")]
    Decode(String),

    /// Relay id outside of the device's relays.
    #[error("relay {0} does not exist")]
    Range(usize),

    /// The engine task is gone, usually because the process is shutting down.
    #[error("status engine is not running")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
