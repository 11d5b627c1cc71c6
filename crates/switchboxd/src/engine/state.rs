use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// Number of relays on a switchbox.
pub const RELAY_COUNT: usize = 2;

/// State of a single relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayState {
    /// Relay index on the device.
    pub id: usize,

    /// Whether the relay is switched on.
    pub on: bool,
}

/// Snapshot of every relay as reported by the device.
///
/// A record is never modified after decoding. Newer fetches replace it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStatus")]
pub struct StatusRecord {
    relays: [RelayState; RELAY_COUNT],
}

/// Wire shape of `/api/relay/state`: `{"relays": [{"state": 0|1}, ...]}`.
///
/// The device sends more fields per relay (name, stateAfterRestart, ...)
/// which are ignored.
#[derive(Deserialize)]
struct RawStatus {
    relays: Vec<RawRelay>,
}

#[derive(Deserialize)]
struct RawRelay {
    state: i64,
}

impl TryFrom<RawStatus> for StatusRecord {
    type Error = String;

    fn try_from(raw: RawStatus) -> std::result::Result<Self, Self::Error> {
        if raw.relays.len() != RELAY_COUNT {
            return Err(format!(
                "expected {} relays, got {}",
                RELAY_COUNT,
                raw.relays.len()
            ));
        }

        let relays = std::array::from_fn(|id| RelayState {
            id,
            on: raw.relays[id].state == 1,
        });
        Ok(Self { relays })
    }
}

impl StatusRecord {
    /// Build a record from on/off values, indexed by relay id.
    pub fn from_states(states: [bool; RELAY_COUNT]) -> Self {
        Self {
            relays: std::array::from_fn(|id| RelayState { id, on: states[id] }),
        }
    }

    pub fn relays(&self) -> &[RelayState; RELAY_COUNT] {
        &self.relays
    }

    /// Look up one relay, failing with [`Error::Range`] for unknown ids.
    pub fn relay(&self, id: usize) -> Result<RelayState> {
        self.relays.get(id).copied().ok_or(Error::Range(id))
    }
}

/// Reject relay ids the device does not have.
pub fn check_relay(id: usize) -> Result<usize> {
    if id < RELAY_COUNT {
        Ok(id)
    } else {
        Err(Error::Range(id))
    }
}
