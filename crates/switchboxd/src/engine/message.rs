//! Messages handled by the status engine task.
//!
//! Every state change of the cache goes through one of these, so the engine
//! task is the only writer of the cache, the waiter queue and the timer.

use tokio::sync::oneshot;

use super::state::StatusRecord;
use crate::error::Result;

/// Where the outcome of a status request is delivered.
///
/// `None` for fire-and-forget refreshes (timer, notifications, writes).
pub(super) type Waiter = Option<oneshot::Sender<Result<StatusRecord>>>;

#[derive(Debug)]
pub(super) enum EngineMessage {
    /// Read the status, from cache or by joining/starting a fetch
    GetStatus { forced: bool, waiter: Waiter },

    /// Make the next status request bypass the cache
    Invalidate,

    /// Replace the cache with a record echoed by a switch command
    Adopt { record: StatusRecord },

    /// The in-flight fetch finished
    FetchCompleted { result: Result<StatusRecord> },

    /// A scheduled refresh is due
    TimerFired { generation: u64 },
}
