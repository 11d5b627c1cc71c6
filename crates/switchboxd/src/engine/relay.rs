//! Relay reads and switch commands on top of the status cache.

use tracing::error;
use tracing::info;

use super::engine::Engine;
use super::state::check_relay;
use crate::error::Result;
use crate::transport::Method;

impl Engine {
    /// Whether `relay` is on, from cache or a fresh fetch.
    pub async fn read(&self, relay: usize) -> Result<bool> {
        let relay = check_relay(relay)?;
        let record = self.get_status(false).await?;
        Ok(record.relay(relay)?.on)
    }

    /// Switch `relay` on or off.
    ///
    /// The command bypasses the waiter queue. When the device echoes its new
    /// state that record replaces the cache; otherwise a forced refresh is
    /// queued before returning, so a following read observes the new state.
    ///
    /// On failure the cache is invalidated right away and the error is held
    /// back for the configured delay, so a retrying host does not hammer a
    /// device that may be rebooting. A forced refresh follows the delay.
    pub async fn write(&self, relay: usize, on: bool) -> Result<()> {
        let relay = check_relay(relay)?;
        let url = self.device.command_url(relay, on);
        info!("Switching relay {} {}", relay, if on { "on" } else { "off" });

        match self.transport.send(Method::Get, &url, None).await {
            Ok(Some(record)) => {
                self.adopt(record);
                self.refresh(false);
                Ok(())
            }
            Ok(None) => {
                self.refresh(true);
                Ok(())
            }
            Err(e) => {
                error!("Failed to switch relay {}: {}", relay, e);
                self.invalidate();
                tokio::time::sleep(self.write_failure_delay).await;
                // The host may already show the requested state; push the real one
                self.refresh(true);
                Err(e)
            }
        }
    }
}
