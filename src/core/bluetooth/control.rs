//! Control port for the load switch
//! Validated command submission routed through the session's link token.

use std::sync::Arc;

use log::info;

use crate::core::bluetooth::codec;
use crate::core::bluetooth::session::SessionShared;
use crate::core::bluetooth::types::{ControlCommand, SessionState, SolarCharacteristic};
use crate::error::ControlError;

/// Handle for submitting [`ControlCommand`]s to a live session.
#[derive(Clone)]
pub struct ControlPort {
    pub(crate) shared: Arc<SessionShared>,
}

impl ControlPort {
    /// Send a command to the device.
    ///
    /// Requires the session to be `Connected`; commands are never queued.
    /// Acquires the same link token the update batch holds, so a write is
    /// issued strictly before or strictly after a batch, never inside
    /// one. The write is fire-and-forget: the next update cycle is the
    /// source of truth for `load_active`.
    pub async fn submit(&self, command: ControlCommand) -> Result<(), ControlError> {
        if self.shared.state() != SessionState::Connected {
            return Err(ControlError::NotConnected);
        }

        let _link = self.shared.link.lock().await;
        // The link may have dropped while waiting for the token.
        if self.shared.state() != SessionState::Connected {
            return Err(ControlError::NotConnected);
        }

        let payload = codec::encode_command(command);
        info!("Sending {:?} to {}", command, self.shared.identity.name);
        let target = SolarCharacteristic::TriggerLoad;
        self.shared
            .bounded(self.shared.transport.write_no_response(
                &self.shared.identity,
                target.service_uuid(),
                target.uuid(),
                &payload,
            ))
            .await?;
        Ok(())
    }
}
