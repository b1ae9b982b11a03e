//! Drive profile state machine
//!
//! Drives report their profile state through the statusword, and the master walks them towards a
//! target state by writing controlword commands. The walk is reactive: it polls the statusword,
//! waits for the dispatcher to record the response, and issues the one command appropriate to the
//! state it sees.

use std::time::Duration;

use log::warn;
use tokio_util::sync::CancellationToken;

use canmotion_common::constants::{controlword, object_keys};
use canmotion_common::sdo;
use canmotion_common::traits::AsyncCanSender;

use crate::device::Device;
use crate::master::MasterContext;

/// Delay between the two words of a fault reset
const FAULT_RESET_GAP: Duration = Duration::from_millis(50);
/// Settle time after a fault reset before polling again
const FAULT_RESET_SETTLE: Duration = Duration::from_millis(200);
/// Statusword poll period while driving towards a target state
const POLL_PERIOD: Duration = Duration::from_millis(100);

/// States of the drive profile state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    /// Drive is initializing and not yet accepting commands
    NotReadyToSwitchOn,
    /// Power stage disabled, drive must be shut down before it can switch on
    SwitchedOnDisabled,
    /// Drive is ready to have its power stage enabled
    ReadyToSwitchOn,
    /// Power stage enabled, motion not yet permitted
    SwitchedOn,
    /// Drive is following setpoints
    OperationEnabled,
    /// Drive is executing a quick stop
    QuickStopActive,
    /// Drive has faulted and requires a fault reset
    Fault,
}

impl MotorState {
    /// Decode the profile state from a statusword
    ///
    /// Only bits 0-3, 5 and 6 participate; the rest are mode-specific. Returns None for bit
    /// patterns the profile does not define, in which case the last known state stands.
    pub fn from_statusword(statusword: u16) -> Option<Self> {
        match statusword & 0x006F {
            0x00 | 0x20 => Some(MotorState::NotReadyToSwitchOn),
            0x40 | 0x60 => Some(MotorState::SwitchedOnDisabled),
            0x21 => Some(MotorState::ReadyToSwitchOn),
            0x23 => Some(MotorState::SwitchedOn),
            0x27 => Some(MotorState::OperationEnabled),
            0x07 => Some(MotorState::QuickStopActive),
            0x0F | 0x2F | 0x08 | 0x28 => Some(MotorState::Fault),
            _ => None,
        }
    }
}

impl std::fmt::Display for MotorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MotorState::NotReadyToSwitchOn => "NotReadyToSwitchOn",
            MotorState::SwitchedOnDisabled => "SwitchedOnDisabled",
            MotorState::ReadyToSwitchOn => "ReadyToSwitchOn",
            MotorState::SwitchedOn => "SwitchedOn",
            MotorState::OperationEnabled => "OperationEnabled",
            MotorState::QuickStopActive => "QuickStopActive",
            MotorState::Fault => "Fault",
        };
        f.write_str(s)
    }
}

/// How a drive-to-state walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The drive reported the target state
    Reached,
    /// The bound elapsed before the target state was seen
    TimedOut {
        /// The last state observed
        last: MotorState,
    },
    /// The master was shut down while driving
    Cancelled,
}

/// Walk a drive towards `target` by polling the statusword and issuing controlword commands
///
/// With `bound` of None the walk runs until the target is reached or the master shuts down. Send
/// failures are logged and the walk keeps going; a drive that stays silent simply never advances.
pub(crate) async fn drive_to_target<S: AsyncCanSender>(
    ctx: &MasterContext<S>,
    device: &Device,
    target: MotorState,
    bound: Option<Duration>,
    cancel: &CancellationToken,
) -> DriveOutcome {
    let node = device.id();
    let deadline = bound.map(|b| tokio::time::Instant::now() + b);

    loop {
        let current = device.motor_state();
        if current == target {
            return DriveOutcome::Reached;
        }
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                return DriveOutcome::TimedOut { last: current };
            }
        }
        if cancel.is_cancelled() {
            return DriveOutcome::Cancelled;
        }

        // Poll the statusword, then give the response time to land via the dispatcher before
        // acting on the recorded state
        send_logged(ctx, sdo::upload_request(node, object_keys::STATUSWORD)).await;
        tokio::select! {
            _ = cancel.cancelled() => return DriveOutcome::Cancelled,
            _ = tokio::time::sleep(POLL_PERIOD) => (),
        }

        let observed = device.motor_state();
        if observed == target {
            return DriveOutcome::Reached;
        }
        match observed {
            MotorState::Fault => {
                // Fault reset requires a rising edge on controlword bit 7
                write_controlword(ctx, device, controlword::FAULT_RESET_0).await;
                tokio::time::sleep(FAULT_RESET_GAP).await;
                write_controlword(ctx, device, controlword::FAULT_RESET_1).await;
                tokio::time::sleep(FAULT_RESET_SETTLE).await;
            }
            MotorState::SwitchedOnDisabled => {
                write_controlword(ctx, device, controlword::SHUTDOWN).await;
            }
            MotorState::ReadyToSwitchOn => {
                write_controlword(ctx, device, controlword::SWITCH_ON).await;
            }
            MotorState::SwitchedOn => {
                write_controlword(ctx, device, controlword::ENABLE_OPERATION).await;
            }
            _ => (),
        }
    }
}

async fn write_controlword<S: AsyncCanSender>(ctx: &MasterContext<S>, device: &Device, value: u16) {
    send_logged(
        ctx,
        sdo::download_request(device.id(), object_keys::CONTROLWORD, value.into()),
    )
    .await;
}

async fn send_logged<S: AsyncCanSender>(
    ctx: &MasterContext<S>,
    msg: canmotion_common::CanMessage,
) {
    if let Err(e) = ctx.send(msg).await {
        warn!("Failed to send frame: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statusword_mapping() {
        let cases = [
            (0x0000, Some(MotorState::NotReadyToSwitchOn)),
            (0x0020, Some(MotorState::NotReadyToSwitchOn)),
            (0x0040, Some(MotorState::SwitchedOnDisabled)),
            (0x0060, Some(MotorState::SwitchedOnDisabled)),
            (0x0021, Some(MotorState::ReadyToSwitchOn)),
            (0x0023, Some(MotorState::SwitchedOn)),
            (0x0027, Some(MotorState::OperationEnabled)),
            (0x0007, Some(MotorState::QuickStopActive)),
            (0x000F, Some(MotorState::Fault)),
            (0x002F, Some(MotorState::Fault)),
            (0x0008, Some(MotorState::Fault)),
            (0x0028, Some(MotorState::Fault)),
        ];
        for (word, expected) in cases {
            assert_eq!(expected, MotorState::from_statusword(word), "word {word:#06x}");
        }
    }

    #[test]
    fn test_statusword_ignores_mode_bits() {
        // Bits outside the mask must not change the decoded state
        assert_eq!(
            Some(MotorState::OperationEnabled),
            MotorState::from_statusword(0x1637)
        );
    }

    #[test]
    fn test_statusword_unmapped_patterns() {
        for word in [0x0001u16, 0x0003, 0x0043, 0x006F] {
            assert_eq!(None, MotorState::from_statusword(word), "word {word:#06x}");
        }
    }
}
