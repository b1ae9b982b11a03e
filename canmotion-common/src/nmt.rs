//! Definitions for the NMT protocol

use int_enum::IntEnum;

use crate::messages::{CanId, CanMessage};

/// COB-ID of NMT command frames (always 0)
pub const NMT_COMMAND_COB_ID: u16 = 0x000;
/// Base COB-ID for NMT error control (heartbeat/bootup); a node reports on `0x700 + node_id`
pub const NMT_ERROR_CONTROL_BASE: u16 = 0x700;
/// Node address used to target all nodes with one NMT command
pub const NMT_BROADCAST: u8 = 0;

/// Command specifiers for the NMT master service
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommandSpecifier {
    /// Command a node into the Operational state
    Start = 0x01,
    /// Command a node into the Stopped state
    Stop = 0x02,
    /// Command a node into the PreOperational state
    EnterPreOperational = 0x80,
    /// Reset the node application
    ResetNode = 0x81,
    /// Reset the node communication parameters
    ResetComm = 0x82,
}

/// Possible NMT states reported by a node via error control
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum NmtState {
    /// Bootup
    ///
    /// A node never remains in this state; it transitions automatically into PreOperational
    Bootup = 0,
    /// Node has been stopped
    Stopped = 4,
    /// Normal operational state
    Operational = 5,
    /// Node is awaiting command to enter operation
    PreOperational = 127,
}

impl core::fmt::Display for NmtState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NmtState::Bootup => write!(f, "Bootup"),
            NmtState::Stopped => write!(f, "Stopped"),
            NmtState::Operational => write!(f, "Operational"),
            NmtState::PreOperational => write!(f, "PreOperational"),
        }
    }
}

/// Build an NMT command frame
///
/// NMT commands are always sent on COB-ID 0 with a 2 byte payload: the command specifier followed
/// by the target node ID, where node 0 addresses every node on the bus.
pub fn command_frame(specifier: NmtCommandSpecifier, node: u8) -> CanMessage {
    CanMessage::new(
        CanId::Std(NMT_COMMAND_COB_ID),
        &[specifier as u8, node],
    )
}

/// The content of an NMT error control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorControlReport {
    /// The node announced it has booted
    Bootup,
    /// A heartbeat carrying the node's current NMT state
    Heartbeat {
        /// The reported state
        state: NmtState,
    },
    /// A heartbeat whose state byte is not a recognized NMT state
    Unknown {
        /// The raw state byte
        raw: u8,
    },
}

/// Interpret the payload of a frame received on an NMT error control COB-ID
///
/// A zero first byte is a bootup announcement; any other value is a heartbeat or error report.
/// An empty payload yields None.
pub fn parse_error_control(data: &[u8]) -> Option<ErrorControlReport> {
    let byte = *data.first()?;
    if byte == 0 {
        return Some(ErrorControlReport::Bootup);
    }
    // Mask off the heartbeat toggle bit
    match NmtState::try_from(byte & 0x7F) {
        Ok(state) => Some(ErrorControlReport::Heartbeat { state }),
        Err(_) => Some(ErrorControlReport::Unknown { raw: byte }),
    }
}
