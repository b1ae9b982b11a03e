//! CAN frame value types
//!
//! A [`CanMessage`] is an immutable value scoped to a single transmission or reception. All of the
//! protocol codecs in this crate produce or consume these.

use crate::traits::CanSendError;

/// COB-ID of the SYNC broadcast frame
pub const SYNC_COB_ID: u16 = 0x080;
/// COB-ID of the TIME broadcast frame
pub const TIME_COB_ID: u16 = 0x100;

/// A CAN identifier, which may be standard (11-bit) or extended (29-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanId {
    /// A standard 11-bit identifier
    Std(u16),
    /// An extended 29-bit identifier
    Extended(u32),
}

impl CanId {
    /// Create a standard ID
    ///
    /// Panics if `raw` does not fit in 11 bits.
    pub fn std(raw: u16) -> Self {
        assert!(raw <= 0x7FF, "standard CAN ID out of range: {raw:#x}");
        CanId::Std(raw)
    }

    /// Create an extended ID
    ///
    /// Panics if `raw` does not fit in 29 bits.
    pub fn extended(raw: u32) -> Self {
        assert!(raw <= 0x1FFF_FFFF, "extended CAN ID out of range: {raw:#x}");
        CanId::Extended(raw)
    }

    /// Get the raw identifier value
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Std(id) => *id as u32,
            CanId::Extended(id) => *id,
        }
    }

    /// Return true if this is an extended ID
    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

impl core::fmt::Display for CanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanId::Std(id) => write!(f, "{id:#05x}"),
            CanId::Extended(id) => write!(f, "{id:#010x}x"),
        }
    }
}

/// A single CAN data frame
///
/// Immutable by convention: it is constructed in one shot and only read afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanMessage {
    /// The frame identifier
    pub id: CanId,
    dlc: u8,
    data: [u8; 8],
    rtr: bool,
}

impl CanMessage {
    /// Create a new data frame
    ///
    /// Payloads longer than 8 bytes are truncated.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(8);
        let mut buf = [0u8; 8];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            rtr: false,
        }
    }

    /// Create a new remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            dlc: 0,
            data: [0; 8],
            rtr: true,
        }
    }

    /// Get the frame identifier
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Get the payload length
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Return true if this is a remote transmission request
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}

impl CanSendError for CanMessage {
    fn into_can_message(self) -> CanMessage {
        self
    }

    fn message(&self) -> String {
        format!("message {} not delivered", self.id)
    }
}

/// Build the SYNC broadcast frame (COB-ID 0x80, no payload)
pub fn sync_frame() -> CanMessage {
    CanMessage::new(CanId::Std(SYNC_COB_ID), &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_truncates_payload() {
        let msg = CanMessage::new(CanId::std(0x123), &[0; 12]);
        assert_eq!(8, msg.dlc());
    }

    #[test]
    fn test_sync_frame() {
        let msg = sync_frame();
        assert_eq!(CanId::Std(0x080), msg.id());
        assert_eq!(0, msg.dlc());
        assert!(msg.data().is_empty());
    }
}
