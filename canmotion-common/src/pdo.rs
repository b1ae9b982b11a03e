//! Fixed-layout PDO codec for the drive profile
//!
//! The master sends one setpoint RPDO per drive per sync period, and drives answer with a position
//! TPDO of the same fixed layout. No PDO mapping configuration is modeled; both layouts are those
//! of the drive's default mapping.

use crate::constants::controlword;
use crate::messages::{CanId, CanMessage};
use crate::node_id::NodeId;
use crate::units::{mdeg_to_rad, rad_to_mdeg};

/// Base COB-ID for the setpoint RPDO; a node's setpoint channel is `0x200 + node_id`
pub const SETPOINT_COB_BASE: u16 = 0x200;
/// Base COB-ID of the first transmit PDO; a node's position feedback arrives on `0x180 + node_id`
pub const FEEDBACK_COB_BASE: u16 = 0x180;

/// Encode the setpoint PDO for a drive
///
/// Layout: bytes 0-1 carry the controlword (enable-operation OR'd with the interpolated position
/// mode bit) little-endian, bytes 2-3 are reserved zero, and bytes 4-7 carry the desired position
/// as signed little-endian millidegrees.
pub fn setpoint_frame(node: NodeId, desired_pos_rad: f64) -> CanMessage {
    const SETPOINT_CONTROLWORD: u16 =
        controlword::ENABLE_OPERATION | controlword::ENABLE_IP_MODE;

    let mut buf = [0u8; 8];
    buf[0..2].copy_from_slice(&SETPOINT_CONTROLWORD.to_le_bytes());
    buf[4..8].copy_from_slice(&rad_to_mdeg(desired_pos_rad).to_le_bytes());
    CanMessage::new(
        CanId::Std(SETPOINT_COB_BASE + node.raw() as u16),
        &buf,
    )
}

/// Decode the position carried in bytes 4-7 of a feedback PDO, in radians
///
/// Returns None if the frame is too short to carry one.
pub fn decode_position(msg: &CanMessage) -> Option<f64> {
    let data = msg.data();
    if data.len() < 8 {
        return None;
    }
    let mdeg = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    Some(mdeg_to_rad(mdeg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::MDEG_STEP_RAD;

    #[test]
    fn test_setpoint_layout() {
        let msg = setpoint_frame(NodeId::new(5).unwrap(), 1.0);
        assert_eq!(CanId::Std(0x205), msg.id());
        assert_eq!(8, msg.dlc());
        let data = msg.data();
        // Controlword 0x001F little-endian
        assert_eq!([0x1F, 0x00], data[0..2]);
        // Reserved bytes
        assert_eq!([0, 0], data[2..4]);
        // 1.0 rad == 57296 millidegrees
        assert_eq!(57296i32.to_le_bytes(), data[4..8]);
    }

    #[test]
    fn test_position_round_trip() {
        let node = NodeId::new(9).unwrap();
        for &p in &[0.0, 1.0, -1.5, 3.04] {
            let msg = setpoint_frame(node, p);
            let decoded = decode_position(&msg).unwrap();
            assert!((decoded - p).abs() <= MDEG_STEP_RAD);
        }
    }

    #[test]
    fn test_decode_short_frame() {
        let msg = CanMessage::new(CanId::std(0x185), &[0; 4]);
        assert_eq!(None, decode_position(&msg));
    }
}
