//! Inbound frame handler registry
//!
//! SDO responses are routed by the object key they echo, PDOs by their COB-ID. The registry is
//! populated before the dispatcher task starts and is never mutated afterwards, which is what
//! lets the dispatcher read it without locking.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use canmotion_common::{pdo, CanMessage, NodeId, ObjectKey};

use crate::device::{Device, DeviceRegistry, RxStamp};
use crate::master::{DuplicatePdoHandlerSnafu, DuplicateSdoHandlerSnafu, MasterError};
use crate::motor::MotorState;

/// Handler for SDO responses carrying a particular object key
///
/// Receives the responding node and the full 8 byte response payload.
pub type SdoHandler = Box<dyn Fn(NodeId, &[u8]) + Send + Sync>;

/// Handler for PDOs received on a particular COB-ID
pub type PdoHandler = Box<dyn Fn(&CanMessage, RxStamp) + Send + Sync>;

/// Routing tables for inbound SDO responses and PDOs
#[derive(Default)]
pub struct HandlerRegistry {
    sdo: HashMap<ObjectKey, SdoHandler>,
    pdo: HashMap<u16, PdoHandler>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a handler for SDO responses echoing `key`
    ///
    /// At most one handler per key; a second registration is an error.
    pub fn register_sdo(&mut self, key: ObjectKey, handler: SdoHandler) -> Result<(), MasterError> {
        if self.sdo.contains_key(&key) {
            return DuplicateSdoHandlerSnafu {
                index: key.index,
                sub: key.sub,
            }
            .fail();
        }
        self.sdo.insert(key, handler);
        Ok(())
    }

    /// Register a handler for PDOs received on `cob`
    ///
    /// At most one handler per COB-ID; a second registration is an error.
    pub fn register_pdo(&mut self, cob: u16, handler: PdoHandler) -> Result<(), MasterError> {
        if self.pdo.contains_key(&cob) {
            return DuplicatePdoHandlerSnafu { cob }.fail();
        }
        self.pdo.insert(cob, handler);
        Ok(())
    }

    pub(crate) fn sdo(&self, key: ObjectKey) -> Option<&SdoHandler> {
        self.sdo.get(&key)
    }

    pub(crate) fn pdo(&self, cob: u16) -> Option<&PdoHandler> {
        self.pdo.get(&cob)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("sdo_keys", &self.sdo.keys().collect::<Vec<_>>())
            .field("pdo_cobs", &self.pdo.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The built-in statusword handler
///
/// Decodes the statusword from bytes 4-5 of the response and updates the device's motor state.
/// Unmapped bit patterns leave the state untouched.
pub(crate) fn statusword_handler(registry: DeviceRegistry) -> SdoHandler {
    Box::new(move |node, data| {
        let Some(device) = registry.get(node) else {
            debug!("Statusword response from unmanaged node {node}");
            return;
        };
        if data.len() < 6 {
            debug!("Short statusword response from node {node}");
            return;
        }
        let statusword = u16::from_le_bytes([data[4], data[5]]);
        match MotorState::from_statusword(statusword) {
            Some(state) => {
                debug!("Node {node} motor state is {state}");
                device.set_motor_state(state);
            }
            None => debug!("Statusword {statusword:#06x} from node {node} maps to no state"),
        }
    })
}

/// The built-in position feedback handler for one device
pub(crate) fn position_pdo_handler(device: Arc<Device>) -> PdoHandler {
    Box::new(move |msg, stamp| {
        match pdo::decode_position(msg) {
            Some(position) => device.apply_position_sample(position, stamp),
            None => debug!("Short feedback PDO from node {}", device.id()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use canmotion_common::constants::object_keys;
    use std::time::Duration;

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn registry_with(ids: &[u8]) -> DeviceRegistry {
        let ids: Vec<NodeId> = ids.iter().map(|&id| node(id)).collect();
        DeviceRegistry::new(&ids, HashMap::new()).unwrap()
    }

    #[test]
    fn test_duplicate_registrations_rejected() {
        let mut handlers = HandlerRegistry::new();
        handlers
            .register_sdo(object_keys::STATUSWORD, Box::new(|_, _| ()))
            .unwrap();
        let err = handlers
            .register_sdo(object_keys::STATUSWORD, Box::new(|_, _| ()))
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::DuplicateSdoHandler {
                index: 0x6041,
                sub: 0
            }
        ));

        handlers.register_pdo(0x183, Box::new(|_, _| ())).unwrap();
        let err = handlers
            .register_pdo(0x183, Box::new(|_, _| ()))
            .unwrap_err();
        assert!(matches!(err, MasterError::DuplicatePdoHandler { cob: 0x183 }));
    }

    #[test]
    fn test_statusword_handler_updates_device() {
        let registry = registry_with(&[6]);
        let handler = statusword_handler(registry.clone());
        let device = registry.get(node(6)).unwrap();

        // Expedited upload response carrying statusword 0x0627 (OperationEnabled)
        handler(node(6), &[0x4B, 0x41, 0x60, 0x00, 0x27, 0x06, 0x00, 0x00]);
        assert_eq!(MotorState::OperationEnabled, device.motor_state());

        // Unmapped pattern leaves the last state standing
        handler(node(6), &[0x4B, 0x41, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(MotorState::OperationEnabled, device.motor_state());
    }

    #[test]
    fn test_position_handler_applies_sample() {
        let registry = registry_with(&[6]);
        let device = registry.get(node(6)).unwrap();
        let handler = position_pdo_handler(device.clone());

        // 57296 mdeg == 1.0 rad in bytes 4-7
        let mut buf = [0u8; 8];
        buf[4..8].copy_from_slice(&57296i32.to_le_bytes());
        let msg = CanMessage::new(canmotion_common::CanId::std(0x186), &buf);
        handler(&msg, RxStamp::from_elapsed(Duration::from_millis(5)));

        assert!(device.initialized());
        assert!((device.motion().position - 1.0).abs() < 1e-4);
    }
}
