//! Test utilities: a scripted drive simulator and frame capture helpers

use std::sync::{Arc, Mutex};

use canmotion_common::constants::object_keys;
use canmotion_common::messages::{CanId, CanMessage};
use canmotion_common::pdo::FEEDBACK_COB_BASE;
use canmotion_common::sdo::{ObjectKey, SDO_REQUEST_BASE, SDO_RESPONSE_BASE};
use canmotion_common::traits::{AsyncCanReceiver, AsyncCanSender};
use canmotion_common::NodeId;

use crate::sim_bus::{SimBus, SimBusReceiver};

/// Statuswords reported by the simulated drive, one per profile state it models
pub mod statuswords {
    pub const NOT_READY: u16 = 0x0000;
    pub const SWITCHED_ON_DISABLED: u16 = 0x0040;
    pub const READY_TO_SWITCH_ON: u16 = 0x0021;
    pub const SWITCHED_ON: u16 = 0x0023;
    pub const OPERATION_ENABLED: u16 = 0x0027;
    pub const FAULT: u16 = 0x0008;
}

pub struct SimDriveState {
    pub statusword: u16,
    pub controlwords: Vec<u16>,
}

/// Handle to a running simulated drive
#[derive(Clone)]
pub struct SimDriveHandle {
    state: Arc<Mutex<SimDriveState>>,
}

impl SimDriveHandle {
    /// Every controlword the master has written so far, in order
    pub fn controlwords(&self) -> Vec<u16> {
        self.state.lock().unwrap().controlwords.clone()
    }

    pub fn clear_controlwords(&self) {
        self.state.lock().unwrap().controlwords.clear();
    }

    /// Force the drive into a state, e.g. to simulate a fault
    pub fn set_statusword(&self, word: u16) {
        self.state.lock().unwrap().statusword = word;
    }
}

/// Spawn a simulated drive on the bus
///
/// It answers statusword uploads with its current statusword, acknowledges every download, and
/// applies controlword writes to its state machine. It keeps running until the bus is dropped.
pub fn spawn_sim_drive(bus: &SimBus, node: NodeId, statusword: u16) -> SimDriveHandle {
    let state = Arc::new(Mutex::new(SimDriveState {
        statusword,
        controlwords: Vec::new(),
    }));
    let handle = SimDriveHandle {
        state: state.clone(),
    };
    let (mut sender, mut receiver) = bus.endpoint();
    let request_cob = CanId::std(SDO_REQUEST_BASE + node.raw() as u16);
    let response_cob = CanId::std(SDO_RESPONSE_BASE + node.raw() as u16);

    tokio::spawn(async move {
        while let Ok(msg) = receiver.recv().await {
            if msg.id() != request_cob {
                continue;
            }
            let data = msg.data();
            let Some(key) = ObjectKey::from_response_bytes(data) else {
                continue;
            };
            match data[0] {
                // Upload request: answer statusword reads, ignore the rest
                0x40 if key == object_keys::STATUSWORD => {
                    let word = state.lock().unwrap().statusword;
                    let [lo, hi] = word.to_le_bytes();
                    let reply = [0x4B, data[1], data[2], data[3], lo, hi, 0, 0];
                    sender
                        .send(CanMessage::new(response_cob, &reply))
                        .await
                        .ok();
                }
                // Expedited download: apply controlwords, acknowledge everything
                0x23 | 0x2B | 0x2F => {
                    if key == object_keys::CONTROLWORD && data.len() >= 6 {
                        let cw = u16::from_le_bytes([data[4], data[5]]);
                        let mut state = state.lock().unwrap();
                        state.controlwords.push(cw);
                        match cw {
                            0x0006 => state.statusword = statuswords::READY_TO_SWITCH_ON,
                            0x0007 => state.statusword = statuswords::SWITCHED_ON,
                            0x000F => state.statusword = statuswords::OPERATION_ENABLED,
                            // Rising edge of the fault reset
                            0x0080 => state.statusword = statuswords::SWITCHED_ON_DISABLED,
                            _ => (),
                        }
                    }
                    let reply = [0x60, data[1], data[2], data[3], 0, 0, 0, 0];
                    sender
                        .send(CanMessage::new(response_cob, &reply))
                        .await
                        .ok();
                }
                _ => (),
            }
        }
    });
    handle
}

/// Build a position feedback PDO as a drive would publish it
pub fn feedback_frame(node: NodeId, mdeg: i32) -> CanMessage {
    let mut buf = [0u8; 8];
    buf[4..8].copy_from_slice(&mdeg.to_le_bytes());
    CanMessage::new(CanId::std(FEEDBACK_COB_BASE + node.raw() as u16), &buf)
}

/// Collect frames from a receiver until `syncs` SYNC frames have been seen
///
/// Returns everything collected, SYNC frames included. Callers should wrap this in a timeout.
pub async fn collect_until_syncs(receiver: &mut SimBusReceiver, syncs: usize) -> Vec<CanMessage> {
    let mut frames = Vec::new();
    let mut seen = 0;
    while seen < syncs {
        let Ok(msg) = receiver.recv().await else {
            break;
        };
        if msg.id() == CanId::Std(0x080) {
            seen += 1;
        }
        frames.push(msg);
    }
    frames
}
