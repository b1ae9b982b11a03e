//! Inbound frame dispatcher
//!
//! A single task drains the receiver, classifies each frame by COB-ID, and fans it out to the
//! handler tables. Nothing in here is allowed to kill the loop: malformed frames, unknown
//! COB-IDs, and receive errors are all logged and skipped.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use canmotion_common::nmt::{self, ErrorControlReport};
use canmotion_common::sdo::SDO_RESPONSE_BASE;
use canmotion_common::traits::{AsyncCanReceiver, AsyncCanSender};
use canmotion_common::{CanId, CanMessage, NodeId, ObjectKey};

use crate::master::MasterContext;

/// Classification of a standard-frame COB-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// SYNC
    Sync,
    /// Emergency frame from a node
    Emcy {
        /// Emitting node ID
        node: u8,
    },
    /// TIME stamp frame
    Time,
    /// A PDO, routed by its full COB-ID
    Pdo {
        /// The COB-ID
        cob: u16,
    },
    /// SDO server response
    SdoResponse {
        /// Responding node ID
        node: u8,
    },
    /// NMT error control (bootup or heartbeat)
    NmtErrorControl {
        /// Reporting node ID
        node: u8,
    },
    /// Anything else
    Unknown,
}

/// Classify a standard CAN ID into its CANopen function
pub fn classify(id: u16) -> FrameClass {
    match id {
        0x080 => FrameClass::Sync,
        0x081..=0x0FF => FrameClass::Emcy {
            node: (id - 0x080) as u8,
        },
        0x100 => FrameClass::Time,
        0x180..=0x4FF => FrameClass::Pdo { cob: id },
        0x580..=0x5FF => FrameClass::SdoResponse {
            node: (id - SDO_RESPONSE_BASE) as u8,
        },
        0x700..=0x7FF => FrameClass::NmtErrorControl {
            node: (id - nmt::NMT_ERROR_CONTROL_BASE) as u8,
        },
        _ => FrameClass::Unknown,
    }
}

/// Dispatcher task body: drain the receiver until cancelled
pub(crate) async fn run<S, R>(
    ctx: Arc<MasterContext<S>>,
    mut receiver: R,
    cancel: CancellationToken,
) where
    S: AsyncCanSender,
    R: AsyncCanReceiver,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            res = receiver.recv() => match res {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("CAN receive failed: {e:?}");
                    continue;
                }
            },
        };
        handle_frame(&ctx, &msg);
    }
    debug!("Dispatcher task exited");
}

fn handle_frame<S: AsyncCanSender>(ctx: &MasterContext<S>, msg: &CanMessage) {
    let CanId::Std(id) = msg.id() else {
        debug!("Ignoring extended frame {}", msg.id());
        return;
    };
    match classify(id) {
        FrameClass::Sync => debug!("SYNC received"),
        FrameClass::Emcy { node } => {
            warn!("EMCY from node {node}: {:02X?}", msg.data());
        }
        FrameClass::Time => debug!("TIME received"),
        FrameClass::Pdo { cob } => match ctx.handlers.pdo(cob) {
            Some(handler) => handler(msg, ctx.stamp()),
            None => debug!("No handler for PDO {cob:#x}"),
        },
        FrameClass::SdoResponse { node } => handle_sdo_response(ctx, node, msg),
        FrameClass::NmtErrorControl { node } => handle_error_control(ctx, node, msg),
        FrameClass::Unknown => debug!("Unknown COB-ID {id:#x}"),
    }
}

fn handle_sdo_response<S: AsyncCanSender>(ctx: &MasterContext<S>, node: u8, msg: &CanMessage) {
    let Ok(node) = NodeId::new(node) else {
        debug!("SDO response on reserved COB-ID {:#x}", SDO_RESPONSE_BASE);
        return;
    };
    let Some(key) = ObjectKey::from_response_bytes(msg.data()) else {
        debug!("Short SDO response from node {node}");
        return;
    };
    match ctx.handlers.sdo(key) {
        Some(handler) => handler(node, msg.data()),
        None => debug!("No handler for SDO response {key} from node {node}"),
    }
}

fn handle_error_control<S: AsyncCanSender>(ctx: &MasterContext<S>, node: u8, msg: &CanMessage) {
    match nmt::parse_error_control(msg.data()) {
        Some(ErrorControlReport::Bootup) => {
            info!("Bootup received. Node ID = {node}");
            if let Some(device) = NodeId::new(node).ok().and_then(|n| ctx.registry.get(n)) {
                device.set_nmt_state(nmt::NmtState::Bootup);
            }
        }
        Some(ErrorControlReport::Heartbeat { state }) => {
            debug!("Heartbeat from node {node}: {state}");
            if let Some(device) = NodeId::new(node).ok().and_then(|n| ctx.registry.get(n)) {
                device.set_nmt_state(state);
            }
        }
        Some(ErrorControlReport::Unknown { raw }) => {
            warn!("Heartbeat from node {node} with unrecognized state {raw:#x}");
        }
        None => debug!("Empty NMT error control frame from node {node}"),
    }
}
