//! Common protocol types shared among the canmotion crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `canmotion-master`.
#![warn(missing_docs)]

pub mod constants;
pub mod messages;
pub mod nmt;
pub mod node_id;
pub mod pdo;
pub mod sdo;
pub mod traits;
pub mod units;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use socketcan::{open_socketcan, SocketCanReceiver, SocketCanSender};

pub use messages::{CanId, CanMessage};
pub use node_id::NodeId;
pub use sdo::ObjectKey;
