//! A CANopen master for commanding motor drives in interpolated position mode.
//!
//! The master owns a set of drives on one CAN bus and runs two background tasks over a shared
//! transport: a dispatcher that routes every inbound frame to per-object and per-COB handlers,
//! and a synchronizer that sends each drive a position setpoint followed by a SYNC every period.
//! On top of those it offers SDO access, NMT control, and a statusword-driven walk of the drive
//! profile state machine.
//!
//! ```no_run
//! use canmotion_master::{MasterBuilder, MasterConfig};
//! use canmotion_common::NodeId;
//!
//! # async fn example() -> Result<(), canmotion_master::MasterError> {
//! let master = MasterBuilder::new(MasterConfig::default())
//!     .add_device(NodeId::new(1).unwrap())
//!     .add_device(NodeId::new(2).unwrap())
//!     .connect("can0")?;
//! master.initialize().await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod config;
pub mod device;
pub mod dispatch;
pub mod handlers;
pub mod master;
pub mod motor;
pub mod sdo_client;
mod sync_loop;
pub mod trajectory;

pub use canmotion_common as common;

pub use config::MasterConfig;
pub use device::{Device, DeviceRegistry, MotionSample, RxStamp};
pub use master::{Master, MasterBuilder, MasterError};
pub use motor::{DriveOutcome, MotorState};
pub use sdo_client::SdoClient;
pub use trajectory::{HoldPosition, Trajectory};
