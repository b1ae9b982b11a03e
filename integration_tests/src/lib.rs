pub mod sim_bus;
pub mod utils;

pub mod prelude {
    pub use super::sim_bus::{SimBus, SimBusReceiver, SimBusSender};
    pub use super::utils::{
        collect_until_syncs, feedback_frame, spawn_sim_drive, statuswords, SimDriveHandle,
    };
    pub use canmotion_common::traits::{AsyncCanReceiver, AsyncCanSender};
    pub use canmotion_common::{CanId, CanMessage, NodeId};
    pub use canmotion_master::{
        DriveOutcome, Master, MasterBuilder, MasterConfig, MasterError, MotorState,
    };
}
