//! Setpoint generation strategy
//!
//! Each sync period the synchronizer asks the trajectory for the next desired position of every
//! initialized device. Applications plug in their own interpolator by implementing [`Trajectory`];
//! the default [`HoldPosition`] commands every drive to hold its last desired position.

use std::time::Duration;

use crate::device::Device;

/// Computes the next position setpoint for a device
///
/// Called from the synchronizer task once per device per sync period, so implementations must be
/// thread-safe and should return quickly.
pub trait Trajectory: Send + Sync {
    /// The position to command next, in radians
    fn next_setpoint(&self, device: &Device, period: Duration) -> f64;
}

/// The default trajectory: repeat the current desired position
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldPosition;

impl Trajectory for HoldPosition {
    fn next_setpoint(&self, device: &Device, _period: Duration) -> f64 {
        device.desired_pos()
    }
}
