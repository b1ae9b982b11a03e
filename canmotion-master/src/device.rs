//! Per-node device state
//!
//! A [`Device`] holds everything the master tracks about one drive: the latest motion sample, the
//! desired position fed to the setpoint PDO, the drive profile state, and the last NMT state seen
//! via heartbeat. All of it is updated concurrently by the dispatcher task while the synchronizer
//! and application tasks read it, so each field is independently synchronized.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canmotion_common::nmt::NmtState;
use canmotion_common::NodeId;

use crate::master::{DuplicateDeviceSnafu, MasterError};
use crate::motor::MotorState;

/// Timestamp of a received frame, relative to the master's epoch
///
/// Stored as a coarse millisecond count plus the sub-millisecond remainder in microseconds, which
/// is the resolution velocity estimation works at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStamp {
    /// Whole milliseconds since the epoch
    pub millis: u64,
    /// Microseconds within the current millisecond (0..1000)
    pub micros: u16,
}

impl RxStamp {
    /// Build a stamp from a duration since the epoch
    pub fn from_elapsed(elapsed: Duration) -> Self {
        let micros = elapsed.as_micros();
        Self {
            millis: (micros / 1000) as u64,
            micros: (micros % 1000) as u16,
        }
    }

    /// Seconds elapsed from `earlier` to this stamp
    pub fn seconds_since(&self, earlier: &RxStamp) -> f64 {
        let this = self.millis as f64 * 1e-3 + self.micros as f64 * 1e-6;
        let that = earlier.millis as f64 * 1e-3 + earlier.micros as f64 * 1e-6;
        this - that
    }
}

/// The motion state of a drive as of its most recent feedback PDO
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionSample {
    /// Actual position in radians
    pub position: f64,
    /// Estimated velocity in radians per second
    pub velocity: f64,
    /// When the sample was received, None until the first feedback PDO arrives
    pub stamp: Option<RxStamp>,
}

/// State tracked for a single drive on the bus
#[derive(Debug)]
pub struct Device {
    id: NodeId,
    motion: Mutex<MotionSample>,
    /// Desired position in radians, stored as f64 bits
    desired_pos: AtomicU64,
    initialized: AtomicBool,
    motor_state: Mutex<MotorState>,
    nmt_state: Mutex<Option<NmtState>>,
}

impl Device {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            motion: Mutex::new(MotionSample::default()),
            desired_pos: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
            motor_state: Mutex::new(MotorState::NotReadyToSwitchOn),
            nmt_state: Mutex::new(None),
        }
    }

    /// The node ID of this drive
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The latest motion sample
    pub fn motion(&self) -> MotionSample {
        *self.motion.lock().unwrap()
    }

    /// Record a position sample from a feedback PDO
    ///
    /// Velocity is estimated as the position delta over the stamp delta once two samples exist.
    /// The first valid sample also seeds the desired position with the actual position and marks
    /// the device initialized, so the synchronizer starts out commanding the drive to hold still.
    pub fn apply_position_sample(&self, position: f64, stamp: RxStamp) {
        let mut motion = self.motion.lock().unwrap();
        if let Some(prev) = motion.stamp {
            let dt = stamp.seconds_since(&prev);
            if dt > 0.0 {
                motion.velocity = (position - motion.position) / dt;
            }
        } else {
            self.set_desired_pos(position);
            self.initialized.store(true, Ordering::SeqCst);
        }
        motion.position = position;
        motion.stamp = Some(stamp);
    }

    /// Whether the first feedback PDO has been seen
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The position currently commanded to the drive, in radians
    pub fn desired_pos(&self) -> f64 {
        f64::from_bits(self.desired_pos.load(Ordering::SeqCst))
    }

    /// Set the position to command to the drive, in radians
    pub fn set_desired_pos(&self, pos: f64) {
        self.desired_pos.store(pos.to_bits(), Ordering::SeqCst);
    }

    /// The drive profile state as of the last statusword response
    pub fn motor_state(&self) -> MotorState {
        *self.motor_state.lock().unwrap()
    }

    pub(crate) fn set_motor_state(&self, state: MotorState) {
        *self.motor_state.lock().unwrap() = state;
    }

    /// The NMT state last reported by the node, None until a heartbeat is seen
    pub fn nmt_state(&self) -> Option<NmtState> {
        *self.nmt_state.lock().unwrap()
    }

    pub(crate) fn set_nmt_state(&self, state: NmtState) {
        *self.nmt_state.lock().unwrap() = Some(state);
    }
}

/// The set of devices the master manages, plus named groups of them
///
/// Built once before the dispatcher starts and never mutated afterwards; cloning is cheap and
/// yields a handle to the same devices. Iteration is in ascending node ID order.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Arc<BTreeMap<u8, Arc<Device>>>,
    groups: Arc<HashMap<String, Vec<NodeId>>>,
}

impl DeviceRegistry {
    pub(crate) fn new(
        ids: &[NodeId],
        groups: HashMap<String, Vec<NodeId>>,
    ) -> Result<Self, MasterError> {
        let mut devices = BTreeMap::new();
        for &id in ids {
            if devices
                .insert(id.raw(), Arc::new(Device::new(id)))
                .is_some()
            {
                return DuplicateDeviceSnafu { node: id.raw() }.fail();
            }
        }
        Ok(Self {
            devices: Arc::new(devices),
            groups: Arc::new(groups),
        })
    }

    /// Look up a device by node ID
    pub fn get(&self, node: NodeId) -> Option<Arc<Device>> {
        self.devices.get(&node.raw()).cloned()
    }

    /// Iterate all devices in ascending node ID order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if the registry holds no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// The devices belonging to a named group, in the order they were listed
    ///
    /// Returns None for an unknown group name. Group members without a matching device are
    /// silently skipped.
    pub fn group(&self, name: &str) -> Option<Vec<Arc<Device>>> {
        let members = self.groups.get(name)?;
        Some(members.iter().filter_map(|&id| self.get(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_stamp_seconds_since() {
        let a = RxStamp {
            millis: 100,
            micros: 250,
        };
        let b = RxStamp {
            millis: 120,
            micros: 750,
        };
        assert!((b.seconds_since(&a) - 0.0205).abs() < 1e-9);
    }

    #[test]
    fn test_first_sample_seeds_desired_pos() {
        let dev = Device::new(node(4));
        assert!(!dev.initialized());

        dev.apply_position_sample(1.25, RxStamp::from_elapsed(Duration::from_millis(10)));
        assert!(dev.initialized());
        assert_eq!(1.25, dev.desired_pos());
        // First sample has no predecessor to estimate velocity from
        assert_eq!(0.0, dev.motion().velocity);
    }

    #[test]
    fn test_velocity_estimate() {
        let dev = Device::new(node(4));
        dev.apply_position_sample(1.0, RxStamp::from_elapsed(Duration::from_millis(10)));
        dev.apply_position_sample(1.1, RxStamp::from_elapsed(Duration::from_millis(110)));

        let motion = dev.motion();
        assert_eq!(1.1, motion.position);
        assert!((motion.velocity - 1.0).abs() < 1e-9);
        // A later sample must not re-seed the desired position
        dev.set_desired_pos(2.0);
        dev.apply_position_sample(1.2, RxStamp::from_elapsed(Duration::from_millis(210)));
        assert_eq!(2.0, dev.desired_pos());
    }

    #[test]
    fn test_registry_order_and_groups() {
        let mut groups = HashMap::new();
        groups.insert("arm".to_string(), vec![node(7), node(3)]);
        let registry =
            DeviceRegistry::new(&[node(7), node(3), node(12)], groups).unwrap();

        let order: Vec<u8> = registry.iter().map(|d| d.id().raw()).collect();
        assert_eq!(vec![3, 7, 12], order);

        let arm = registry.group("arm").unwrap();
        assert_eq!(
            vec![7, 3],
            arm.iter().map(|d| d.id().raw()).collect::<Vec<_>>()
        );
        assert!(registry.group("leg").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = DeviceRegistry::new(&[node(3), node(3)], HashMap::new()).unwrap_err();
        assert!(matches!(err, MasterError::DuplicateDevice { node: 3 }));
    }
}
