//! Constants defining the drive profile objects and special values used by the master

/// Object keys for the drive profile objects the master reads and writes
pub mod object_keys {
    use crate::sdo::ObjectKey;

    /// The drive statusword
    pub const STATUSWORD: ObjectKey = ObjectKey::new(0x6041, 0);
    /// The drive controlword
    pub const CONTROLWORD: ObjectKey = ObjectKey::new(0x6040, 0);
    /// Interpolation time period value (interpolated position mode)
    pub const IP_TIME_UNITS: ObjectKey = ObjectKey::new(0x60C2, 1);
    /// Interpolation time index (exponent selecting the time unit)
    pub const IP_TIME_INDEX: ObjectKey = ObjectKey::new(0x60C2, 2);
    /// Manufacturer object controlling the drive's SYNC supervision
    pub const SYNC_TIMEOUT_FACTOR: ObjectKey = ObjectKey::new(0x200E, 0);
    /// The heartbeat producer time
    pub const HEARTBEAT: ObjectKey = ObjectKey::new(0x1017, 0);
}

/// Controlword command values per the drive profile state machine
pub mod controlword {
    /// Transition a drive from SwitchedOnDisabled to ReadyToSwitchOn
    pub const SHUTDOWN: u16 = 0x0006;
    /// Transition a drive from ReadyToSwitchOn to SwitchedOn
    pub const SWITCH_ON: u16 = 0x0007;
    /// Transition a drive from SwitchedOn to OperationEnabled
    pub const ENABLE_OPERATION: u16 = 0x000F;
    /// First word of the two-step fault reset sequence
    pub const FAULT_RESET_0: u16 = 0x0000;
    /// Second word of the two-step fault reset sequence (rising edge on bit 7)
    pub const FAULT_RESET_1: u16 = 0x0080;
    /// Bit enabling interpolated position mode, OR'd into the setpoint PDO controlword
    pub const ENABLE_IP_MODE: u16 = 0x0010;
    /// Bit 4 in homing mode, starts the homing run
    pub const START_HOMING: u16 = 0x0010;
}

/// Special values written to the configuration objects
pub mod values {
    /// IP time index selecting milliseconds (10^-3)
    pub const IP_TIME_INDEX_MILLISECONDS: u8 = 0xFD;
    /// IP time index selecting hundreds of microseconds (10^-4)
    pub const IP_TIME_INDEX_HUNDRED_MICROS: u8 = 0xFC;
    /// Writing this to the SYNC timeout factor disables the drive's SYNC supervision
    pub const SYNC_TIMEOUT_FACTOR_DISABLE: u8 = 0;
    /// Heartbeat producer period configured on every drive, in milliseconds
    pub const HEARTBEAT_TIME_MS: u16 = 1601;
}
