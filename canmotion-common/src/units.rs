//! Position unit conversions
//!
//! The drive profile carries positions as signed millidegrees on the wire, while the engine works
//! in radians throughout.

/// Convert a position in radians to wire millidegrees, rounding to the nearest step
pub fn rad_to_mdeg(rad: f64) -> i32 {
    (rad.to_degrees() * 1000.0).round() as i32
}

/// Convert a wire position in millidegrees back to radians
pub fn mdeg_to_rad(mdeg: i32) -> f64 {
    (mdeg as f64 / 1000.0).to_radians()
}

/// The size of one millidegree quantization step, in radians (~1.745e-5)
pub const MDEG_STEP_RAD: f64 = core::f64::consts::PI / 180.0 / 1000.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rad_to_mdeg() {
        assert_eq!(57296, rad_to_mdeg(1.0));
        assert_eq!(0, rad_to_mdeg(0.0));
        assert_eq!(-57296, rad_to_mdeg(-1.0));
        assert_eq!(180_000, rad_to_mdeg(core::f64::consts::PI));
    }

    #[test]
    fn test_round_trip_within_one_step() {
        for &p in &[0.0, 1.0, -2.5, 0.123456, core::f64::consts::PI] {
            let back = mdeg_to_rad(rad_to_mdeg(p));
            assert!(
                (back - p).abs() <= MDEG_STEP_RAD,
                "{p} round tripped to {back}"
            );
        }
    }
}
