//! Common step-timing helpers for stepper_core.

use std::time::Duration;

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Floor on the interval between two step pulses. Bounds the effective
/// step rate at 100k steps per second so a runaway speed value cannot
/// collapse the interval to zero.
pub const MIN_STEP_INTERVAL_US: u64 = 10;

/// Interval until the next step pulse for a speed in steps per second.
/// - Clamps the result to at least `MIN_STEP_INTERVAL_US`.
/// - Non-positive or non-finite speeds saturate to the longest interval
///   representable, they never panic.
#[inline]
pub fn step_interval(speed: f64) -> Duration {
    let us = (MICROS_PER_SEC as f64 / speed).round();
    if !(us.is_finite() && us >= 0.0) {
        return Duration::from_secs(u64::MAX / MICROS_PER_SEC);
    }
    Duration::from_micros((us as u64).max(MIN_STEP_INTERVAL_US))
}

/// Speed after the first step out of rest, from exact constant-acceleration
/// kinematics over one step of travel: v = sqrt(2 * rate).
#[inline]
pub fn start_speed(rate: f64) -> f64 {
    (2.0 * rate).sqrt()
}

/// Steps needed to brake from `speed` to rest at `decel`, rounded up.
/// The ceiling keeps the braking-distance check conservative so a ramp-down
/// never begins too late to stop at the target.
#[inline]
pub fn braking_steps(speed: f64, decel: f64) -> i64 {
    if decel <= 0.0 {
        return 0;
    }
    ((speed * speed) / (2.0 * decel)).ceil() as i64
}
