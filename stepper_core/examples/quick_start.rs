//! Quick Start Example
//!
//! Demonstrates building a motion engine against a mock driver, running a
//! few moves, and reading status back. Swap in a real `Driver`
//! implementation to drive hardware.
//!
//! Run with `cargo run --example quick_start`.

use stepper_core::mocks::RecordingDriver;
use stepper_core::{MotorProfile, StepperMotor};
use stepper_traits::Direction;
use std::time::Duration;

fn main() -> Result<(), eyre::Report> {
    let (driver, log) = RecordingDriver::new();

    let mut motor = StepperMotor::builder()
        .with_driver(driver)
        .with_profile(MotorProfile {
            max_speed: 2000.0,
            acceleration: 8000.0,
            deceleration: 8000.0,
            ..MotorProfile::default()
        })
        .build()?;

    // A blocking move: returns once the motor is back at rest.
    let status = motor.move_relative_blocking(800)?;
    println!(
        "move done at position {} after {} pulses",
        status.position,
        log.len()
    );

    // A continuous run, interrupted by a graceful stop.
    motor.rotate(Direction::Backward)?;
    std::thread::sleep(Duration::from_millis(100));
    let status = motor.stop_blocking(false)?;
    println!("stopped at position {}", status.position);

    // Queries are cheap and never disturb motion.
    let status = motor.query()?;
    println!("mode = {:?}, velocity = {}", status.mode, status.velocity);

    motor.release()?;
    Ok(())
}
