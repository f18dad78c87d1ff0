//! End-to-end engine behavior through the public handle, with a recording
//! driver standing in for hardware.

use std::time::Duration;

use stepper_core::error::MotorError;
use stepper_core::mocks::{FailingDriver, RecordingDriver};
use stepper_core::profile::Mode;
use stepper_core::{MotorProfile, StepperMotor};
use stepper_traits::Direction;

/// Rates high enough that whole ramps finish in tens of milliseconds.
fn fast_profile() -> MotorProfile {
    MotorProfile {
        max_speed: 20_000.0,
        acceleration: 2_000_000.0,
        deceleration: 2_000_000.0,
        ..MotorProfile::default()
    }
}

fn fast_motor() -> (StepperMotor, stepper_core::mocks::StepLog) {
    let (driver, log) = RecordingDriver::new();
    let motor = StepperMotor::builder()
        .with_driver(driver)
        .with_profile(fast_profile())
        .build()
        .unwrap();
    (motor, log)
}

#[test]
fn blocking_move_returns_only_after_completion() {
    let (motor, log) = fast_motor();

    let status = motor.move_relative_blocking(150).unwrap();

    // the call must not return early: by the time it does, every pulse has
    // been emitted and the engine is back at rest
    assert_eq!(status.position, 150);
    assert_eq!(status.velocity, 0.0);
    assert_eq!(status.mode, Mode::Idle);
    assert!(!status.is_running);
    assert_eq!(log.len(), 150);
    assert_eq!(log.net_travel(), 150);
    assert!(log.was_engaged(), "coils must be energized before stepping");
}

#[test]
fn backward_blocking_move_lands_exactly() {
    let (motor, log) = fast_motor();

    let status = motor.move_to_blocking(-75).unwrap();

    assert_eq!(status.position, -75);
    assert_eq!(log.net_travel(), -75);
    assert!(
        log.events()
            .iter()
            .all(|e| e.direction == Direction::Backward)
    );
}

#[test]
fn relative_moves_chain_onto_the_pending_target() {
    let (motor, _log) = fast_motor();

    motor.move_relative(100).unwrap();
    motor.move_relative(50).unwrap();
    let status = motor.move_relative_blocking(-20).unwrap();

    assert_eq!(status.position, 130);
}

#[test]
fn query_is_idempotent_at_rest() {
    let (motor, _log) = fast_motor();
    motor.move_relative_blocking(42).unwrap();

    let first = motor.query().unwrap();
    let second = motor.query().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.position, 42);
    assert_eq!(first.mode, Mode::Idle);
}

#[test]
fn rotate_then_graceful_stop_ramps_to_rest() {
    let (motor, log) = fast_motor();

    motor.rotate(Direction::Forward).unwrap();
    // let the rotation ramp up
    while motor.query().unwrap().position < 200 {
        std::thread::sleep(Duration::from_millis(1));
    }

    let status = motor.stop_blocking(false).unwrap();
    assert_eq!(status.mode, Mode::Idle);
    assert_eq!(status.velocity, 0.0);

    // no further pulses once at rest
    let settled = log.len();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(log.len(), settled, "pulses emitted after the stop settled");
    assert!(
        log.events().iter().all(|e| e.direction == Direction::Forward),
        "a forward run must never pulse backward"
    );
    assert_eq!(status.position, log.net_travel());
}

#[test]
fn immediate_stop_discards_the_goal() {
    let (motor, log) = fast_motor();

    motor.move_relative(1_000_000).unwrap();
    while motor.query().unwrap().position < 100 {
        std::thread::sleep(Duration::from_millis(1));
    }

    let status = motor.stop_blocking(true).unwrap();
    assert!(!status.is_running);
    assert!(
        status.position < 1_000_000,
        "immediate stop must abandon the target"
    );
    // position bookkeeping matches the emitted pulses exactly
    assert_eq!(status.position, log.net_travel());
}

#[test]
fn lowering_the_cap_mid_run_ramps_down() {
    let (motor, _log) = fast_motor();

    motor.rotate(Direction::Forward).unwrap();
    // wait for cruise
    loop {
        let s = motor.query().unwrap();
        if s.velocity >= 20_000.0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    motor.set_parameters(2_000.0, 500_000.0).unwrap();

    // the engine must converge below the new cap and stay there
    let mut converged = false;
    for _ in 0..200 {
        let s = motor.query().unwrap();
        if s.velocity <= 2_000.0 {
            converged = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(converged, "velocity never dropped to the new cap");
    std::thread::sleep(Duration::from_millis(5));
    let s = motor.query().unwrap();
    assert!(
        s.velocity <= 2_000.0 + 1e-9,
        "held {} above the lowered cap",
        s.velocity
    );
    motor.stop_blocking(true).unwrap();
}

#[test]
fn driver_fault_aborts_and_is_sticky_until_next_move() {
    let motor = StepperMotor::builder()
        .with_driver(FailingDriver::new(25))
        .with_profile(fast_profile())
        .build()
        .unwrap();

    let err = motor
        .move_relative_blocking(100)
        .expect_err("move should abort on the driver fault");
    match err.downcast_ref::<MotorError>() {
        Some(MotorError::DriverFault(msg)) => assert!(msg.contains("step failure")),
        other => panic!("expected DriverFault, got: {other:?}"),
    }

    // fault is reported on the next query, engine idle, no retry happened
    let status = motor.query().unwrap();
    assert!(matches!(status.fault, Some(MotorError::DriverFault(_))));
    assert_eq!(status.mode, Mode::Idle);
    assert_eq!(status.position, 25, "aborted move must not double-count");

    // a fresh move clears the fault and completes (the driver recovered)
    let status = motor.move_to_blocking(60).unwrap();
    assert_eq!(status.position, 60);
    assert!(status.fault.is_none());
}

#[test]
fn zero_re_references_the_position() {
    let (motor, _log) = fast_motor();

    motor.move_relative_blocking(500).unwrap();
    motor.zero().unwrap();

    let status = motor.query().unwrap();
    assert_eq!(status.position, 0);

    // absolute moves now use the new origin
    let status = motor.move_to_blocking(10).unwrap();
    assert_eq!(status.position, 10);
}

#[test]
fn microstep_change_rescales_position_and_reaches_driver() {
    let (driver, log) = RecordingDriver::new();
    let motor = StepperMotor::builder()
        .with_driver(driver)
        .with_profile(MotorProfile {
            microstep_options: vec![1, 2, 4, 8],
            ..fast_profile()
        })
        .build()
        .unwrap();

    motor.move_relative_blocking(100).unwrap();
    motor.set_microstep(4).unwrap();

    assert_eq!(log.microstep(), 4);
    let status = motor.query().unwrap();
    assert_eq!(status.position, 400, "position must scale by the new factor");
}

#[test]
fn microstep_change_is_rejected_while_moving() {
    let (motor, _log) = fast_motor();

    motor.rotate(Direction::Forward).unwrap();
    while motor.query().unwrap().position < 50 {
        std::thread::sleep(Duration::from_millis(1));
    }

    let err = motor
        .set_microstep(1)
        .expect_err("microstep change must be rejected mid-run");
    assert!(matches!(
        err.downcast_ref::<MotorError>(),
        Some(MotorError::InvalidParameter(_))
    ));
    motor.stop_blocking(true).unwrap();
}

#[test]
fn unsupported_microstep_mode_is_rejected() {
    let (motor, _log) = fast_motor();
    let err = motor
        .set_microstep(16)
        .expect_err("mode outside the options list must be rejected");
    assert!(matches!(
        err.downcast_ref::<MotorError>(),
        Some(MotorError::InvalidParameter(_))
    ));
}

#[test]
fn invalid_parameters_are_rejected_without_disturbing_the_engine() {
    let (motor, _log) = fast_motor();

    let err = motor
        .set_parameters(-100.0, 50.0)
        .expect_err("negative speed must be rejected");
    assert!(matches!(
        err.downcast_ref::<MotorError>(),
        Some(MotorError::InvalidParameter(_))
    ));

    // the engine is unaffected and still serves moves
    let status = motor.move_relative_blocking(10).unwrap();
    assert_eq!(status.position, 10);
}

#[test]
fn reversal_mid_run_passes_through_rest() {
    let (motor, log) = fast_motor();

    motor.move_relative(5_000).unwrap();
    while motor.query().unwrap().position < 500 {
        std::thread::sleep(Duration::from_millis(1));
    }
    // redirect to the far side: the engine must brake through zero first
    let status = motor.move_to_blocking(-200).unwrap();

    assert_eq!(status.position, -200);
    let events = log.events();
    let first_backward = events
        .iter()
        .position(|e| e.direction == Direction::Backward)
        .expect("no backward pulses after the reversal");
    // one contiguous forward block, then one contiguous backward block
    assert!(
        events[..first_backward]
            .iter()
            .all(|e| e.direction == Direction::Forward)
    );
    assert!(
        events[first_backward..]
            .iter()
            .all(|e| e.direction == Direction::Backward)
    );
}
