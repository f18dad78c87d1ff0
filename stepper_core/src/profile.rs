//! Velocity profile generation.
//!
//! `next_tick` is a pure function of the kinematic state: each call decides
//! the interval until the next step pulse, the velocity after that pulse,
//! and the phase the motion is in. No I/O and no hidden state, so ramps can
//! be exercised in tests without real time passing.
//!
//! Velocity is integrated per step of travel rather than per unit of time:
//! accelerating over one step gives v' = sqrt(v^2 + 2a), braking gives
//! v' = sqrt(v^2 - 2d). Direction reversals always brake through zero
//! before the sign of the velocity changes.

use std::time::Duration;

use stepper_traits::Direction;

use crate::util::{braking_steps, start_speed, step_interval};

/// Phase of the current motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// At rest with no commanded motion.
    Idle,
    /// Ramping up toward the speed cap.
    Accelerating,
    /// Holding the speed cap.
    Cruising,
    /// Ramping down, either toward a target or toward a lowered cap.
    Decelerating,
    /// Continuous rotation; ends only on an explicit stop.
    ContinuousRunning,
    /// Braking to rest with the previous goal discarded.
    Stopping,
}

/// What the motor is currently asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// No commanded motion.
    None,
    /// Finite move toward an absolute step position.
    Position(i64),
    /// Continuous rotation in the given direction.
    Continuous(Direction),
}

/// Kinematic state owned exclusively by the engine thread. The planner
/// reads it; only the engine writes it back after a committed step.
#[derive(Debug, Clone)]
pub struct KinematicState {
    /// Absolute position in steps (or microsteps) from the origin.
    pub position: i64,
    /// Current speed in steps per second; the sign is the direction.
    pub velocity: f64,
    pub goal: Goal,
    /// Cruise speed cap, steps per second.
    pub max_speed: f64,
    /// Ramp-up rate, steps per second squared.
    pub acceleration: f64,
    /// Ramp-down rate, steps per second squared.
    pub deceleration: f64,
    pub mode: Mode,
}

impl KinematicState {
    /// Fresh state at the origin, at rest.
    pub fn at_rest(max_speed: f64, acceleration: f64, deceleration: f64) -> Self {
        Self {
            position: 0,
            velocity: 0.0,
            goal: Goal::None,
            max_speed,
            acceleration,
            deceleration,
            mode: Mode::Idle,
        }
    }
}

/// One planned step: wait `delay`, pulse `travel` (+1/-1, or 0 when the
/// motion resolves to rest), then commit `velocity` and `mode`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub delay: Duration,
    pub velocity: f64,
    pub travel: i8,
    pub mode: Mode,
}

impl Tick {
    fn rest() -> Self {
        Tick {
            delay: Duration::ZERO,
            velocity: 0.0,
            travel: 0,
            mode: Mode::Idle,
        }
    }

    fn moving(velocity: f64, mode: Mode) -> Self {
        let travel = if velocity > 0.0 { 1 } else { -1 };
        Tick {
            delay: step_interval(velocity.abs()),
            velocity,
            travel,
            mode,
        }
    }
}

/// True when the motor halts in less than one step at `decel`, i.e. no
/// further pulse is needed to come to rest.
#[inline]
fn stoppable(speed: f64, decel: f64) -> bool {
    speed * speed <= 2.0 * decel
}

/// Plan the next step. Pure: equal states produce equal ticks.
pub fn next_tick(s: &KinematicState) -> Tick {
    if s.mode == Mode::Stopping {
        return brake_to_rest(s);
    }
    match s.goal {
        Goal::None => {
            if s.velocity == 0.0 {
                Tick::rest()
            } else {
                // residual motion with no goal: ramp down like a stop
                brake_to_rest(s)
            }
        }
        Goal::Position(target) => position_tick(s, target),
        Goal::Continuous(dir) => continuous_tick(s, dir),
    }
}

fn brake_to_rest(s: &KinematicState) -> Tick {
    let mag = s.velocity.abs();
    if mag == 0.0 || stoppable(mag, s.deceleration) {
        return Tick::rest();
    }
    let next = (mag * mag - 2.0 * s.deceleration)
        .sqrt()
        .max(start_speed(s.deceleration));
    Tick::moving(s.velocity.signum() * next, Mode::Stopping)
}

fn from_rest(sign: f64, s: &KinematicState, mode: Mode) -> Tick {
    // leaving rest bumps straight to the start speed; intervals near zero
    // velocity would otherwise be unbounded
    let v = start_speed(s.acceleration).min(s.max_speed);
    let mode = if mode == Mode::Accelerating && v >= s.max_speed {
        Mode::Cruising
    } else {
        mode
    };
    Tick::moving(sign * v, mode)
}

fn ramp_up(s: &KinematicState, mag: f64, sign: f64, mode: Mode) -> Tick {
    let next = (mag * mag + 2.0 * s.acceleration).sqrt().min(s.max_speed);
    let mode = if mode == Mode::Accelerating && next >= s.max_speed {
        Mode::Cruising
    } else {
        mode
    };
    Tick::moving(sign * next, mode)
}

/// Ramp down toward `floor` without dropping below it.
fn ramp_down(s: &KinematicState, mag: f64, sign: f64, floor: f64, mode: Mode) -> Tick {
    let next = (mag * mag - 2.0 * s.deceleration).max(0.0).sqrt().max(floor);
    Tick::moving(sign * next, mode)
}

fn position_tick(s: &KinematicState, target: i64) -> Tick {
    let d = target - s.position;
    let mag = s.velocity.abs();

    if d == 0 && (mag == 0.0 || stoppable(mag, s.deceleration)) {
        // arrived: position is exactly the target, velocity snaps to zero
        return Tick::rest();
    }
    if mag == 0.0 {
        return from_rest(d.signum() as f64, s, Mode::Accelerating);
    }

    let motion = s.velocity.signum();
    let toward = d.signum() as f64;
    if motion != toward {
        // moving away from the target (or sitting on it too fast to stop):
        // brake, and flip direction only at the zero crossing
        if stoppable(mag, s.deceleration) {
            return from_rest(toward, s, Mode::Accelerating);
        }
        return ramp_down(s, mag, motion, start_speed(s.deceleration), Mode::Decelerating);
    }

    let remaining = d.abs();
    if remaining <= braking_steps(mag, s.deceleration) {
        // close enough that the ramp-down must start; the creep floor
        // guarantees the remaining distance is always covered
        let floor = start_speed(s.deceleration).min(mag);
        return ramp_down(s, mag, motion, floor, Mode::Decelerating);
    }
    if mag > s.max_speed {
        // cap was lowered mid-move
        return ramp_down(s, mag, motion, s.max_speed, Mode::Decelerating);
    }
    if mag < s.max_speed {
        return ramp_up(s, mag, motion, Mode::Accelerating);
    }
    Tick::moving(motion * s.max_speed, Mode::Cruising)
}

fn continuous_tick(s: &KinematicState, dir: Direction) -> Tick {
    let commanded = dir.sign() as f64;
    let mag = s.velocity.abs();

    if mag == 0.0 {
        return from_rest(commanded, s, Mode::ContinuousRunning);
    }
    let motion = s.velocity.signum();
    if motion != commanded {
        // rotation was reversed mid-run: brake through zero first
        if stoppable(mag, s.deceleration) {
            return from_rest(commanded, s, Mode::ContinuousRunning);
        }
        return ramp_down(
            s,
            mag,
            motion,
            start_speed(s.deceleration),
            Mode::ContinuousRunning,
        );
    }
    if mag > s.max_speed {
        return ramp_down(s, mag, motion, s.max_speed, Mode::ContinuousRunning);
    }
    if mag < s.max_speed {
        return ramp_up(s, mag, motion, Mode::ContinuousRunning);
    }
    Tick::moving(motion * s.max_speed, Mode::ContinuousRunning)
}
