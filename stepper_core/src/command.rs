//! Command-channel protocol between the client handle and the engine.
//!
//! Commands are immutable values, totally ordered by arrival; the engine
//! consumes at most one per loop iteration so command handling never starves
//! step timing. Replies travel over per-request bounded(1) channels, which
//! double as one-shot completion signals for blocking calls.

use crossbeam_channel as xch;
use stepper_traits::Direction;

use crate::error::MotorError;
use crate::profile::Mode;

/// Partial runtime parameter update; `None` fields are left untouched.
/// Applied at an iteration boundary, never torn mid-step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParamUpdate {
    pub max_speed: Option<f64>,
    pub acceleration: Option<f64>,
    pub deceleration: Option<f64>,
}

/// Commands accepted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Move by a signed step count, relative to the pending target when one
    /// exists, otherwise to the current position.
    MoveRelative(i64),
    /// Move to an absolute step position.
    MoveAbsolute(i64),
    /// Relative move expressed in degrees of shaft rotation.
    MoveDegrees(f64),
    /// Run continuously in the given direction until stopped.
    Rotate(Direction),
    /// Brake to rest. `immediate` discards the current goal and starts the
    /// ramp-down on the next iteration; otherwise the goal is shortened to
    /// the nearest position reachable by a normal ramp-down.
    Stop { immediate: bool },
    SetParameters(ParamUpdate),
    /// Switch microstep resolution; only accepted while idle.
    SetMicrostep(u16),
    /// Re-reference the current position as 0, preserving remaining travel.
    Zero,
    Query,
    /// De-energize the driver and terminate the engine. Terminal.
    Release,
}

/// Snapshot of engine state at the last fully committed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub position: i64,
    /// Steps per second; the sign is the direction.
    pub velocity: f64,
    pub mode: Mode,
    pub is_running: bool,
    /// Driver fault that aborted the previous move, if any. Sticky until
    /// the next accepted motion command.
    pub fault: Option<MotorError>,
}

pub(crate) type Reply = Result<StatusReport, MotorError>;

/// One command plus an optional reply slot. For motion commands the slot is
/// registered as a completion waiter, answered when the engine next reaches
/// Idle; for Query/SetMicrostep/Release it is answered immediately.
pub(crate) struct Envelope {
    pub cmd: Command,
    pub reply: Option<xch::Sender<Reply>>,
}
