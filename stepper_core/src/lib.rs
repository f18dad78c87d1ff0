#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Single-axis stepper motion engine (hardware-agnostic).
//!
//! This crate turns move requests into accel/decel velocity ramps and emits
//! precisely timed step pulses through the `stepper_traits::Driver` trait.
//! All hardware interaction goes through that trait.
//!
//! ## Architecture
//!
//! - **Planning**: per-step velocity profile generation (`profile` module)
//! - **Scheduling**: a dedicated engine thread that owns the kinematic
//!   state and the driver (`engine` module)
//! - **Protocol**: the command/status types crossing the channel between
//!   the client handle and the engine (`command` module)
//! - **Client API**: the [`StepperMotor`] handle and its builder, below
//!
//! ## Concurrency
//!
//! Exactly two execution contexts exist: the caller's and the engine
//! thread. They share nothing but a crossbeam channel, so state is
//! race-free by construction. Non-blocking calls are fire-and-forget
//! channel sends; blocking calls wait on a one-shot completion signal
//! scoped to that request.

// Module declarations
pub mod command;
mod engine;
pub mod error;
pub mod mocks;
pub mod profile;
pub mod util;

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel as xch;
use stepper_traits::clock::{Clock, MonotonicClock};
use stepper_traits::{Direction, Driver};

use crate::command::{Command, Envelope, ParamUpdate, StatusReport};
use crate::engine::Engine;
use crate::error::{BuildError, MotorError, Report, Result};

/// Motor and ramp parameters handed to the engine at build time. Speeds are
/// in steps (or microsteps, at the configured resolution) per second.
#[derive(Debug, Clone)]
pub struct MotorProfile {
    pub max_speed: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub full_steps_per_rev: u32,
    pub microsteps: u16,
    pub microstep_options: Vec<u16>,
}

impl Default for MotorProfile {
    fn default() -> Self {
        Self {
            max_speed: 1000.0,
            acceleration: 1000.0,
            deceleration: 1000.0,
            full_steps_per_rev: 400,
            microsteps: 1,
            microstep_options: vec![1],
        }
    }
}

impl From<&stepper_config::MotorCfg> for MotorProfile {
    fn from(cfg: &stepper_config::MotorCfg) -> Self {
        Self {
            max_speed: cfg.max_speed,
            acceleration: cfg.acceleration,
            deceleration: cfg.deceleration_or_default(),
            full_steps_per_rev: cfg.full_steps_per_rev,
            microsteps: cfg.microsteps,
            microstep_options: cfg.microstep_options.clone(),
        }
    }
}

/// Handle to a running motion engine.
///
/// The handle is the only way to reach the engine: every call crosses the
/// command channel, and the engine thread is the sole owner of kinematic
/// state and driver. Dropping the handle releases the driver and joins the
/// engine thread.
pub struct StepperMotor {
    tx: xch::Sender<Envelope>,
    join: Option<std::thread::JoinHandle<()>>,
    released: AtomicBool,
}

impl core::fmt::Debug for StepperMotor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StepperMotor")
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl StepperMotor {
    /// Start building a StepperMotor.
    pub fn builder() -> MotorBuilder<Missing> {
        MotorBuilder::default()
    }

    /// Queue a relative move and return immediately. Positive steps are
    /// forward. While a move is in flight the steps chain onto its target.
    pub fn move_relative(&self, steps: i64) -> Result<()> {
        self.send(Command::MoveRelative(steps))
    }

    /// Relative move that returns once the motor is back at rest, with the
    /// final status. Released exactly once, on completion or fault.
    pub fn move_relative_blocking(&self, steps: i64) -> Result<StatusReport> {
        self.send_and_wait(Command::MoveRelative(steps))
    }

    /// Queue a move to an absolute position and return immediately.
    pub fn move_to(&self, position: i64) -> Result<()> {
        self.send(Command::MoveAbsolute(position))
    }

    /// Absolute move that returns once the motor is back at rest.
    pub fn move_to_blocking(&self, position: i64) -> Result<StatusReport> {
        self.send_and_wait(Command::MoveAbsolute(position))
    }

    /// Relative move in degrees of shaft rotation, converted using the
    /// configured steps-per-revolution at the current microstep resolution.
    pub fn move_degrees(&self, degrees: f64) -> Result<()> {
        if !degrees.is_finite() {
            return Err(invalid("degrees must be finite"));
        }
        self.send(Command::MoveDegrees(degrees))
    }

    /// Accelerate to the speed cap and keep running in `direction` until a
    /// stop or another move overrides it. Never blocks.
    pub fn rotate(&self, direction: Direction) -> Result<()> {
        self.send(Command::Rotate(direction))
    }

    /// Brake to rest. `immediate` abandons the current profile and starts
    /// braking on the next iteration; otherwise the motion is shortened to
    /// the nearest position a normal ramp-down can reach.
    pub fn stop(&self, immediate: bool) -> Result<()> {
        self.send(Command::Stop { immediate })
    }

    /// Like [`stop`](Self::stop), but waits until the motor is at rest.
    pub fn stop_blocking(&self, immediate: bool) -> Result<StatusReport> {
        self.send_and_wait(Command::Stop { immediate })
    }

    /// Update the speed cap and both ramp rates. Applied at the next
    /// iteration boundary; a cap below the current speed starts an
    /// immediate ramp-down toward it. Use
    /// [`set_deceleration`](Self::set_deceleration) afterwards for an
    /// asymmetric profile.
    pub fn set_parameters(&self, max_speed: f64, acceleration: f64) -> Result<()> {
        positive("max_speed", max_speed)?;
        positive("acceleration", acceleration)?;
        self.send(Command::SetParameters(ParamUpdate {
            max_speed: Some(max_speed),
            acceleration: Some(acceleration),
            deceleration: Some(acceleration),
        }))
    }

    /// Override the ramp-down rate independently of the acceleration.
    pub fn set_deceleration(&self, rate: f64) -> Result<()> {
        positive("deceleration", rate)?;
        self.send(Command::SetParameters(ParamUpdate {
            deceleration: Some(rate),
            ..ParamUpdate::default()
        }))
    }

    /// Switch the driver to a new microstep resolution. Only accepted while
    /// idle; position and rates are rescaled so the shaft state and speed
    /// are unchanged.
    pub fn set_microstep(&self, mode: u16) -> Result<()> {
        if mode == 0 {
            return Err(invalid("microstep mode must be >= 1"));
        }
        self.send_and_wait(Command::SetMicrostep(mode)).map(|_| ())
    }

    /// Re-reference the current position as 0. A move in flight keeps its
    /// remaining travel.
    pub fn zero(&self) -> Result<()> {
        self.send(Command::Zero)
    }

    /// Snapshot of the engine state at the last committed step. Repeated
    /// queries with no intervening commands return identical reports.
    pub fn query(&self) -> Result<StatusReport> {
        self.send_and_wait(Command::Query)
    }

    /// De-energize the driver and terminate the engine thread. Terminal: a
    /// fresh engine must be built to move again. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (rtx, rrx) = xch::bounded(1);
        let sent = self
            .tx
            .send(Envelope {
                cmd: Command::Release,
                reply: Some(rtx),
            })
            .is_ok();
        let outcome = if sent {
            match rrx.recv() {
                Ok(Ok(_)) | Err(_) => Ok(()),
                Ok(Err(e)) => Err(Report::new(e)),
            }
        } else {
            Ok(())
        };
        self.join_engine();
        outcome
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Report::new(MotorError::EngineStopped));
        }
        self.tx
            .send(Envelope { cmd, reply: None })
            .map_err(|_| Report::new(MotorError::EngineStopped))
    }

    fn send_and_wait(&self, cmd: Command) -> Result<StatusReport> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Report::new(MotorError::EngineStopped));
        }
        let (rtx, rrx) = xch::bounded(1);
        self.tx
            .send(Envelope {
                cmd,
                reply: Some(rtx),
            })
            .map_err(|_| Report::new(MotorError::EngineStopped))?;
        match rrx.recv() {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(Report::new(e)),
            // engine died without answering
            Err(_) => Err(Report::new(MotorError::EngineStopped)),
        }
    }

    fn join_engine(&mut self) {
        if let Some(handle) = self.join.take()
            && handle.join().is_err()
        {
            tracing::warn!("engine thread panicked during shutdown");
        }
    }
}

impl Drop for StepperMotor {
    fn drop(&mut self) {
        // Ask the engine to release and terminate, then join. The engine
        // notices the command (or the channel disconnect) within one step
        // period, so shutdown is prompt even mid-move.
        if !self.released.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Envelope {
                cmd: Command::Release,
                reply: None,
            });
        }
        self.join_engine();
    }
}

fn invalid(msg: &str) -> Report {
    Report::new(MotorError::InvalidParameter(msg.into()))
}

fn positive(name: &'static str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(Report::new(MotorError::InvalidParameter(format!(
            "{name} must be > 0, was {v}"
        ))))
    }
}

// Type-state markers for the builder
pub struct Missing;
pub struct Set;

/// Builder for [`StepperMotor`]. The driver is mandatory; profile and clock
/// fall back to defaults. All numbers are validated on `build()`.
pub struct MotorBuilder<D> {
    driver: Option<Box<dyn Driver + Send>>,
    profile: Option<MotorProfile>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    _d: PhantomData<D>,
}

impl Default for MotorBuilder<Missing> {
    fn default() -> Self {
        Self {
            driver: None,
            profile: None,
            clock: None,
            _d: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state
impl<D> MotorBuilder<D> {
    pub fn with_profile(mut self, profile: MotorProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Take motor parameters from a parsed config file section.
    pub fn with_motor_cfg(self, cfg: &stepper_config::MotorCfg) -> Self {
        self.with_profile(MotorProfile::from(cfg))
    }

    /// Provide a custom clock; defaults to MonotonicClock when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fallible build available in any type-state; returns a typed
    /// BuildError for missing pieces.
    pub fn try_build(self) -> Result<StepperMotor> {
        let driver = self
            .driver
            .ok_or_else(|| Report::new(BuildError::MissingDriver))?;
        let profile = self.profile.unwrap_or_default();

        if !(profile.max_speed.is_finite() && profile.max_speed > 0.0) {
            return Err(Report::new(BuildError::InvalidConfig("max_speed must be > 0")));
        }
        if !(profile.acceleration.is_finite() && profile.acceleration > 0.0) {
            return Err(Report::new(BuildError::InvalidConfig(
                "acceleration must be > 0",
            )));
        }
        if !(profile.deceleration.is_finite() && profile.deceleration > 0.0) {
            return Err(Report::new(BuildError::InvalidConfig(
                "deceleration must be > 0",
            )));
        }
        if profile.full_steps_per_rev == 0 {
            return Err(Report::new(BuildError::InvalidConfig(
                "full_steps_per_rev must be > 0",
            )));
        }
        if profile.microstep_options.is_empty() || profile.microstep_options.contains(&0) {
            return Err(Report::new(BuildError::InvalidConfig(
                "microstep_options must be non-empty and >= 1",
            )));
        }
        if !profile.microstep_options.contains(&profile.microsteps) {
            return Err(Report::new(BuildError::InvalidConfig(
                "microsteps must be one of microstep_options",
            )));
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };
        let (tx, join) = Engine::spawn(driver, &profile, clock);
        Ok(StepperMotor {
            tx,
            join: Some(join),
            released: AtomicBool::new(false),
        })
    }
}

// Setter that advances type-state when providing the mandatory driver
impl MotorBuilder<Missing> {
    pub fn with_driver(self, driver: impl Driver + Send + 'static) -> MotorBuilder<Set> {
        MotorBuilder {
            driver: Some(Box::new(driver)),
            profile: self.profile,
            clock: self.clock,
            _d: PhantomData,
        }
    }
}

impl MotorBuilder<Set> {
    /// Validate and spawn the engine. Only available once a driver is set.
    pub fn build(self) -> Result<StepperMotor> {
        self.try_build()
    }
}
