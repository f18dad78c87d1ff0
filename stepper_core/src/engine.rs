//! The motion scheduler.
//!
//! A dedicated thread owns the driver and the kinematic state. Each loop
//! iteration applies at most one queued command, asks the planner for the
//! next tick, waits out the step interval, pulses the driver, and commits
//! the new state. While idle it blocks on the command channel with no
//! polling overhead. Commands arriving during the inter-step wait interrupt
//! it and take effect before the next pulse is planned, so a stop or a
//! parameter change lands within one step period.
//!
//! Safety: the engine thread is the only writer of `KinematicState` and the
//! only caller of the driver, so drivers need not be thread-safe.

use crossbeam_channel as xch;
use std::sync::Arc;
use std::time::Instant;

use stepper_traits::clock::Clock;
use stepper_traits::{Direction, Driver};

use crate::MotorProfile;
use crate::command::{Command, Envelope, ParamUpdate, Reply, StatusReport};
use crate::error::MotorError;
use crate::profile::{self, Goal, KinematicState, Mode};
use crate::util::braking_steps;

type BoxedDriver = Box<dyn Driver + Send>;
type DriverError = Box<dyn std::error::Error + Send + Sync>;

enum Wait {
    Elapsed,
    Interrupted(Envelope),
    Disconnected,
}

pub(crate) struct Engine {
    driver: BoxedDriver,
    clock: Arc<dyn Clock + Send + Sync>,
    rx: xch::Receiver<Envelope>,
    state: KinematicState,
    microsteps: u16,
    microstep_options: Vec<u16>,
    full_steps_per_rev: u32,
    /// Completion slots of blocking callers; drained exactly once, when the
    /// engine next reaches Idle or the move aborts.
    waiters: Vec<xch::Sender<Reply>>,
    fault: Option<MotorError>,
    engaged: bool,
    /// Command that interrupted an inter-step wait, applied first on the
    /// next iteration to preserve arrival order.
    pending: Option<Envelope>,
    /// Ideal time of the last emitted pulse. Pacing against it instead of
    /// the wall clock keeps command-handling overhead from accumulating
    /// into step-interval drift.
    last_pulse_at: Option<Instant>,
}

impl Engine {
    /// Spawn the engine thread. The returned sender is the command channel;
    /// dropping every sender shuts the engine down as if released.
    pub(crate) fn spawn(
        driver: BoxedDriver,
        profile: &MotorProfile,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> (xch::Sender<Envelope>, std::thread::JoinHandle<()>) {
        let (tx, rx) = xch::unbounded();
        let engine = Engine {
            driver,
            clock,
            rx,
            state: KinematicState::at_rest(
                profile.max_speed,
                profile.acceleration,
                profile.deceleration,
            ),
            microsteps: profile.microsteps,
            microstep_options: profile.microstep_options.clone(),
            full_steps_per_rev: profile.full_steps_per_rev,
            waiters: Vec::new(),
            fault: None,
            engaged: false,
            pending: None,
            last_pulse_at: None,
        };
        let join = std::thread::spawn(move || engine.run());
        (tx, join)
    }

    fn run(mut self) {
        tracing::debug!("engine thread started");
        loop {
            // at most one command per iteration bounds per-step latency
            let envelope = match self.pending.take() {
                Some(env) => Some(env),
                None => match self.rx.try_recv() {
                    Ok(env) => Some(env),
                    Err(xch::TryRecvError::Empty) => None,
                    Err(xch::TryRecvError::Disconnected) => break,
                },
            };
            if let Some(env) = envelope
                && !self.handle(env)
            {
                // explicit release: the driver is already de-energized
                tracing::debug!("engine thread exiting after release");
                return;
            }

            if self.state.mode == Mode::Idle {
                // nothing to do: suspend until the next command arrives
                self.last_pulse_at = None;
                match self.rx.recv() {
                    Ok(env) => self.pending = Some(env),
                    Err(_) => break,
                }
                continue;
            }

            let tick = profile::next_tick(&self.state);

            if tick.travel == 0 {
                // the motion resolved to rest without another pulse
                self.state.velocity = tick.velocity;
                self.state.mode = tick.mode;
                self.finish_motion();
                continue;
            }

            let base = self.last_pulse_at.unwrap_or_else(|| self.clock.now());
            let deadline = base + tick.delay;
            match self.wait_step(deadline) {
                Wait::Elapsed => {}
                Wait::Interrupted(env) => {
                    self.pending = Some(env);
                    continue;
                }
                Wait::Disconnected => break,
            }

            let direction = if tick.travel > 0 {
                Direction::Forward
            } else {
                Direction::Backward
            };
            if let Err(e) = self.emit_step(direction) {
                self.abort_motion(&e);
                continue;
            }

            // commit: this thread is the only writer
            self.last_pulse_at = Some(deadline);
            self.state.position += i64::from(tick.travel);
            self.state.velocity = tick.velocity;
            if self.state.mode != tick.mode {
                tracing::trace!(mode = ?tick.mode, position = self.state.position, "phase change");
            }
            self.state.mode = tick.mode;
        }

        // every client handle is gone; shut down as if released
        if let Err(e) = self.driver.release() {
            tracing::warn!(error = %e, "driver release failed during shutdown");
        }
        for tx in self.waiters.drain(..) {
            let _ = tx.send(Err(MotorError::EngineStopped));
        }
        tracing::debug!("engine thread exiting on disconnect");
    }

    /// Wait until the pulse deadline, letting an arriving command interrupt.
    fn wait_step(&mut self, deadline: Instant) -> Wait {
        let Some(remaining) = self.clock.until(deadline) else {
            // already due (a late wake-up or a long command): pulse now
            return Wait::Elapsed;
        };
        match self.rx.recv_timeout(remaining) {
            Ok(env) => Wait::Interrupted(env),
            Err(xch::RecvTimeoutError::Timeout) => Wait::Elapsed,
            Err(xch::RecvTimeoutError::Disconnected) => Wait::Disconnected,
        }
    }

    /// Apply one command. Returns false when the engine must terminate.
    fn handle(&mut self, env: Envelope) -> bool {
        let Envelope { cmd, reply } = env;
        tracing::trace!(?cmd, "command");
        match cmd {
            Command::MoveRelative(steps) => {
                let target = self.relative_target(steps);
                self.start_position_move(target, reply);
            }
            Command::MoveAbsolute(position) => self.start_position_move(position, reply),
            Command::MoveDegrees(degrees) => {
                let steps_per_rev =
                    f64::from(self.full_steps_per_rev) * f64::from(self.microsteps);
                let steps = (degrees * steps_per_rev / 360.0).round() as i64;
                let target = self.relative_target(steps);
                self.start_position_move(target, reply);
            }
            Command::Rotate(direction) => {
                self.fault = None;
                self.state.goal = Goal::Continuous(direction);
                if matches!(self.state.mode, Mode::Idle | Mode::Stopping) {
                    self.state.mode = Mode::ContinuousRunning;
                }
                self.register_waiter(reply);
                tracing::info!(?direction, "continuous run");
            }
            Command::Stop { immediate } => self.apply_stop(immediate, reply),
            Command::SetParameters(update) => self.apply_params(update),
            Command::SetMicrostep(mode) => {
                let outcome = self.change_microstep(mode);
                if let Some(tx) = reply {
                    let _ = tx.send(outcome.map(|()| self.status()));
                }
            }
            Command::Zero => self.apply_zero(),
            Command::Query => {
                if let Some(tx) = reply {
                    let _ = tx.send(Ok(self.status()));
                }
            }
            Command::Release => {
                self.do_release(reply);
                return false;
            }
        }
        true
    }

    /// Resolve a relative step count against the pending target, matching
    /// chained relative moves end-to-end; continuous runs and rest reference
    /// the current position.
    fn relative_target(&self, steps: i64) -> i64 {
        match self.state.goal {
            Goal::Position(target) => target.saturating_add(steps),
            Goal::None | Goal::Continuous(_) => self.state.position.saturating_add(steps),
        }
    }

    fn start_position_move(&mut self, target: i64, reply: Option<xch::Sender<Reply>>) {
        self.register_waiter(reply);
        self.fault = None;
        self.state.goal = Goal::Position(target);
        if matches!(self.state.mode, Mode::Idle | Mode::Stopping) {
            self.state.mode = Mode::Accelerating;
        }
        tracing::info!(target, position = self.state.position, "move start");
    }

    fn apply_stop(&mut self, immediate: bool, reply: Option<xch::Sender<Reply>>) {
        self.register_waiter(reply);
        if self.state.velocity == 0.0 {
            // already at rest: nothing to brake
            self.state.goal = Goal::None;
            self.state.mode = Mode::Idle;
            self.finish_motion();
            return;
        }
        if immediate {
            self.state.goal = Goal::None;
            self.state.mode = Mode::Stopping;
            tracing::info!(position = self.state.position, "immediate stop");
        } else {
            // shorten the goal to the nearest position a normal ramp-down
            // can reach; the planner converges through Decelerating to Idle
            let sign: i64 = if self.state.velocity > 0.0 { 1 } else { -1 };
            let brake = braking_steps(self.state.velocity.abs(), self.state.deceleration);
            self.state.goal = Goal::Position(self.state.position.saturating_add(sign * brake));
            tracing::info!(
                position = self.state.position,
                brake_steps = brake,
                "graceful stop"
            );
        }
    }

    fn apply_params(&mut self, update: ParamUpdate) {
        // validated at the client API; guard here anyway so a bad value can
        // never poison the planner
        if let Some(v) = update.max_speed {
            if v.is_finite() && v > 0.0 {
                self.state.max_speed = v;
            } else {
                tracing::warn!(v, "ignoring invalid max_speed");
            }
        }
        if let Some(v) = update.acceleration {
            if v.is_finite() && v > 0.0 {
                self.state.acceleration = v;
            } else {
                tracing::warn!(v, "ignoring invalid acceleration");
            }
        }
        if let Some(v) = update.deceleration {
            if v.is_finite() && v > 0.0 {
                self.state.deceleration = v;
            } else {
                tracing::warn!(v, "ignoring invalid deceleration");
            }
        }
        tracing::debug!(
            max_speed = self.state.max_speed,
            acceleration = self.state.acceleration,
            deceleration = self.state.deceleration,
            "parameters updated"
        );
    }

    fn change_microstep(&mut self, mode: u16) -> Result<(), MotorError> {
        if !self.microstep_options.contains(&mode) {
            return Err(MotorError::InvalidParameter(format!(
                "unsupported microstep mode {mode}"
            )));
        }
        if self.state.mode != Mode::Idle {
            return Err(MotorError::InvalidParameter(
                "cannot change microstep mode while moving".into(),
            ));
        }
        if mode == self.microsteps {
            return Ok(());
        }
        self.driver
            .set_microstep(mode)
            .map_err(|e| MotorError::DriverFault(e.to_string()))?;
        // re-reference position and rates so the physical motion and the
        // absolute shaft speed are unchanged
        let factor = f64::from(mode) / f64::from(self.microsteps);
        self.state.position = (self.state.position as f64 * factor).round() as i64;
        self.state.max_speed *= factor;
        self.state.acceleration *= factor;
        self.state.deceleration *= factor;
        self.microsteps = mode;
        tracing::info!(microsteps = mode, "microstep mode changed");
        Ok(())
    }

    fn apply_zero(&mut self) {
        // remaining travel is preserved: a move in flight still performs
        // the commanded number of steps
        if let Goal::Position(target) = self.state.goal {
            self.state.goal = Goal::Position(target - self.state.position);
        }
        self.state.position = 0;
        tracing::debug!("position re-zeroed");
    }

    fn register_waiter(&mut self, reply: Option<xch::Sender<Reply>>) {
        if let Some(tx) = reply {
            self.waiters.push(tx);
        }
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            position: self.state.position,
            velocity: self.state.velocity,
            mode: self.state.mode,
            is_running: self.state.mode != Mode::Idle,
            fault: self.fault.clone(),
        }
    }

    fn emit_step(&mut self, direction: Direction) -> Result<(), DriverError> {
        if !self.engaged {
            self.driver.engage()?;
            self.engaged = true;
        }
        self.driver.step(direction)
    }

    /// The committed mode reached Idle: release every blocking caller.
    fn finish_motion(&mut self) {
        self.state.goal = Goal::None;
        self.state.velocity = 0.0;
        self.last_pulse_at = None;
        if !self.waiters.is_empty() {
            let status = self.status();
            for tx in self.waiters.drain(..) {
                let _ = tx.send(Ok(status.clone()));
            }
        }
        tracing::info!(position = self.state.position, "motion complete");
    }

    /// Driver failure: abort the move, force Idle, keep the fault for the
    /// next Query. No retry, so a partially stepped move is never counted
    /// twice.
    fn abort_motion(&mut self, e: &DriverError) {
        let fault = MotorError::DriverFault(e.to_string());
        tracing::error!(error = %fault, position = self.state.position, "driver fault, aborting");
        self.state.goal = Goal::None;
        self.state.velocity = 0.0;
        self.state.mode = Mode::Idle;
        self.last_pulse_at = None;
        self.fault = Some(fault.clone());
        for tx in self.waiters.drain(..) {
            let _ = tx.send(Err(fault.clone()));
        }
    }

    fn do_release(&mut self, reply: Option<xch::Sender<Reply>>) {
        self.state.goal = Goal::None;
        self.state.velocity = 0.0;
        self.state.mode = Mode::Idle;
        for tx in self.waiters.drain(..) {
            let _ = tx.send(Err(MotorError::EngineStopped));
        }
        let result = self.driver.release();
        self.engaged = false;
        if let Some(tx) = reply {
            let _ = tx.send(match result {
                Ok(()) => Ok(self.status()),
                Err(e) => Err(MotorError::DriverFault(e.to_string())),
            });
        } else if let Err(e) = result {
            tracing::warn!(error = %e, "driver release failed");
        }
        tracing::info!(position = self.state.position, "engine released");
    }
}
