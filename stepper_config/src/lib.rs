#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the stepper motion engine.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `MotorCfg` describes the motor/driver combination (speed, ramp rates,
//!   step geometry, microstep options); the engine builder consumes it.
use serde::Deserialize;

/// Motor and ramp parameters. Defaults describe a generic full-step motor;
/// a concrete driver's datasheet values normally override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotorCfg {
    /// Cruise speed cap in steps (or microsteps) per second.
    pub max_speed: f64,
    /// Acceleration rate in steps per second squared.
    pub acceleration: f64,
    /// Deceleration rate in steps per second squared.
    /// When absent the acceleration rate is used for both ramps.
    pub deceleration: Option<f64>,
    /// Number of full (not micro-)steps per one revolution.
    pub full_steps_per_rev: u32,
    /// Microstep resolution at startup (1 = full steps).
    pub microsteps: u16,
    /// All microstep resolutions the driver supports.
    pub microstep_options: Vec<u16>,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            max_speed: 1000.0,
            acceleration: 1000.0,
            deceleration: None,
            full_steps_per_rev: 400,
            microsteps: 1,
            microstep_options: vec![1],
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub motor: MotorCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        self.motor.validate()
    }
}

impl MotorCfg {
    /// Effective deceleration rate: explicit value or the acceleration rate.
    pub fn deceleration_or_default(&self) -> f64 {
        self.deceleration.unwrap_or(self.acceleration)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            eyre::bail!("max_speed must be > 0, was {}", self.max_speed);
        }
        if !(self.acceleration.is_finite() && self.acceleration > 0.0) {
            eyre::bail!("acceleration must be > 0, was {}", self.acceleration);
        }
        if let Some(decel) = self.deceleration
            && !(decel.is_finite() && decel > 0.0)
        {
            eyre::bail!("deceleration must be > 0, was {decel}");
        }
        if self.full_steps_per_rev == 0 {
            eyre::bail!("full_steps_per_rev must be > 0");
        }
        if self.microstep_options.is_empty() {
            eyre::bail!("microstep_options must not be empty");
        }
        if self.microstep_options.iter().any(|&m| m == 0) {
            eyre::bail!("microstep_options entries must be >= 1");
        }
        if !self.microstep_options.contains(&self.microsteps) {
            eyre::bail!(
                "microsteps ({}) is not one of the supported options {:?}",
                self.microsteps,
                self.microstep_options
            );
        }
        Ok(())
    }
}
