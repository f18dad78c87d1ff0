use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotorError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("driver fault: {0}")]
    DriverFault(String),
    #[error("engine stopped")]
    EngineStopped,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing driver")]
    MissingDriver,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
