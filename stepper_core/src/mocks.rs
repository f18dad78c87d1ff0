//! Test and helper mocks for stepper_core

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use stepper_traits::{Direction, Driver};

/// One recorded step pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    pub direction: Direction,
    pub at: Instant,
}

/// A driver that performs no GPIO at all.
#[derive(Default)]
pub struct NoopDriver;

impl Driver for NoopDriver {
    fn step(
        &mut self,
        _direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn set_microstep(&mut self, _mode: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn engage(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn release(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Shared view into a `RecordingDriver`'s activity. The driver itself moves
/// into the engine thread; this handle stays with the test.
#[derive(Clone, Default)]
pub struct StepLog {
    events: Arc<Mutex<Vec<StepEvent>>>,
    engaged: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    microstep: Arc<AtomicU16>,
}

impl StepLog {
    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signed sum of all recorded pulses: the net travel in steps.
    pub fn net_travel(&self) -> i64 {
        self.events
            .lock()
            .map(|g| g.iter().map(|e| e.direction.sign()).sum())
            .unwrap_or(0)
    }

    pub fn was_engaged(&self) -> bool {
        self.engaged.load(Ordering::Relaxed)
    }

    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    /// Last microstep mode forwarded to the driver; 0 when never set.
    pub fn microstep(&self) -> u16 {
        self.microstep.load(Ordering::Relaxed)
    }
}

/// Records every pulse with a timestamp. Useful for asserting pulse counts,
/// directions, and coil lifecycle from integration tests.
pub struct RecordingDriver {
    log: StepLog,
}

impl RecordingDriver {
    pub fn new() -> (Self, StepLog) {
        let log = StepLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl Driver for RecordingDriver {
    fn step(
        &mut self,
        direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut events) = self.log.events.lock() {
            events.push(StepEvent {
                direction,
                at: Instant::now(),
            });
        }
        Ok(())
    }
    fn set_microstep(&mut self, mode: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.microstep.store(mode, Ordering::Relaxed);
        Ok(())
    }
    fn engage(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.engaged.store(true, Ordering::Relaxed);
        Ok(())
    }
    fn release(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.released.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Steps succeed until `fail_after` pulses have been emitted, then the next
/// step errors exactly once and the driver recovers. Exercises the
/// abort-on-driver-fault path and that a fresh move clears the fault.
pub struct FailingDriver {
    fail_after: usize,
    steps: Arc<AtomicUsize>,
}

impl FailingDriver {
    pub fn new(fail_after: usize) -> Self {
        Self {
            fail_after,
            steps: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Driver for FailingDriver {
    fn step(
        &mut self,
        _direction: Direction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let n = self.steps.fetch_add(1, Ordering::Relaxed);
        if n == self.fail_after {
            Err(Box::new(std::io::Error::other("simulated step failure")))
        } else {
            Ok(())
        }
    }
    fn set_microstep(&mut self, _mode: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn engage(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn release(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}
