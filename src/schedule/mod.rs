// src/schedule/mod.rs

//! Periodic tick sources for task polling.
//!
//! The supervisor never sleeps or spawns threads to poll processes. Instead it
//! asks a [`Scheduler`] to call a tick closure at a fixed interval and keeps the
//! returned [`ScheduleHandle`] so the schedule can be stopped on the terminal
//! transition.
//!
//! - [`TokioScheduler`] drives ticks from `tokio::time::interval` on a
//!   `LocalSet` (production).
//! - [`ManualScheduler`] keeps a virtual clock that tests advance explicitly.
//!
//! Both run every tick on the calling thread, so no two ticks ever overlap.

pub mod manual;
pub mod tokio_timer;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

pub use manual::ManualScheduler;
pub use tokio_timer::TokioScheduler;

/// Closure invoked once per tick.
pub type TickFn = Box<dyn FnMut()>;

/// Source of periodic ticks.
pub trait Scheduler {
    /// Call `tick` every `interval`, starting one interval from now, until the
    /// returned handle is cancelled.
    fn schedule(&self, interval: Duration, tick: TickFn) -> ScheduleHandle;
}

/// Cancellation token for a schedule.
///
/// Cancelling is idempotent and takes effect before the next tick: a
/// scheduler checks the flag right before invoking the tick closure.
#[derive(Debug, Clone, Default)]
pub struct ScheduleHandle {
    cancelled: Rc<Cell<bool>>,
}

impl ScheduleHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Tick interval for a poll frequency in Hz, or `None` if the frequency is
/// not positive or its interval does not fit in a `Duration`.
pub fn try_interval_for_frequency(frequency_hz: f64) -> Option<Duration> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / frequency_hz).ok()
}

/// Tick interval for a poll frequency in Hz.
///
/// Frequencies rejected by [`try_interval_for_frequency`] map to
/// `Duration::MAX`, i.e. a schedule that never fires.
pub fn interval_for_frequency(frequency_hz: f64) -> Duration {
    try_interval_for_frequency(frequency_hz).unwrap_or(Duration::MAX)
}
