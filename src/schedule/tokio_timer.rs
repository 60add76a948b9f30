// src/schedule/tokio_timer.rs

//! Real-time scheduler backed by Tokio timers.
//!
//! Each schedule becomes a `spawn_local` task that waits on a
//! `tokio::time::interval`, so `schedule` must be called from inside a
//! `tokio::task::LocalSet`. All ticks run on the LocalSet's thread, one at a
//! time.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

use super::{ScheduleHandle, Scheduler, TickFn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, interval: Duration, mut tick: TickFn) -> ScheduleHandle {
        let interval = interval.max(Duration::from_millis(1));
        let handle = ScheduleHandle::new();
        let token = handle.clone();

        tokio::task::spawn_local(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            // Elapsed time is tick-counted: late ticks shift, never burst.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if token.is_cancelled() {
                    trace!("schedule cancelled; timer task exiting");
                    break;
                }
                tick();
            }
        });

        handle
    }
}
