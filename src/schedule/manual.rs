// src/schedule/manual.rs

//! Deterministic scheduler with a virtual clock.
//!
//! Nothing happens until the owner calls [`ManualScheduler::advance`]; every
//! tick that falls due within the advanced window is then fired in due-time
//! order (ties broken by registration order). Ticks may register new
//! schedules, which start counting from the virtual instant of the tick that
//! created them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use super::{ScheduleHandle, Scheduler, TickFn};

struct Entry {
    seq: u64,
    interval: Duration,
    due: Cell<Duration>,
    handle: ScheduleHandle,
    tick: RefCell<TickFn>,
}

#[derive(Default)]
struct ManualInner {
    now: Cell<Duration>,
    next_seq: Cell<u64>,
    entries: RefCell<Vec<Rc<Entry>>>,
}

/// Virtual-time scheduler for tests and simulations.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Rc<ManualInner>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since creation.
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    /// Number of schedules that have not been cancelled.
    pub fn active_schedules(&self) -> usize {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter(|e| !e.handle.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, firing every tick that falls due.
    ///
    /// Returns the number of ticks fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut fired = 0;

        while let Some(entry) = self.next_due(target) {
            let due = entry.due.get();
            self.inner.now.set(due);
            entry.due.set(due + entry.interval);

            trace!(seq = entry.seq, at = ?due, "manual scheduler tick");
            (&mut *entry.tick.borrow_mut())();
            fired += 1;
        }

        self.inner.now.set(target);
        fired
    }

    /// Advance to the earliest pending tick and fire it (and anything else due
    /// at that same instant). Returns `false` if nothing is scheduled.
    pub fn advance_to_next(&self) -> bool {
        let next = {
            self.prune();
            self.inner.entries.borrow().iter().map(|e| e.due.get()).min()
        };

        match next {
            Some(due) => {
                let by = due.saturating_sub(self.now());
                self.advance(by) > 0
            }
            None => false,
        }
    }

    fn prune(&self) {
        self.inner
            .entries
            .borrow_mut()
            .retain(|e| !e.handle.is_cancelled());
    }

    fn next_due(&self, target: Duration) -> Option<Rc<Entry>> {
        self.prune();
        self.inner
            .entries
            .borrow()
            .iter()
            .filter(|e| e.due.get() <= target)
            .min_by_key(|e| (e.due.get(), e.seq))
            .cloned()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, interval: Duration, tick: TickFn) -> ScheduleHandle {
        let interval = interval.max(Duration::from_nanos(1));
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);

        let handle = ScheduleHandle::new();
        let entry = Rc::new(Entry {
            seq,
            interval,
            due: Cell::new(self.now() + interval),
            handle: handle.clone(),
            tick: RefCell::new(tick),
        });
        self.inner.entries.borrow_mut().push(entry);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> TickFn) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_for_make = Rc::clone(&log);
        let make = move |name: &'static str| -> TickFn {
            let log = Rc::clone(&log_for_make);
            Box::new(move || log.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn fires_in_due_order_with_registration_tiebreak() {
        let sched = ManualScheduler::new();
        let (log, make) = recorder();

        sched.schedule(Duration::from_millis(500), make("fast"));
        sched.schedule(Duration::from_secs(1), make("slow"));

        let fired = sched.advance(Duration::from_secs(1));
        assert_eq!(fired, 3);
        assert_eq!(*log.borrow(), vec!["fast", "fast", "slow"]);
        assert_eq!(sched.now(), Duration::from_secs(1));
    }

    #[test]
    fn cancelled_schedule_never_fires_again() {
        let sched = ManualScheduler::new();
        let (log, make) = recorder();

        let handle = sched.schedule(Duration::from_secs(1), make("a"));
        sched.advance(Duration::from_secs(1));
        handle.cancel();
        sched.advance(Duration::from_secs(5));

        assert_eq!(*log.borrow(), vec!["a"]);
        assert_eq!(sched.active_schedules(), 0);
    }

    #[test]
    fn tick_can_register_new_schedule() {
        let sched = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_sched = sched.clone();
        let inner_log = Rc::clone(&log);
        let spawned = Rc::new(Cell::new(false));
        let spawned_flag = Rc::clone(&spawned);
        sched.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                inner_log.borrow_mut().push(format!("outer@{:?}", inner_sched.now()));
                if !spawned_flag.get() {
                    spawned_flag.set(true);
                    let log = Rc::clone(&inner_log);
                    let s = inner_sched.clone();
                    inner_sched.schedule(
                        Duration::from_secs(1),
                        Box::new(move || log.borrow_mut().push(format!("inner@{:?}", s.now()))),
                    );
                }
            }),
        );

        sched.advance(Duration::from_secs(2));
        assert_eq!(
            *log.borrow(),
            vec![
                "outer@1s".to_string(),
                "outer@2s".to_string(),
                "inner@2s".to_string(),
            ]
        );
    }

    #[test]
    fn advance_to_next_jumps_to_earliest_tick() {
        let sched = ManualScheduler::new();
        let (log, make) = recorder();
        sched.schedule(Duration::from_secs(3), make("x"));

        assert!(sched.advance_to_next());
        assert_eq!(sched.now(), Duration::from_secs(3));
        assert_eq!(*log.borrow(), vec!["x"]);

        let empty = ManualScheduler::new();
        assert!(!empty.advance_to_next());
    }
}
