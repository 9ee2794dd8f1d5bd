use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source measured from a fixed origin.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);

    /// Sleeps until `now()` reaches `deadline`. Returns at once if it already has.
    fn sleep_until(&self, deadline: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn sleep_until(&self, deadline: Duration) {
        let remaining = deadline.saturating_sub(self.now());
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }
}

type Action = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SimulatedState {
    now: Duration,
    actions: Vec<(Duration, Action)>,
    deadlines: Vec<Duration>,
}

/// Virtual time for deterministic tests.
///
/// Sleeping advances virtual time instantly. Actions scheduled with [`SimulatedClock::at`] run, in
/// time order, as virtual time passes them.
#[derive(Default)]
pub struct SimulatedClock {
    state: Mutex<SimulatedState>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(&self, when: Duration, action: impl FnOnce() + Send + 'static) {
        self.state.lock().actions.push((when, Box::new(action)));
    }

    /// Every deadline passed to `sleep_until`, in call order.
    pub fn deadlines(&self) -> Vec<Duration> {
        self.state.lock().deadlines.clone()
    }

    pub fn advance(&self, duration: Duration) {
        let target = self.now() + duration;
        self.advance_to(target);
    }

    fn advance_to(&self, target: Duration) {
        loop {
            let action = {
                let mut state = self.state.lock();
                let next = state
                    .actions
                    .iter()
                    .enumerate()
                    .filter(|(_, (when, _))| *when <= target)
                    .min_by_key(|(_, (when, _))| *when)
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let (when, action) = state.actions.remove(i);
                        state.now = state.now.max(when);
                        action
                    }
                    None => {
                        state.now = state.now.max(target);
                        return;
                    }
                }
            };
            action();
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn sleep_until(&self, deadline: Duration) {
        self.state.lock().deadlines.push(deadline);
        self.advance_to(deadline);
    }
}
