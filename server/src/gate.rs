use std::time::{Duration, Instant};

/// Source of monotonic time for the pipeline.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Production clock backed by [`Instant::now`].
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Sliding-window cooldown between outgoing notifications.
///
/// The gate opens when strictly more than `cooldown` has passed since the
/// last send. Before the first send, the construction time stands in for
/// the last send, so nothing goes out during the first `cooldown` after
/// startup.
#[derive(Debug)]
pub struct NotificationGate {
    cooldown: Duration,
    last_sent_at: Instant,
}

impl NotificationGate {
    pub fn new(cooldown: Duration) -> Self {
        Self::starting_at(Instant::now(), cooldown)
    }

    pub fn starting_at(start: Instant, cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent_at: start,
        }
    }

    /// Pure check; calling it repeatedly has no effect on the gate.
    pub fn should_notify(&self, now: Instant) -> bool {
        match now.checked_duration_since(self.last_sent_at) {
            Some(elapsed) => elapsed > self.cooldown,
            None => false,
        }
    }

    /// Start a new window at `now`. Call once per send after `should_notify`
    /// returned `true`.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent_at = now;
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_sent_at(&self) -> Instant {
        self.last_sent_at
    }
}
