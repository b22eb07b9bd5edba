use std::time::{Duration, Instant};

/// Fixed-period repeating timer driven by the host loop.
///
/// Armed on start, disarmed on pause; a disarmed ticker never fires. Deadlines
/// advance by whole periods, and if the host falls more than a period behind
/// the missed ticks are dropped rather than fired in a burst.
#[derive(Debug, Clone)]
pub struct Ticker {
    period: Duration,
    next_due: Option<Instant>,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.period);
    }

    pub fn disarm(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Returns true when a tick is due at `now` and schedules the next one.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }
        let next = due + self.period;
        self.next_due = Some(if next <= now { now + self.period } else { next });
        true
    }
}
