use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared admission gate for a fixed-count profile's workers.
///
/// Each worker calls [`next`](Self::next) before starting an iteration; once
/// the deadline passes (or the optional iteration cap is exhausted) every
/// subsequent call returns `false` and the worker drains out.
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
}

impl IterationGate {
    pub fn new(iterations: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
        }
    }

    /// Pin the deadline to `started + duration`. Idempotent; later calls keep
    /// the first deadline.
    pub fn start_at(&self, started: Instant) {
        if self.deadline.get().is_some() {
            return;
        }

        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    pub fn next(&self) -> bool {
        // Skip timekeeping entirely when there's no duration bound.
        if self.duration.is_some() {
            let now = Instant::now();

            // Lazily anchor the deadline to the first observed iteration if
            // the scheduler never called start().
            if self.deadline.get().is_none() {
                self.start_at(now);
            }

            if let Some(deadline) = self.deadline.get()
                && now >= *deadline
            {
                return false;
            }
        }

        if let Some(total) = self.iterations {
            let idx = self.counter.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                return false;
            }
        } else if self.duration.is_none() {
            // Neither bound set: admit a single iteration.
            let idx = self.counter.fetch_add(1, Ordering::Relaxed);
            if idx > 0 {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_cap_admits_exactly_n() {
        let gate = IterationGate::new(Some(3), None);
        assert!(gate.next());
        assert!(gate.next());
        assert!(gate.next());
        assert!(!gate.next());
        assert!(!gate.next());
    }

    #[test]
    fn no_bounds_means_run_once() {
        let gate = IterationGate::new(None, None);
        assert!(gate.next());
        assert!(!gate.next());
    }

    #[test]
    fn deadline_closes_the_gate() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(60)));
        gate.start_at(Instant::now() - Duration::from_secs(120));
        assert!(!gate.next());
    }

    #[test]
    fn deadline_in_the_future_stays_open() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(60)));
        gate.start();
        assert!(gate.next());
        assert!(gate.next());
    }

    #[test]
    fn start_at_is_idempotent() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(60)));
        gate.start();
        // A later, already-expired anchor must not replace the first one.
        gate.start_at(Instant::now() - Duration::from_secs(120));
        assert!(gate.next());
    }
}
