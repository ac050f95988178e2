//! Centralized admission control for the target request rate.
//!
//! Workers do not schedule themselves. Each one asks the shared
//! [`PacingController`] whether it may dispatch; the controller admits a
//! request only while `admitted < floor(elapsed_secs * rate)`, so the
//! aggregate rate converges to the target however many workers poll it.

use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Shortest backoff handed to a denied caller.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Longest backoff handed to a denied caller.
pub const MAX_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingState {
    NotStarted,
    Running,
    Stopped,
}

/// Answer to "may I dispatch now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// One request slot was granted to the caller.
    Granted,
    /// No slot yet; sleep this long before asking again.
    Wait(Duration),
    /// The run is over; no slot will ever be granted.
    Stopped,
}

#[derive(Debug)]
struct Inner {
    state: PacingState,
    start: Option<Instant>,
    admitted: u64,
}

#[derive(Debug)]
pub struct PacingController {
    rate: f64,
    min_backoff: Duration,
    max_backoff: Duration,
    inner: Mutex<Inner>,
}

impl PacingController {
    /// `rate` is in requests per second and must be positive.
    pub fn new(rate: f64) -> Self {
        Self::with_backoff(rate, MIN_BACKOFF, MAX_BACKOFF)
    }

    pub fn with_backoff(rate: f64, min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            rate,
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            inner: Mutex::new(Inner {
                state: PacingState::NotStarted,
                start: None,
                admitted: 0,
            }),
        }
    }

    /// Starts the clock. Has no effect unless the controller is NotStarted.
    pub fn start(&self, start: Instant) {
        let mut inner = self.lock();
        if inner.state == PacingState::NotStarted {
            inner.state = PacingState::Running;
            inner.start = Some(start);
        }
    }

    /// No admissions are granted after this.
    pub fn stop(&self) {
        self.lock().state = PacingState::Stopped;
    }

    pub fn state(&self) -> PacingState {
        self.lock().state
    }

    pub fn admitted(&self) -> u64 {
        self.lock().admitted
    }

    pub fn try_admit(&self) -> Admission {
        self.try_admit_at(Instant::now())
    }

    /// Admission decision as of `now`.
    pub fn try_admit_at(&self, now: Instant) -> Admission {
        let mut inner = self.lock();
        let start = match (inner.state, inner.start) {
            (PacingState::Stopped, _) => return Admission::Stopped,
            (PacingState::Running, Some(start)) => start,
            _ => return Admission::Wait(self.max_backoff),
        };

        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        let allowed = (elapsed * self.rate).floor() as u64;
        if inner.admitted < allowed {
            inner.admitted += 1;
            return Admission::Granted;
        }

        // Slot number `admitted + 1` opens at (admitted + 1) / rate seconds.
        let next_slot = (inner.admitted + 1) as f64 / self.rate;
        let until_next = (next_slot - elapsed).clamp(
            self.min_backoff.as_secs_f64(),
            self.max_backoff.as_secs_f64(),
        );
        Admission::Wait(Duration::from_secs_f64(until_next))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn granted_between(pacer: &PacingController, at: Instant) -> u64 {
        let mut granted = 0;
        while pacer.try_admit_at(at) == Admission::Granted {
            granted += 1;
        }
        granted
    }

    #[test]
    fn denies_before_start() {
        let pacer = PacingController::new(100.0);
        assert_eq!(pacer.state(), PacingState::NotStarted);
        assert!(matches!(pacer.try_admit(), Admission::Wait(_)));
        assert_eq!(pacer.admitted(), 0);
    }

    #[test]
    fn admits_floor_of_elapsed_times_rate() {
        let start = Instant::now();
        let pacer = PacingController::new(10.0);
        pacer.start(start);

        assert_eq!(granted_between(&pacer, start), 0);
        assert_eq!(granted_between(&pacer, start + Duration::from_millis(99)), 0);
        assert_eq!(granted_between(&pacer, start + Duration::from_millis(100)), 1);
        assert_eq!(granted_between(&pacer, start + Duration::from_millis(550)), 4);
        assert_eq!(granted_between(&pacer, start + Duration::from_secs(1)), 5);
        assert_eq!(pacer.admitted(), 10);
    }

    #[test]
    fn nothing_admitted_until_one_request_is_due() {
        let start = Instant::now();
        let pacer = PacingController::new(0.5);
        pacer.start(start);

        assert_eq!(granted_between(&pacer, start + Duration::from_millis(1999)), 0);
        assert_eq!(granted_between(&pacer, start + Duration::from_secs(2)), 1);
    }

    #[test]
    fn wait_is_bounded() {
        let start = Instant::now();
        let pacer = PacingController::new(1.0);
        pacer.start(start);

        match pacer.try_admit_at(start) {
            Admission::Wait(d) => assert_eq!(d, MAX_BACKOFF),
            other => panic!("expected wait, got {:?}", other),
        }

        let fast = PacingController::new(1_000_000.0);
        fast.start(start);
        assert_eq!(granted_between(&fast, start + Duration::from_millis(1)), 1000);
        match fast.try_admit_at(start + Duration::from_millis(1)) {
            Admission::Wait(d) => assert_eq!(d, MIN_BACKOFF),
            other => panic!("expected wait, got {:?}", other),
        }
    }

    #[test]
    fn tiny_rate_waits_the_longest_backoff() {
        let start = Instant::now();
        let pacer = PacingController::new(1e-20);
        pacer.start(start);

        assert_eq!(pacer.try_admit_at(start), Admission::Wait(MAX_BACKOFF));
        assert_eq!(
            pacer.try_admit_at(start + Duration::from_secs(3600)),
            Admission::Wait(MAX_BACKOFF)
        );
        assert_eq!(pacer.admitted(), 0);
    }

    #[test]
    fn wait_tracks_next_slot() {
        let start = Instant::now();
        let pacer = PacingController::new(100.0);
        pacer.start(start);

        // First slot opens at 10ms.
        match pacer.try_admit_at(start + Duration::from_millis(4)) {
            Admission::Wait(d) => {
                assert!(d >= Duration::from_millis(5) && d <= Duration::from_millis(7), "{:?}", d)
            }
            other => panic!("expected wait, got {:?}", other),
        }
    }

    #[test]
    fn stopped_is_final() {
        let start = Instant::now();
        let pacer = PacingController::new(1000.0);
        pacer.start(start);
        pacer.stop();
        pacer.start(start);

        assert_eq!(pacer.state(), PacingState::Stopped);
        assert_eq!(
            pacer.try_admit_at(start + Duration::from_secs(10)),
            Admission::Stopped
        );
    }

    #[test]
    fn concurrent_callers_share_one_budget() {
        let start = Instant::now();
        let pacer = Arc::new(PacingController::new(200.0));
        pacer.start(start);
        let at = start + Duration::from_secs(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pacer = Arc::clone(&pacer);
                std::thread::spawn(move || granted_between(&pacer, at))
            })
            .collect();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 200);
        assert_eq!(pacer.admitted(), 200);
    }
}
