//! Sliding-window admission control per subject.
//!
//! Every subject keeps one ordered timestamp queue per configured window.
//! On each check, timestamps older than the window are evicted first; the call
//! is admitted only if no window is saturated, and only then is `now`
//! recorded in every window. All of this happens under one lock, so two
//! concurrent callers can never both take the last slot. Subjects with
//! nothing left in any window are dropped every [`PRUNE_EVERY`] checks.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jett_core::config::GovernorConfig;
use jett_core::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Earliest delay after which a retry could be admitted.
    Limited(Duration),
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u32,
    pub duration: Duration,
}

impl Window {
    pub fn new(limit: u32, duration: Duration) -> Self {
        Self { limit, duration }
    }
}

pub const PRUNE_EVERY: u64 = 256;

#[derive(Default)]
struct Subjects {
    // One queue per window, same order as `windows`.
    queues: HashMap<String, Vec<VecDeque<Instant>>>,
    checks: u64,
}

pub struct RateLimiter {
    windows: Vec<Window>,
    state: Mutex<Subjects>,
}

impl RateLimiter {
    pub fn new(windows: Vec<Window>) -> Result<Self, ConfigError> {
        if windows.is_empty() {
            return Err(ConfigError::Invalid {
                field: "rate_limit.windows",
                reason: "at least one window is required".into(),
            });
        }
        if windows.iter().any(|w| w.limit == 0) {
            return Err(ConfigError::ZeroLimit("window"));
        }
        Ok(Self {
            windows,
            state: Mutex::new(Subjects::default()),
        })
    }

    /// Per-minute and per-hour windows from the governor config.
    pub fn from_config(cfg: &GovernorConfig) -> Result<Self, ConfigError> {
        if cfg.per_minute == 0 {
            return Err(ConfigError::ZeroLimit("per_minute"));
        }
        if cfg.per_hour == 0 {
            return Err(ConfigError::ZeroLimit("per_hour"));
        }
        Self::new(vec![
            Window::new(cfg.per_minute, Duration::from_secs(60)),
            Window::new(cfg.per_hour, Duration::from_secs(3600)),
        ])
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn try_admit(&self, subject: &str, now: Instant) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.checks += 1;
        if state.checks % PRUNE_EVERY == 0 {
            prune_idle(&self.windows, &mut state.queues, now);
        }
        let queues = state
            .queues
            .entry(subject.to_string())
            .or_insert_with(|| vec![VecDeque::new(); self.windows.len()]);

        let mut retry_after: Option<Duration> = None;
        for (window, queue) in self.windows.iter().zip(queues.iter_mut()) {
            evict(queue, window.duration, now);
            let limit = window.limit as usize;
            if queue.len() >= limit {
                // The entry whose expiry frees one slot.
                let pivot = queue[queue.len() - limit];
                let wait = window
                    .duration
                    .saturating_sub(now.saturating_duration_since(pivot));
                retry_after = Some(retry_after.map_or(wait, |w| w.max(wait)));
            }
        }

        if let Some(wait) = retry_after {
            tracing::debug!(subject, retry_after_ms = wait.as_millis() as u64, "Rate limited");
            return Admission::Limited(wait);
        }

        for queue in queues.iter_mut() {
            queue.push_back(now);
        }
        Admission::Admitted
    }

    pub fn check(&self, subject: &str) -> Admission {
        self.try_admit(subject, Instant::now())
    }

    /// Admitted calls retained for `subject` in each window, after eviction at `now`.
    pub fn retained(&self, subject: &str, now: Instant) -> Vec<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.queues.get_mut(subject) {
            Some(queues) => self
                .windows
                .iter()
                .zip(queues.iter_mut())
                .map(|(window, queue)| {
                    evict(queue, window.duration, now);
                    queue.len()
                })
                .collect(),
            None => vec![0; self.windows.len()],
        }
    }

    /// Drop subjects with no retained timestamps.
    pub fn prune(&self, now: Instant) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        prune_idle(&self.windows, &mut state.queues, now);
    }

    pub fn tracked_subjects(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queues
            .len()
    }
}

fn prune_idle(
    windows: &[Window],
    subjects: &mut HashMap<String, Vec<VecDeque<Instant>>>,
    now: Instant,
) {
    subjects.retain(|_, queues| {
        for (window, queue) in windows.iter().zip(queues.iter_mut()) {
            evict(queue, window.duration, now);
        }
        queues.iter().any(|q| !q.is_empty())
    });
}

fn evict(queue: &mut VecDeque<Instant>, duration: Duration, now: Instant) {
    while let Some(&front) = queue.front() {
        if now.saturating_duration_since(front) >= duration {
            queue.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn per_minute(limit: u32) -> RateLimiter {
        RateLimiter::new(vec![Window::new(limit, Duration::from_secs(60))]).unwrap()
    }

    #[test]
    fn two_per_minute_admits_twice_then_limits() {
        let limiter = per_minute(2);
        let t0 = Instant::now();
        assert_eq!(limiter.try_admit("userX", t0), Admission::Admitted);
        assert_eq!(
            limiter.try_admit("userX", t0 + Duration::from_millis(300)),
            Admission::Admitted
        );
        let third = limiter.try_admit("userX", t0 + Duration::from_millis(600));
        assert!(matches!(third, Admission::Limited(_)));
    }

    #[test]
    fn retry_after_counts_down_from_oldest() {
        let limiter = per_minute(2);
        let t0 = Instant::now();
        limiter.try_admit("u", t0);
        limiter.try_admit("u", t0 + Duration::from_secs(10));
        match limiter.try_admit("u", t0 + Duration::from_secs(20)) {
            Admission::Limited(wait) => assert_eq!(wait, Duration::from_secs(40)),
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[test]
    fn admitted_again_once_oldest_leaves_window() {
        let limiter = per_minute(2);
        let t0 = Instant::now();
        limiter.try_admit("u", t0);
        limiter.try_admit("u", t0 + Duration::from_secs(30));
        assert!(!limiter.try_admit("u", t0 + Duration::from_secs(59)).is_admitted());
        assert!(limiter.try_admit("u", t0 + Duration::from_secs(60)).is_admitted());
        // t0+30 and t0+60 are retained; the next is limited until t0+90.
        assert!(!limiter.try_admit("u", t0 + Duration::from_secs(61)).is_admitted());
        assert_eq!(limiter.retained("u", t0 + Duration::from_secs(61)), vec![2]);
    }

    #[test]
    fn denial_does_not_consume_capacity() {
        let limiter = per_minute(1);
        let t0 = Instant::now();
        limiter.try_admit("u", t0);
        for i in 1..10 {
            limiter.try_admit("u", t0 + Duration::from_secs(i));
        }
        assert_eq!(limiter.retained("u", t0 + Duration::from_secs(10)), vec![1]);
        assert!(limiter.try_admit("u", t0 + Duration::from_secs(60)).is_admitted());
    }

    #[test]
    fn subjects_are_independent() {
        let limiter = per_minute(1);
        let t0 = Instant::now();
        assert!(limiter.try_admit("voice-session", t0).is_admitted());
        assert!(limiter.try_admit("console", t0).is_admitted());
        assert!(!limiter.try_admit("voice-session", t0).is_admitted());
    }

    #[test]
    fn hour_window_limits_independently() {
        let limiter = RateLimiter::new(vec![
            Window::new(10, Duration::from_secs(60)),
            Window::new(3, Duration::from_secs(3600)),
        ])
        .unwrap();
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(limiter
                .try_admit("u", t0 + Duration::from_secs(i * 120))
                .is_admitted());
        }
        match limiter.try_admit("u", t0 + Duration::from_secs(600)) {
            Admission::Limited(wait) => assert_eq!(wait, Duration::from_secs(3000)),
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[test]
    fn zero_limit_rejected() {
        assert!(RateLimiter::new(vec![Window::new(0, Duration::from_secs(1))]).is_err());
        assert!(RateLimiter::new(Vec::new()).is_err());
    }

    #[test]
    fn prune_forgets_idle_subjects() {
        let limiter = per_minute(5);
        let t0 = Instant::now();
        limiter.try_admit("a", t0);
        limiter.try_admit("b", t0 + Duration::from_secs(30));
        limiter.prune(t0 + Duration::from_secs(61));
        assert_eq!(limiter.tracked_subjects(), 1);
    }

    #[test]
    fn admission_path_forgets_idle_subjects() {
        let limiter = per_minute(5);
        let t0 = Instant::now();
        for i in 0..PRUNE_EVERY - 1 {
            limiter.try_admit(&format!("caller-{i}"), t0);
        }
        assert_eq!(limiter.tracked_subjects(), (PRUNE_EVERY - 1) as usize);

        // Every earlier caller has aged out of the window by now.
        limiter.try_admit("late", t0 + Duration::from_secs(61));
        assert_eq!(limiter.tracked_subjects(), 1);
    }

    #[test]
    fn concurrent_callers_never_overadmit() {
        let limiter = Arc::new(per_minute(5));
        let now = Instant::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.try_admit("shared", now).is_admitted())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a)
            .count();
        assert_eq!(admitted, 5);
    }
}
