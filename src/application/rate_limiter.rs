//! Sliding-window rate limiter keyed by identifier string
//!
//! Evaluate-and-record is a single atomic step under one mutex so two
//! concurrent calls can never both succeed under a budget of one. State
//! is in-process only; this mirrors the single-instance scope of the rest
//! of the shared counters and is injected rather than global so callers
//! can swap in a shared store later.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct SlidingWindowLimiter {
    window: Duration,
    max_slots: u32,
    slots: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_slots: u32) -> Self {
        Self {
            window,
            max_slots,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate the key's budget and, if still within it, record a new
    /// slot. Returns the seconds to wait before retrying on rejection.
    pub fn check_and_record(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = slots.entry(key.to_string()).or_default();

        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.max_slots as usize {
            let oldest = entry.front().copied().unwrap_or(now);
            let elapsed = now.duration_since(oldest);
            let remaining = self.window.saturating_sub(elapsed);
            return Err(remaining.as_secs().max(1));
        }

        entry.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_budget_per_key() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.check_and_record("supplier-a").is_ok());
        assert!(limiter.check_and_record("supplier-a").is_ok());
        assert!(limiter.check_and_record("supplier-a").is_ok());

        let err = limiter.check_and_record("supplier-a").unwrap_err();
        assert!(err >= 1 && err <= 60);

        // Other keys are unaffected
        assert!(limiter.check_and_record("supplier-b").is_ok());
    }

    #[test]
    fn slots_expire_with_the_window() {
        let limiter = SlidingWindowLimiter::new(Duration::from_millis(30), 1);
        assert!(limiter.check_and_record("k").is_ok());
        assert!(limiter.check_and_record("k").is_err());

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check_and_record("k").is_ok());
    }
}
