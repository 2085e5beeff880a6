// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Burst/interval limiter for log messages emitted from interrupt context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Window {
    begin: Option<Instant>,
    printed: u32,
}

pub struct RateLimit {
    interval: Duration,
    burst: u32,
    window: spin::Mutex<Window>,
    missed: AtomicU64,
}

impl RateLimit {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            burst,
            window: spin::Mutex::new(Window {
                begin: None,
                printed: 0,
            }),
            missed: AtomicU64::new(0),
        }
    }

    /// Returns true if the caller may emit a message now.
    ///
    /// Never spins: a concurrent caller holding the window counts as a miss.
    pub fn check(&self) -> bool {
        if self.interval.is_zero() {
            return true;
        }

        let Some(mut window) = self.window.try_lock() else {
            self.missed.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let now = Instant::now();
        match window.begin {
            Some(begin) if now.duration_since(begin) < self.interval => {}
            _ => {
                let missed = self.missed.swap(0, Ordering::Relaxed);
                if missed > 0 {
                    log::warn!("inteld: {} hardware error messages suppressed", missed);
                }
                window.begin = Some(now);
                window.printed = 0;
            }
        }

        if window.printed < self.burst {
            window.printed += 1;
            true
        } else {
            self.missed.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_suppress() {
        let rl = RateLimit::new(Duration::from_secs(60), 3);
        assert!(rl.check());
        assert!(rl.check());
        assert!(rl.check());
        assert!(!rl.check());
        assert!(!rl.check());
        assert_eq!(rl.missed(), 2);
    }

    #[test]
    fn test_window_resets() {
        let rl = RateLimit::new(Duration::from_millis(10), 1);
        assert!(rl.check());
        assert!(!rl.check());
        std::thread::sleep(Duration::from_millis(20));
        assert!(rl.check());
        assert_eq!(rl.missed(), 0);
    }

    #[test]
    fn test_zero_interval_never_limits() {
        let rl = RateLimit::new(Duration::ZERO, 0);
        for _ in 0..100 {
            assert!(rl.check());
        }
    }
}
