//! Spam Guard — one token bucket per socket.
//!
//! An atomic token bucket with a mutex-guarded last-refill timestamp, one
//! instance per connection, extended with soft (drop) and hard
//! (disconnect) violation counting.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Tunables for one connection's bucket.
#[derive(Debug, Clone, Copy)]
pub struct SpamGuardConfig {
    pub window_seconds: u64,
    pub message_limit: u32,
    pub disconnect_threshold: u32,
    pub max_refill_seconds: u64,
}

impl Default for SpamGuardConfig {
    fn default() -> Self {
        Self {
            window_seconds: 10,
            message_limit: 50,
            disconnect_threshold: 5,
            max_refill_seconds: 10,
        }
    }
}

/// Outcome of checking one inbound frame against the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamCheck {
    /// A token was available; the frame may proceed.
    Allowed,
    /// No token available; caller should emit `speed_limit_exceeded` and
    /// drop the frame. `should_disconnect` is set once the violation
    /// count for this socket passes `disconnect_threshold`.
    Violation { should_disconnect: bool },
}

/// Per-socket token bucket plus violation counter.
pub struct SpamGuard {
    config: SpamGuardConfig,
    tokens: AtomicU32,
    last_refill: Mutex<Instant>,
    violations: AtomicU32,
}

impl SpamGuard {
    pub fn new(config: SpamGuardConfig) -> Self {
        Self {
            tokens: AtomicU32::new(config.message_limit),
            last_refill: Mutex::new(Instant::now()),
            violations: AtomicU32::new(0),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SpamGuardConfig::default())
    }

    /// Consume one token for an inbound frame.
    pub fn check(&self) -> SpamCheck {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current == 0 {
                let violations = self.violations.fetch_add(1, Ordering::SeqCst) + 1;
                return SpamCheck::Violation {
                    should_disconnect: violations >= self.config.disconnect_threshold,
                };
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return SpamCheck::Allowed;
            }
        }
    }

    fn refill(&self) {
        let rate = self.config.message_limit as f64 / self.config.window_seconds as f64;
        let mut last = self.last_refill.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(*last);
        // Clamp the elapsed refill window so a long-idle connection cannot
        // accumulate more than `message_limit` tokens.
        let clamped_secs = elapsed.as_secs_f64().min(self.config.max_refill_seconds as f64);
        let tokens_to_add = (clamped_secs * rate) as u32;

        if tokens_to_add > 0 {
            *last = now;
            loop {
                let current = self.tokens.load(Ordering::Relaxed);
                let new_value = current.saturating_add(tokens_to_add).min(self.config.message_limit);
                if self
                    .tokens
                    .compare_exchange(current, new_value, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    pub fn violation_count(&self) -> u32 {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u32 {
        self.config.message_limit
    }

    pub fn window_seconds(&self) -> u64 {
        self.config.window_seconds
    }
}
