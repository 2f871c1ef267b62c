use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

// keep the counter map from growing without bound
const CLEANUP_THRESHOLD: usize = 1000;

pub enum RateLimitDecision {
    Allowed,
    Denied { retry_after_seconds: u64 },
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, caller: &str) -> RateLimitDecision;
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed window counter per caller, shared between worker threads.
#[derive(Debug, Clone)]
pub struct BuiltinRateLimiter {
    limit: u32,
    window: Duration,
    counters: Arc<Mutex<HashMap<String, Window>>>,
}

impl BuiltinRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        BuiltinRateLimiter {
            limit,
            window,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl RateLimiter for BuiltinRateLimiter {
    fn check(&self, caller: &str) -> RateLimitDecision {
        let locked = self.counters.lock();
        match locked {
            Ok(mut locked) => {
                let now = Instant::now();
                if locked.len() > CLEANUP_THRESHOLD {
                    let window = self.window;
                    locked.retain(|_, w| now.duration_since(w.started) < window);
                }
                let entry = locked.entry(caller.to_string()).or_insert(Window {
                    started: now,
                    count: 0,
                });
                if now.duration_since(entry.started) >= self.window {
                    entry.started = now;
                    entry.count = 0;
                }
                if entry.count < self.limit {
                    entry.count += 1;
                    RateLimitDecision::Allowed
                } else {
                    let remaining = self
                        .window
                        .saturating_sub(now.duration_since(entry.started));
                    RateLimitDecision::Denied {
                        retry_after_seconds: remaining.as_secs().max(1),
                    }
                }
            }
            Err(err) => {
                // fail open, a poisoned lock should not take the api down
                error!("Unable to lock rate limit counters: {}", err);
                RateLimitDecision::Allowed
            }
        }
    }
}
