//! Rate Limiter (C1).
//!
//! Bounds outbound catalog requests to a sliding 5-req/second and
//! 40-req/minute window. Grounded in the teacher's `Lazy<Mutex<...>>`
//! global-state idiom (`src/backend/database.rs`, `src/backend/cache.rs`),
//! adapted to an instance field rather than a process-wide global so tests
//! can construct independent limiters.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const SECOND_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const WAKE_BUFFER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub per_second: usize,
    pub per_minute: usize,
}

/// Sliding-window limiter over two caps: `per_second` and `per_minute`.
pub struct RateLimiter {
    per_second_cap: usize,
    per_minute_cap: usize,
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(per_second_cap: u32, per_minute_cap: u32) -> Self {
        Self {
            per_second_cap: per_second_cap as usize,
            per_minute_cap: per_minute_cap as usize,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Blocks the caller until issuing one more request satisfies both caps,
    /// then records the new request timestamp.
    pub async fn wait_if_needed(&self) {
        loop {
            let wait = {
                let mut history = self.history.lock().await;
                let now = Instant::now();

                evict_older_than(&mut history, now, MINUTE_WINDOW);

                let in_second = history.iter().filter(|t| now.duration_since(**t) < SECOND_WINDOW).count();
                let in_minute = history.len();

                if in_second >= self.per_second_cap {
                    let oldest_in_second =
                        history.iter().find(|t| now.duration_since(**t) < SECOND_WINDOW).copied().unwrap_or(now);
                    Some((oldest_in_second + SECOND_WINDOW + WAKE_BUFFER).saturating_duration_since(now))
                } else if in_minute >= self.per_minute_cap {
                    let oldest = *history.front().expect("in_minute >= cap implies non-empty history");
                    Some((oldest + MINUTE_WINDOW + WAKE_BUFFER).saturating_duration_since(now))
                } else {
                    history.push_back(now);
                    None
                }
            };

            match wait {
                Some(duration) => tokio::time::sleep(duration).await,
                None => return,
            }
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut history = self.history.lock().await;
        let now = Instant::now();
        evict_older_than(&mut history, now, MINUTE_WINDOW);

        RateLimiterStats {
            per_second: history.iter().filter(|t| now.duration_since(**t) < SECOND_WINDOW).count(),
            per_minute: history.len(),
        }
    }
}

fn evict_older_than(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = history.front() {
        if now.duration_since(*front) >= window {
            history.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn it_allows_up_to_the_per_second_cap_without_waiting() {
        let limiter = RateLimiter::new(5, 40);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait_if_needed().await;
        }
        assert!(Instant::now().duration_since(start) < Duration::from_millis(50));

        let stats = limiter.stats().await;
        assert_eq!(stats.per_second, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn it_delays_the_sixth_call_within_one_second() {
        let limiter = RateLimiter::new(5, 40);

        for _ in 0..5 {
            limiter.wait_if_needed().await;
        }

        let start = Instant::now();
        limiter.wait_if_needed().await;
        let elapsed = Instant::now().duration_since(start);

        assert!(elapsed >= SECOND_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn it_never_exceeds_the_per_minute_cap_under_burst() {
        let limiter = Arc::new(RateLimiter::new(5, 40));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait_if_needed().await;
                Instant::now()
            }));
        }

        let mut timestamps = Vec::new();
        for handle in handles {
            timestamps.push(handle.await.unwrap());
        }

        for window_start in &timestamps {
            let count = timestamps.iter().filter(|t| t.duration_since(*window_start) < SECOND_WINDOW).count();
            assert!(count <= 5, "more than 5 requests landed in a 1s window");
        }
    }
}
