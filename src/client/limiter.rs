//! Global request pacing.
//!
//! One [`RateLimiter`] is owned by the client and shared by every call it
//! makes. [`RateLimiter::acquire`] hands out a [`RequestPermit`]; the
//! request runs while the permit is alive and dropping it marks the end of
//! the request.
//!
//! Two rules are enforced:
//! - at most `max_in_flight` permits exist at once;
//! - a new request starts no sooner than `delay` after the previous request
//!   *ended*, and no sooner than `delay` after the previous request started
//!   (the second rule only matters when several requests are in flight).

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

/// Paces and bounds outgoing requests.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    max_in_flight: usize,
    slots: Semaphore,
    /// Serialises dispatchers while they wait for their turn.
    turn: AsyncMutex<()>,
    next_start: Mutex<Instant>,
}

/// Scoped right to perform one request.
#[derive(Debug)]
pub struct RequestPermit<'a> {
    limiter: &'a RateLimiter,
    _slot: Option<SemaphorePermit<'a>>,
}

impl RateLimiter {
    pub fn new(delay: Duration, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            delay,
            max_in_flight,
            slots: Semaphore::new(max_in_flight),
            turn: AsyncMutex::new(()),
            next_start: Mutex::new(Instant::now()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }

    /// Wait for a concurrency slot and for the pacing delay to elapse.
    pub async fn acquire(&self) -> RequestPermit<'_> {
        // The semaphore is never closed, so `ok()` always yields a permit.
        let slot = self.slots.acquire().await.ok();
        let _turn = self.turn.lock().await;

        loop {
            let ready_at = *self.next_start.lock().unwrap_or_else(|e| e.into_inner());
            if ready_at <= Instant::now() {
                break;
            }
            // A permit dropped while we slept may push the gate further out.
            tokio::time::sleep_until(ready_at).await;
        }

        let mut next = self.next_start.lock().unwrap_or_else(|e| e.into_inner());
        *next = Instant::now() + self.delay;

        RequestPermit {
            limiter: self,
            _slot: slot,
        }
    }

    fn finish(&self) {
        let mut next = self.next_start.lock().unwrap_or_else(|e| e.into_inner());
        let after_end = Instant::now() + self.delay;
        if after_end > *next {
            *next = after_end;
        }
    }
}

impl Drop for RequestPermit<'_> {
    fn drop(&mut self) {
        self.limiter.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(2), 1);
        let start = Instant::now();
        let _permit = limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_counts_from_end_of_previous_request() {
        let limiter = RateLimiter::new(Duration::from_secs(2), 1);
        let start = Instant::now();

        let permit = limiter.acquire().await;
        // The request itself takes 5 seconds.
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(permit);

        let _second = limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_dispatches_are_still_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 3);
        let start = Instant::now();

        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        let c = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        drop((a, b, c));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_is_bounded() {
        let limiter = RateLimiter::new(Duration::ZERO, 1);
        let first = limiter.acquire().await;

        let second = tokio::time::timeout(Duration::from_secs(10), limiter.acquire()).await;
        assert!(second.is_err(), "second permit must wait for the first");

        drop(first);
        let _second = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped() {
        let limiter = RateLimiter::new(Duration::ZERO, 0);
        assert_eq!(limiter.max_in_flight(), 1);
    }
}
