use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// A monotonic nanosecond clock.
///
/// The limiter only ever compares instants, so any origin works as long as
/// the readings never go backwards.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Nanoseconds elapsed since an arbitrary fixed origin.
    fn now_nanos(&self) -> i64;
}

/// The default [`Clock`], backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Lock-free leaky bucket of credits.
///
/// Credits accrue at `credits_per_second` up to `max_balance`; a permit costs
/// one credit. Instead of storing the balance directly, the bucket stores a
/// "debit timestamp": the instant at which the balance was last zero. The
/// current balance is then `now - debit` scaled by the accrual rate, which
/// lets [`check_credit`](RateLimiter::check_credit) run as a single
/// compare-and-swap loop with no lock and no stored float state.
///
/// The bucket starts full, so a burst of up to `max_balance` permits is
/// granted immediately after construction.
pub struct RateLimiter<C = MonotonicClock> {
    credits_per_nano: f64,
    max_balance_nanos: i64,
    debit_nanos: AtomicI64,
    clock: C,
}

impl RateLimiter<MonotonicClock> {
    /// A limiter granting `credits_per_second` permits per second with a
    /// burst allowance of `max_balance` permits.
    pub fn new(credits_per_second: f64, max_balance: f64) -> Self {
        RateLimiter::with_clock(credits_per_second, max_balance, MonotonicClock::new())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// As [`RateLimiter::new`], but reading time from the given clock.
    pub fn with_clock(credits_per_second: f64, max_balance: f64, clock: C) -> Self {
        let (credits_per_nano, max_balance_nanos) = scale(credits_per_second, max_balance);
        let debit_nanos = AtomicI64::new(clock.now_nanos() - max_balance_nanos);
        RateLimiter {
            credits_per_nano,
            max_balance_nanos,
            debit_nanos,
            clock,
        }
    }

    /// Try to withdraw `cost` credits. Returns `false` without blocking if
    /// the balance is insufficient; the balance is left untouched in that
    /// case.
    pub fn check_credit(&self, cost: f64) -> bool {
        // A non-positive rate never grants.
        if self.credits_per_nano <= 0.0 {
            return false;
        }
        let cost_nanos = (cost / self.credits_per_nano) as i64;
        let mut debit = self.debit_nanos.load(Ordering::Relaxed);
        loop {
            let now = self.clock.now_nanos();
            let balance = now.saturating_sub(debit).min(self.max_balance_nanos) - cost_nanos;
            if balance < 0 {
                return false;
            }
            match self.debit_nanos.compare_exchange_weak(
                debit,
                now - balance,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => debit = current,
            }
        }
    }

    /// Replace the rate and burst allowance, keeping the accumulated balance
    /// proportionally. Used when a remote strategy changes the target rate.
    pub fn update(&mut self, credits_per_second: f64, max_balance: f64) {
        let now = self.clock.now_nanos();
        let old_balance = now
            .saturating_sub(self.debit_nanos.load(Ordering::Relaxed))
            .min(self.max_balance_nanos);
        let fraction = if self.max_balance_nanos > 0 {
            old_balance as f64 / self.max_balance_nanos as f64
        } else {
            1.0
        };

        let (credits_per_nano, max_balance_nanos) = scale(credits_per_second, max_balance);
        self.credits_per_nano = credits_per_nano;
        self.max_balance_nanos = max_balance_nanos;
        let new_balance = (max_balance_nanos as f64 * fraction) as i64;
        self.debit_nanos.store(now - new_balance, Ordering::Relaxed);
    }
}

fn scale(credits_per_second: f64, max_balance: f64) -> (f64, i64) {
    let credits_per_nano = credits_per_second / 1e9;
    if credits_per_nano > 0.0 {
        (credits_per_nano, (max_balance / credits_per_nano) as i64)
    } else {
        (0.0, 0)
    }
}

impl<C: fmt::Debug> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("credits_per_nano", &self.credits_per_nano)
            .field("max_balance_nanos", &self.max_balance_nanos)
            .field("clock", &self.clock)
            .finish()
    }
}
