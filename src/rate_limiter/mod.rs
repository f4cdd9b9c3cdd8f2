// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Token bucket rate limiting backed by a timer file descriptor.
//!
//! A [`RateLimiter`] holds an optional bucket for bytes and an optional bucket for operations.
//! When a consume request cannot be satisfied the limiter arms a one-shot [`TimerFd`]; the owner
//! polls that descriptor and calls [`RateLimiter::event_handler`] once it fires, after which
//! consuming can be retried.

use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use std::{fmt, io};

use timerfd::{ClockId, SetTimeFlags, TimerFd, TimerState};

/// Errors of the rate limiter.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum RateLimiterError {
    /// Rate limiter event handler called without a present timer
    SpuriousRateLimiterEvent,
    /// Cannot create timer: {0}
    Timer(io::Error),
}

// Interval at which the refill timer fires when a bucket runs dry.
const REFILL_TIMER_INTERVAL_MS: u64 = 100;
const TIMER_REFILL_DURATION: Duration = Duration::from_millis(REFILL_TIMER_INTERVAL_MS);

const NANOSEC_IN_ONE_MILLISEC: u64 = 1_000_000;

// Euclid's two-thousand-year-old algorithm for finding the greatest common divisor.
fn gcd(x: u64, y: u64) -> u64 {
    let mut x = x;
    let mut y = y;
    while y != 0 {
        let t = y;
        y = x % y;
        x = t;
    }
    x
}

/// Enum describing the outcomes of a `reduce()` call on a `TokenBucket`.
#[derive(Clone, Debug, PartialEq)]
pub enum BucketReduction {
    /// There are not enough tokens to complete the operation.
    Failure,
    /// A part of the available tokens have been consumed.
    Success,
    /// A number of tokens `inner` times larger than the bucket size have been consumed.
    OverConsumption(f64),
}

/// TokenBucket provides a lower level interface to rate limiting with a
/// configurable capacity, refill-rate and initial burst.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBucket {
    // Bucket defining traits.
    size: u64,
    // Initial burst size.
    initial_one_time_burst: u64,
    // Complete refill time in milliseconds.
    refill_time: u64,

    // Internal state descriptors.

    // Number of free initial tokens, that can be consumed at no cost.
    one_time_burst: u64,
    // Current token budget.
    budget: u64,
    // Last time this token bucket saw activity.
    last_update: Instant,

    // Fields used for pre-processing optimizations.
    processed_capacity: u64,
    processed_refill_time: u64,
}

impl TokenBucket {
    /// Creates a `TokenBucket` wrapped in an `Option`.
    ///
    /// TokenBucket created is of `size` total capacity and takes `complete_refill_time_ms`
    /// milliseconds to go from zero tokens to total capacity. The `one_time_burst` is initial
    /// extra credit on top of total capacity, that does not replenish and which can be used
    /// for an initial burst of data.
    ///
    /// If the `size` or the `complete refill time` are zero, then `None` is returned.
    pub fn new(size: u64, one_time_burst: u64, complete_refill_time_ms: u64) -> Option<Self> {
        if size == 0 || complete_refill_time_ms == 0 {
            return None;
        }
        // Refill is `elapsed_ns * size / refill_ns`. Both factors are reduced by their gcd so
        // the product stays within u128 in `auto_replenish`.
        let complete_refill_time_ns = complete_refill_time_ms.checked_mul(NANOSEC_IN_ONE_MILLISEC)?;
        let common_factor = gcd(size, complete_refill_time_ns);
        let processed_capacity: u64 = size / common_factor;
        let processed_refill_time: u64 = complete_refill_time_ns / common_factor;

        Some(TokenBucket {
            size,
            one_time_burst,
            initial_one_time_burst: one_time_burst,
            refill_time: complete_refill_time_ms,
            budget: size,
            last_update: Instant::now(),
            processed_capacity,
            processed_refill_time,
        })
    }

    // Adds the tokens earned since `last_update`.
    #[allow(clippy::cast_possible_truncation)]
    fn auto_replenish(&mut self) {
        let now = Instant::now();
        let time_delta = (now - self.last_update).as_nanos();

        if time_delta >= u128::from(self.refill_time * NANOSEC_IN_ONE_MILLISEC) {
            self.budget = self.size;
            self.last_update = now;
        } else {
            // time_delta is below the refill time in ns, which fits a u64, so the u128
            // products below cannot overflow.
            let processed_capacity = u128::from(self.processed_capacity);
            let processed_refill_time = u128::from(self.processed_refill_time);

            let tokens = (time_delta * processed_capacity) / processed_refill_time;

            // Only advance `last_update` by the time the whole tokens took, so the fractional
            // remainder carries over to the next call. Rounded up so no nanosecond counts twice.
            let mut time_adjustment = tokens * processed_refill_time / processed_capacity;
            if tokens * processed_refill_time % processed_capacity != 0 {
                time_adjustment += 1;
            }

            // The leftover is shorter than the time needed for one token.
            debug_assert!(time_adjustment <= time_delta);
            debug_assert!(
                (time_delta - time_adjustment) * processed_capacity <= processed_refill_time
            );

            self.last_update += Duration::from_nanos(time_adjustment as u64);
            self.budget = std::cmp::min(self.budget.saturating_add(tokens as u64), self.size);
        }
    }

    /// Attempts to consume `tokens` from the bucket and returns whether the action succeeded.
    pub fn reduce(&mut self, mut tokens: u64) -> BucketReduction {
        // The one time burst is spent first.
        if self.one_time_burst > 0 {
            if self.one_time_burst >= tokens {
                self.one_time_burst -= tokens;
                self.last_update = Instant::now();
                return BucketReduction::Success;
            }
            tokens -= self.one_time_burst;
            self.one_time_burst = 0;
        }

        if tokens > self.budget {
            self.auto_replenish();

            if tokens > self.size {
                crate::logger::error!(
                    "CRYPTODEV: consumed {} tokens from bucket of size {}",
                    tokens,
                    self.size
                );
                // Drain the bucket and report how many bucket sizes are still owed.
                tokens -= self.budget;
                self.budget = 0;
                #[allow(clippy::cast_precision_loss)]
                return BucketReduction::OverConsumption(tokens as f64 / self.size as f64);
            }

            if tokens > self.budget {
                return BucketReduction::Failure;
            }
        }

        self.budget -= tokens;
        BucketReduction::Success
    }

    /// Gives back `tokens`, e.g. to undo a `reduce()`.
    pub fn force_replenish(&mut self, tokens: u64) {
        // While burst credit remains, refunds go to the burst.
        if self.one_time_burst > 0 {
            self.one_time_burst = std::cmp::min(
                self.one_time_burst.saturating_add(tokens),
                self.initial_one_time_burst,
            );
            return;
        }
        self.budget = std::cmp::min(self.budget.saturating_add(tokens), self.size);
    }

    /// Returns the capacity of the token bucket.
    pub fn capacity(&self) -> u64 {
        self.size
    }

    /// Returns the remaining one time burst budget.
    pub fn one_time_burst(&self) -> u64 {
        self.one_time_burst
    }

    /// Returns the time in milliseconds needed to fill the bucket from empty.
    pub fn refill_time_ms(&self) -> u64 {
        self.refill_time
    }

    /// Returns the current budget (one time burst allowance notwithstanding).
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Returns the initially configured one time burst budget.
    pub fn initial_one_time_burst(&self) -> u64 {
        self.initial_one_time_burst
    }
}

/// Enum that describes the type of token used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Token type used for bandwidth limiting.
    Bytes,
    /// Token type used for operations/second limiting.
    Ops,
}

/// Enum that describes the type of token bucket update.
#[derive(Debug)]
pub enum BucketUpdate {
    /// No Update - same as before.
    None,
    /// Rate Limiting is disabled on this bucket.
    Disabled,
    /// Rate Limiting enabled with updated bucket.
    Update(TokenBucket),
}

/// Limits bytes per second, operations per second, or both.
///
/// Buckets refill lazily on `consume()`. Once a bucket runs dry the limiter arms its timer
/// and refuses every request until the owner sees the timer fire and calls
/// `event_handler()`.
pub struct RateLimiter {
    bandwidth: Option<TokenBucket>,
    ops: Option<TokenBucket>,

    timer_fd: TimerFd,
    // Internal flag that quickly determines timer state.
    timer_active: bool,
}

impl PartialEq for RateLimiter {
    fn eq(&self, other: &RateLimiter) -> bool {
        self.bandwidth == other.bandwidth && self.ops == other.ops
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RateLimiter {{ bandwidth: {:?}, ops: {:?} }}",
            self.bandwidth, self.ops
        )
    }
}

impl RateLimiter {
    /// Creates a limiter from the parameters of its two buckets.
    ///
    /// A bucket with a zero size or a zero refill time is disabled. See [`TokenBucket::new`].
    ///
    /// # Errors
    ///
    /// Fails when the timer cannot be created.
    pub fn new(
        bytes_total_capacity: u64,
        bytes_one_time_burst: u64,
        bytes_complete_refill_time_ms: u64,
        ops_total_capacity: u64,
        ops_one_time_burst: u64,
        ops_complete_refill_time_ms: u64,
    ) -> Result<Self, RateLimiterError> {
        let bytes_token_bucket = TokenBucket::new(
            bytes_total_capacity,
            bytes_one_time_burst,
            bytes_complete_refill_time_ms,
        );

        let ops_token_bucket = TokenBucket::new(
            ops_total_capacity,
            ops_one_time_burst,
            ops_complete_refill_time_ms,
        );

        // Created even when both buckets are disabled, `update_buckets()` may enable them later.
        let timer_fd = TimerFd::new_custom(ClockId::Monotonic, true, true)
            .map_err(RateLimiterError::Timer)?;

        Ok(RateLimiter {
            bandwidth: bytes_token_bucket,
            ops: ops_token_bucket,
            timer_fd,
            timer_active: false,
        })
    }

    fn activate_timer(&mut self, dur: Duration) {
        // TimerFd::set_state() panics if the kernel refuses to arm the timer.
        self.timer_fd
            .set_state(TimerState::Oneshot(dur), SetTimeFlags::Default);
        self.timer_active = true;
    }

    /// Attempts to consume tokens and returns whether that is possible.
    ///
    /// If rate limiting is disabled on provided `token_type`, this function will always succeed.
    pub fn consume(&mut self, tokens: u64, token_type: TokenType) -> bool {
        if self.timer_active {
            return false;
        }

        let token_bucket = match token_type {
            TokenType::Bytes => self.bandwidth.as_mut(),
            TokenType::Ops => self.ops.as_mut(),
        };
        if let Some(bucket) = token_bucket {
            let refill_time = bucket.refill_time_ms();
            match bucket.reduce(tokens) {
                BucketReduction::Failure => {
                    if !self.timer_active {
                        self.activate_timer(TIMER_REFILL_DURATION);
                    }
                    false
                }
                BucketReduction::Success => true,
                BucketReduction::OverConsumption(ratio) => {
                    // Allowed, but the debt of `ratio` full buckets blocks the limiter for
                    // `ratio * refill_time`.
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    self.activate_timer(Duration::from_millis((ratio * refill_time as f64) as u64));
                    true
                }
            }
        } else {
            true
        }
    }

    /// Refunds tokens taken by an earlier `consume()`.
    pub fn manual_replenish(&mut self, tokens: u64, token_type: TokenType) {
        let token_bucket = match token_type {
            TokenType::Bytes => self.bandwidth.as_mut(),
            TokenType::Ops => self.ops.as_mut(),
        };
        if let Some(bucket) = token_bucket {
            bucket.force_replenish(tokens);
        }
    }

    /// Whether the timer is armed. The descriptor becomes readable when it fires.
    pub fn is_blocked(&self) -> bool {
        self.timer_active
    }

    /// Acknowledges a timer event and unblocks the limiter.
    ///
    /// # Errors
    ///
    /// Fails when the timer has not fired.
    pub fn event_handler(&mut self) -> Result<(), RateLimiterError> {
        match self.timer_fd.read() {
            0 => Err(RateLimiterError::SpuriousRateLimiterEvent),
            _ => {
                self.timer_active = false;
                Ok(())
            }
        }
    }

    /// Replaces or disables the buckets. New buckets start full.
    pub fn update_buckets(&mut self, bytes: BucketUpdate, ops: BucketUpdate) {
        match bytes {
            BucketUpdate::Disabled => self.bandwidth = None,
            BucketUpdate::Update(tb) => self.bandwidth = Some(tb),
            BucketUpdate::None => (),
        };
        match ops {
            BucketUpdate::Disabled => self.ops = None,
            BucketUpdate::Update(tb) => self.ops = Some(tb),
            BucketUpdate::None => (),
        };
    }

    /// Returns whether any of the buckets is configured.
    pub fn is_enabled(&self) -> bool {
        self.bandwidth.is_some() || self.ops.is_some()
    }

    /// Returns an immutable view of the inner bandwidth token bucket.
    pub fn bandwidth(&self) -> Option<&TokenBucket> {
        self.bandwidth.as_ref()
    }

    /// Returns an immutable view of the inner ops token bucket.
    pub fn ops(&self) -> Option<&TokenBucket> {
        self.ops.as_ref()
    }
}

impl AsRawFd for RateLimiter {
    fn as_raw_fd(&self) -> RawFd {
        self.timer_fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    impl TokenBucket {
        fn reset(&mut self) {
            self.budget = self.size;
            self.last_update = Instant::now();
        }

        fn get_last_update(&self) -> &Instant {
            &self.last_update
        }

        fn get_processed_capacity(&self) -> u64 {
            self.processed_capacity
        }

        fn get_processed_refill_time(&self) -> u64 {
            self.processed_refill_time
        }
    }

    impl RateLimiter {
        fn get_token_bucket(&self, token_type: TokenType) -> Option<&TokenBucket> {
            match token_type {
                TokenType::Bytes => self.bandwidth.as_ref(),
                TokenType::Ops => self.ops.as_ref(),
            }
        }
    }

    #[test]
    fn test_token_bucket_create() {
        let before = Instant::now();
        let tb = TokenBucket::new(1000, 0, 1000).unwrap();
        assert_eq!(tb.capacity(), 1000);
        assert_eq!(tb.budget(), 1000);
        assert!(*tb.get_last_update() >= before);
        let after = Instant::now();
        assert!(*tb.get_last_update() <= after);
        assert_eq!(tb.get_processed_capacity(), 1);
        assert_eq!(tb.get_processed_refill_time(), 1_000_000);

        // Zero size or refill time disables the bucket.
        assert!(TokenBucket::new(0, 1234, 1000).is_none());
        assert!(TokenBucket::new(100, 1234, 0).is_none());
        assert!(TokenBucket::new(0, 1234, 0).is_none());
    }

    #[test]
    fn test_token_bucket_preprocess() {
        let tb = TokenBucket::new(1000, 0, 1000).unwrap();
        assert_eq!(tb.get_processed_capacity(), 1);
        assert_eq!(tb.get_processed_refill_time(), NANOSEC_IN_ONE_MILLISEC);

        let thousand = 1000;
        let tb = TokenBucket::new(3 * 7 * 11 * 19 * thousand, 0, 7 * 11 * 13 * 17).unwrap();
        assert_eq!(tb.get_processed_capacity(), 3 * 19);
        assert_eq!(
            tb.get_processed_refill_time(),
            13 * 17 * (NANOSEC_IN_ONE_MILLISEC / thousand)
        );
    }

    #[test]
    fn test_token_bucket_reduce() {
        // 1 token per ms.
        let capacity = 1000;
        let refill_ms = 1000;
        let mut tb = TokenBucket::new(capacity, 0, refill_ms).unwrap();

        assert_eq!(tb.reduce(123), BucketReduction::Success);
        assert_eq!(tb.budget(), capacity - 123);
        assert_eq!(tb.reduce(capacity), BucketReduction::Failure);

        tb.reset();
        assert_eq!(tb.budget(), capacity);

        // Over-consumption empties the bucket and reports the ratio.
        let mut tb = TokenBucket::new(100, 0, 1000).unwrap();
        assert_eq!(tb.reduce(150), BucketReduction::OverConsumption(0.5));
        assert_eq!(tb.budget(), 0);
    }

    #[test]
    fn test_token_bucket_one_time_burst() {
        let mut tb = TokenBucket::new(100, 50, 1000).unwrap();
        assert_eq!(tb.reduce(30), BucketReduction::Success);
        assert_eq!(tb.one_time_burst(), 20);
        assert_eq!(tb.budget(), 100);
        // Burst covers part of the request, the budget pays for the rest.
        assert_eq!(tb.reduce(40), BucketReduction::Success);
        assert_eq!(tb.one_time_burst(), 0);
        assert_eq!(tb.budget(), 80);
        assert_eq!(tb.initial_one_time_burst(), 50);
    }

    #[test]
    fn test_token_bucket_replenish() {
        let mut tb = TokenBucket::new(100, 0, 1000).unwrap();
        assert_eq!(tb.reduce(100), BucketReduction::Success);
        tb.force_replenish(40);
        assert_eq!(tb.budget(), 40);
        // Replenishing never goes above the capacity.
        tb.force_replenish(1000);
        assert_eq!(tb.budget(), 100);
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let mut l = RateLimiter::new(0, 0, 0, 0, 0, 0).unwrap();

        assert!(!l.is_blocked());
        assert!(!l.is_enabled());
        assert!(l.consume(u64::MAX, TokenType::Ops));
        assert!(l.consume(u64::MAX, TokenType::Bytes));
        // No timer was armed.
        l.event_handler().unwrap_err();
        assert_eq!(
            format!("{:?}", l.event_handler()),
            "Err(SpuriousRateLimiterEvent)"
        );
    }

    #[test]
    fn test_rate_limiter_manual_replenish() {
        let mut l = RateLimiter::new(1000, 0, 1000, 1000, 0, 1000).unwrap();

        assert!(l.consume(123, TokenType::Bytes));
        l.manual_replenish(23, TokenType::Bytes);
        {
            let bytes_tb = l.get_token_bucket(TokenType::Bytes).unwrap();
            assert_eq!(bytes_tb.budget(), 900);
        }
        assert!(l.consume(123, TokenType::Ops));
        l.manual_replenish(23, TokenType::Ops);
        assert_eq!(l.get_token_bucket(TokenType::Ops).unwrap().budget(), 900);
    }

    #[test]
    fn test_rate_limiter_bandwidth() {
        let mut l = RateLimiter::new(1000, 0, 1000, 0, 0, 0).unwrap();
        assert!(!l.is_blocked());
        assert!(l.as_raw_fd() > 0);
        assert!(l.consume(u64::MAX, TokenType::Ops));

        assert!(l.consume(1000, TokenType::Bytes));
        assert!(!l.consume(100, TokenType::Bytes));
        assert!(l.is_blocked());
        thread::sleep(Duration::from_millis(REFILL_TIMER_INTERVAL_MS / 2));
        assert!(l.is_blocked());
        thread::sleep(Duration::from_millis(REFILL_TIMER_INTERVAL_MS / 2 + 10));
        l.event_handler().unwrap();
        assert!(!l.is_blocked());
        assert!(l.consume(100, TokenType::Bytes));
    }

    #[test]
    fn test_rate_limiter_ops() {
        let mut l = RateLimiter::new(0, 0, 0, 1000, 0, 1000).unwrap();
        assert!(l.consume(u64::MAX, TokenType::Bytes));

        assert!(l.consume(1000, TokenType::Ops));
        assert!(!l.consume(100, TokenType::Ops));
        assert!(l.is_blocked());
        thread::sleep(Duration::from_millis(REFILL_TIMER_INTERVAL_MS + 10));
        l.event_handler().unwrap();
        assert!(!l.is_blocked());
        assert!(l.consume(100, TokenType::Ops));
    }

    #[test]
    fn test_rate_limiter_overconsumption() {
        let mut l = RateLimiter::new(1000, 0, 1000, 1000, 0, 1000).unwrap();
        // 2.5 buckets from a full one leaves a debt of 1.5 buckets.
        assert!(l.consume(2500, TokenType::Bytes));

        thread::sleep(Duration::from_millis(1000));
        l.event_handler().unwrap_err();
        assert!(l.is_blocked());

        thread::sleep(Duration::from_millis(500));
        l.event_handler().unwrap();
        assert!(!l.is_blocked());
    }

    #[test]
    fn test_update_buckets() {
        let mut x = RateLimiter::new(1000, 2000, 1000, 10, 20, 1000).unwrap();

        let initial_bw = x.bandwidth.clone();
        let initial_ops = x.ops.clone();

        x.update_buckets(BucketUpdate::None, BucketUpdate::None);
        assert_eq!(x.bandwidth, initial_bw);
        assert_eq!(x.ops, initial_ops);

        let new_bw = TokenBucket::new(123, 0, 57).unwrap();
        let new_ops = TokenBucket::new(321, 12346, 89).unwrap();
        x.update_buckets(
            BucketUpdate::Update(new_bw.clone()),
            BucketUpdate::Update(new_ops.clone()),
        );
        assert_eq!(x.bandwidth(), Some(&new_bw));
        assert_eq!(x.ops(), Some(&new_ops));

        x.update_buckets(BucketUpdate::Disabled, BucketUpdate::Disabled);
        assert_eq!(x.bandwidth, None);
        assert_eq!(x.ops, None);
        assert!(!x.is_enabled());
    }
}
