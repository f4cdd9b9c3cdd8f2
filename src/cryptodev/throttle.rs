// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission control for backend operations.
//!
//! Operations are charged one op token and `src_len` byte tokens. When the budget is exhausted
//! they are parked in a FIFO and released, in order, each time the limiter timer fires.

use std::collections::VecDeque;
use std::os::unix::io::{AsRawFd, RawFd};

use super::{CryptodevError, OpCallback, OpInfo};
use crate::rate_limiter::{RateLimiter, RateLimiterError, TokenType};
use crate::vmm_config::ThrottleConfig;

/// An operation waiting for budget.
pub struct DeferredOp {
    /// The operation.
    pub op: OpInfo,
    /// Its completion.
    pub cb: OpCallback,
    cost: u64,
}

impl std::fmt::Debug for DeferredOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredOp")
            .field("op", &self.op)
            .field("cost", &self.cost)
            .finish()
    }
}

/// Outcome of [`ThrottleGate::admit`].
#[derive(Debug)]
pub enum Admission {
    /// Budget was available, the operation can run now.
    Run(DeferredOp),
    /// The operation was queued.
    Deferred,
}

/// Token bucket gate with a deferred FIFO.
#[derive(Debug)]
pub struct ThrottleGate {
    limiter: RateLimiter,
    config: ThrottleConfig,
    deferred: VecDeque<DeferredOp>,
}

impl ThrottleGate {
    /// Creates a gate enforcing `config`.
    pub fn new(config: ThrottleConfig) -> Result<Self, CryptodevError> {
        config
            .validate()
            .map_err(|err| CryptodevError::InvalidThrottle(err.to_string()))?;
        let limiter = RateLimiter::try_from(config)
            .map_err(|err| CryptodevError::InvalidThrottle(err.to_string()))?;
        Ok(ThrottleGate {
            limiter,
            config,
            deferred: VecDeque::new(),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Whether any limit is in effect.
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_enabled()
    }

    /// Number of operations waiting for budget.
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    fn try_consume(&mut self, cost: u64) -> bool {
        if !self.limiter.consume(1, TokenType::Ops) {
            return false;
        }
        if !self.limiter.consume(cost, TokenType::Bytes) {
            self.limiter.manual_replenish(1, TokenType::Ops);
            return false;
        }
        true
    }

    /// Charges `cost` bytes for `op`, or queues it behind earlier deferred operations.
    pub fn admit(&mut self, op: OpInfo, cb: OpCallback, cost: u64) -> Admission {
        let entry = DeferredOp { op, cb, cost };
        if !self.is_enabled() {
            return Admission::Run(entry);
        }
        if self.deferred.is_empty() && !self.limiter.is_blocked() && self.try_consume(cost) {
            return Admission::Run(entry);
        }
        self.deferred.push_back(entry);
        Admission::Deferred
    }

    /// Handles a timer event and returns the operations that may run now, in submission order.
    pub fn on_timer(&mut self) -> Result<Vec<DeferredOp>, RateLimiterError> {
        self.limiter.event_handler()?;
        let mut ready = Vec::new();
        while let Some(front) = self.deferred.front() {
            if self.is_enabled() && !self.try_consume(front.cost) {
                break;
            }
            ready.extend(self.deferred.pop_front());
        }
        Ok(ready)
    }

    /// Applies a new configuration.
    ///
    /// An invalid configuration leaves the current one in place. When the new configuration
    /// disables throttling, every deferred operation is returned for immediate execution.
    pub fn reconfigure(
        &mut self,
        config: ThrottleConfig,
    ) -> Result<Vec<DeferredOp>, CryptodevError> {
        config
            .validate()
            .map_err(|err| CryptodevError::InvalidThrottle(err.to_string()))?;
        self.limiter
            .update_buckets(config.bytes_bucket(), config.ops_bucket());
        self.config = config;
        if self.is_enabled() {
            return Ok(Vec::new());
        }
        Ok(self.take_all())
    }

    /// Removes every deferred operation.
    pub fn take_all(&mut self) -> Vec<DeferredOp> {
        self.deferred.drain(..).collect()
    }
}

impl AsRawFd for ThrottleGate {
    fn as_raw_fd(&self) -> RawFd {
        self.limiter.as_raw_fd()
    }
}
