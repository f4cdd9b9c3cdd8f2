// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Defines the configuration of crypto device backends.

use serde::{Deserialize, Serialize};

use crate::cryptodev::backend::CryptodevBackend;
use crate::cryptodev::client::CryptodevBackendType;
use crate::cryptodev::lkcf::LKCF_DEFAULT_WORKERS;
use crate::cryptodev::CryptodevError;
use crate::rate_limiter::{BucketUpdate, RateLimiter, RateLimiterError, TokenBucket};

/// Largest accepted throttle rate.
pub const THROTTLE_VALUE_MAX: u64 = 1_000_000_000_000_000;

// Buckets refill completely within one second.
const THROTTLE_REFILL_TIME_MS: u64 = 1000;

/// Errors associated with the crypto device configuration.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum CryptodevConfigError {
    /// Crypto device with ID {0} already exists.
    DuplicateId(String),
    /// No crypto device with ID {0} is configured.
    UnknownId(String),
    /// Throttle {0} value {1} exceeds the maximum
    ThrottleValue(&'static str, u64),
    /// Only one queue is supported, got {0}
    InvalidQueues(u32),
    /// The lkcf backend needs at least one worker
    NoWorkers,
    /// Cannot create the backend: {0}
    Backend(#[from] CryptodevError),
}

/// Byte and operation rates enforced on a backend. `0` leaves the rate unlimited.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Bytes per second.
    #[serde(default)]
    pub bps: u64,
    /// Operations per second.
    #[serde(default)]
    pub ops: u64,
}

impl ThrottleConfig {
    /// Checks both rates against [`THROTTLE_VALUE_MAX`].
    pub fn validate(&self) -> Result<(), CryptodevConfigError> {
        if self.bps > THROTTLE_VALUE_MAX {
            return Err(CryptodevConfigError::ThrottleValue("bps", self.bps));
        }
        if self.ops > THROTTLE_VALUE_MAX {
            return Err(CryptodevConfigError::ThrottleValue("ops", self.ops));
        }
        Ok(())
    }

    /// Whether any rate is limited.
    pub fn is_enabled(&self) -> bool {
        self.bps != 0 || self.ops != 0
    }

    fn bucket(rate: u64) -> BucketUpdate {
        match TokenBucket::new(rate, 0, THROTTLE_REFILL_TIME_MS) {
            Some(bucket) => BucketUpdate::Update(bucket),
            None => BucketUpdate::Disabled,
        }
    }

    /// Bucket applying `bps`.
    pub fn bytes_bucket(&self) -> BucketUpdate {
        Self::bucket(self.bps)
    }

    /// Bucket applying `ops`.
    pub fn ops_bucket(&self) -> BucketUpdate {
        Self::bucket(self.ops)
    }
}

impl TryFrom<ThrottleConfig> for RateLimiter {
    type Error = RateLimiterError;

    fn try_from(config: ThrottleConfig) -> Result<Self, Self::Error> {
        RateLimiter::new(
            config.bps,
            0,
            THROTTLE_REFILL_TIME_MS,
            config.ops,
            0,
            THROTTLE_REFILL_TIME_MS,
        )
    }
}

fn default_queues() -> u32 {
    1
}

fn default_workers() -> usize {
    LKCF_DEFAULT_WORKERS
}

/// Configuration of one crypto device backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CryptodevConfig {
    /// Unique identifier of the backend.
    pub id: String,
    /// Backend implementation.
    pub backend: CryptodevBackendType,
    /// Number of queues.
    #[serde(default = "default_queues")]
    pub queues: u32,
    /// Optional rate limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleConfig>,
    /// Worker threads of the lkcf backend.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl CryptodevConfig {
    /// Checks the configuration without creating anything.
    pub fn validate(&self) -> Result<(), CryptodevConfigError> {
        if self.queues != 1 {
            return Err(CryptodevConfigError::InvalidQueues(self.queues));
        }
        if self.backend == CryptodevBackendType::Lkcf && self.workers == 0 {
            return Err(CryptodevConfigError::NoWorkers);
        }
        self.throttle.unwrap_or_default().validate()
    }
}

/// Holds the configurations of every crypto device backend.
#[derive(Debug, Default, Clone)]
pub struct CryptodevBuilder {
    configs: Vec<CryptodevConfig>,
}

impl CryptodevBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a configuration. Ids are unique.
    pub fn insert(&mut self, config: CryptodevConfig) -> Result<(), CryptodevConfigError> {
        if self.configs.iter().any(|c| c.id == config.id) {
            return Err(CryptodevConfigError::DuplicateId(config.id));
        }
        config.validate()?;
        self.configs.push(config);
        Ok(())
    }

    /// Configurations inserted so far.
    pub fn configs(&self) -> &[CryptodevConfig] {
        &self.configs
    }

    /// Creates and initializes the backend configured under `id`.
    pub fn build(&self, id: &str) -> Result<CryptodevBackend, CryptodevConfigError> {
        let config = self
            .configs
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CryptodevConfigError::UnknownId(id.to_string()))?;
        CryptodevBackend::from_config(config)
    }
}
