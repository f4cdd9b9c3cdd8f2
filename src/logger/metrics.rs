// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Counters kept by a crypto backend.
//!
//! Every counter is a [`SharedIncMetric`]: a monotonically increasing total plus the value seen at
//! the last flush. Serializing a counter emits the delta since the previous flush, so a metrics
//! writer can dump the whole structure periodically without resetting anything by hand.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};

/// Used for defining new types of metrics that act as a counter.
pub trait IncMetric {
    /// Adds `value` to the current counter.
    fn add(&self, value: u64);
    /// Increments by 1 unit the current counter.
    fn inc(&self) {
        self.add(1);
    }
    /// Returns current value of the counter.
    fn count(&self) -> u64;
    /// Returns diff of current and old value of the counter.
    fn fetch_diff(&self) -> u64;
}

/// Representation of a metric that is expected to be incremented from more than one thread.
#[derive(Debug, Default)]
pub struct SharedIncMetric(AtomicU64, AtomicU64);

impl SharedIncMetric {
    /// Const default construction.
    pub const fn new() -> Self {
        Self(AtomicU64::new(0), AtomicU64::new(0))
    }
}

impl IncMetric for SharedIncMetric {
    // While the order specified for this operation is still Relaxed, the actual instruction will
    // be an asm "LOCK; something" and thus atomic across multiple threads.
    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn fetch_diff(&self) -> u64 {
        let snapshot = self.0.load(Ordering::Relaxed);
        let old = self.1.swap(snapshot, Ordering::Relaxed);
        snapshot - old
    }
}

impl Serialize for SharedIncMetric {
    /// Reset counters of each metrics. Here we suppose that Serialize's goal is to help with the
    /// flushing of metrics.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let snapshot = self.0.load(Ordering::Relaxed);
        let res = serializer.serialize_u64(snapshot - self.1.load(Ordering::Relaxed));

        if res.is_ok() {
            self.1.store(snapshot, Ordering::Relaxed);
        }
        res
    }
}

/// Statistics of a single crypto backend instance.
///
/// Byte and op counters are charged when an operation is accounted, before the throttle gate
/// decides whether it runs now or later.
#[derive(Debug, Default, Serialize)]
pub struct CryptodevMetrics {
    /// Symmetric encrypt operations.
    pub sym_encrypt_ops: SharedIncMetric,
    /// Symmetric decrypt operations.
    pub sym_decrypt_ops: SharedIncMetric,
    /// Bytes submitted to symmetric encrypt operations.
    pub sym_encrypt_bytes: SharedIncMetric,
    /// Bytes submitted to symmetric decrypt operations.
    pub sym_decrypt_bytes: SharedIncMetric,
    /// Asymmetric encrypt operations.
    pub asym_encrypt_ops: SharedIncMetric,
    /// Asymmetric decrypt operations.
    pub asym_decrypt_ops: SharedIncMetric,
    /// Asymmetric sign operations.
    pub asym_sign_ops: SharedIncMetric,
    /// Asymmetric verify operations.
    pub asym_verify_ops: SharedIncMetric,
    /// Bytes submitted to asymmetric encrypt operations.
    pub asym_encrypt_bytes: SharedIncMetric,
    /// Bytes submitted to asymmetric decrypt operations.
    pub asym_decrypt_bytes: SharedIncMetric,
    /// Bytes submitted to asymmetric sign operations.
    pub asym_sign_bytes: SharedIncMetric,
    /// Bytes submitted to asymmetric verify operations.
    pub asym_verify_bytes: SharedIncMetric,
    /// Operations deferred by the throttle gate.
    pub throttled_ops: SharedIncMetric,
    /// Failed session creations.
    pub session_create_fails: SharedIncMetric,
    /// Operations completed with an error status.
    pub op_fails: SharedIncMetric,
    /// Private key operations that could not use the kernel keyring.
    pub keyring_fallbacks: SharedIncMetric,
}

impl CryptodevMetrics {
    /// Total number of accounted operations, symmetric and asymmetric.
    pub fn total_ops(&self) -> u64 {
        self.sym_encrypt_ops.count()
            + self.sym_decrypt_ops.count()
            + self.asym_encrypt_ops.count()
            + self.asym_decrypt_ops.count()
            + self.asym_sign_ops.count()
            + self.asym_verify_ops.count()
    }

    /// Total number of accounted bytes, symmetric and asymmetric.
    pub fn total_bytes(&self) -> u64 {
        self.sym_encrypt_bytes.count()
            + self.sym_decrypt_bytes.count()
            + self.asym_encrypt_bytes.count()
            + self.asym_decrypt_bytes.count()
            + self.asym_sign_bytes.count()
            + self.asym_verify_bytes.count()
    }
}
