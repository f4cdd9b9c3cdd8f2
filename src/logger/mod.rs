// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging and metrics for the crypto backends.
//!
//! Log records go through the `log` facade so the embedding VMM decides where they end up.

mod metrics;

pub use log::{debug, error, info, warn};

pub use self::metrics::{CryptodevMetrics, IncMetric, SharedIncMetric};
