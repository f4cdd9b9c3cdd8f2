// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Backends for a virtio-crypto device.
//!
//! A frontend creates sessions and submits operations to a
//! [`CryptodevBackend`](cryptodev::backend::CryptodevBackend). Two implementations exist:
//! a synchronous software backend and an asynchronous backend offloading RSA private key
//! operations to the kernel keyring from a pool of worker threads.

#![warn(missing_docs)]

pub mod crypto;
pub mod cryptodev;
pub mod logger;
pub mod rate_limiter;
pub mod vmm_config;
