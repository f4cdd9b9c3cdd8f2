// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The backend object handed to a crypto frontend.
//!
//! [`CryptodevBackend`] wraps one concrete [`CryptodevBackendOps`] implementation and adds
//! what every backend shares: readiness, accounting, the throttle gate and the event loop
//! hooks. Operations flow `account -> gate -> do_op`.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use serde::Serialize;

use super::builtin::BuiltinBackend;
use super::client::CryptodevBackendType;
use super::keyring::KernelKeyring;
use super::lkcf::{LkcfBackend, LkcfCompletions};
use super::throttle::{Admission, DeferredOp, ThrottleGate};
use super::virtio_crypto::*;
use super::{
    complete_session, reject_op, CryptodevBackendConf, CryptodevBackendOps, CryptodevError,
    OpCallback, OpData, OpInfo, SessionCallback, SessionInfo,
};
use crate::logger::{debug, error, info, CryptodevMetrics, IncMetric};
use crate::vmm_config::{CryptodevConfig, CryptodevConfigError, ThrottleConfig};

/// A crypto service advertised by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptodevServiceType {
    /// Symmetric ciphers.
    Cipher,
    /// Hashes.
    Hash,
    /// Message authentication codes.
    Mac,
    /// Authenticated encryption.
    Aead,
    /// Asymmetric ciphers.
    Akcipher,
}

impl CryptodevServiceType {
    const ALL: [(u32, CryptodevServiceType); 5] = [
        (VIRTIO_CRYPTO_SERVICE_CIPHER, CryptodevServiceType::Cipher),
        (VIRTIO_CRYPTO_SERVICE_HASH, CryptodevServiceType::Hash),
        (VIRTIO_CRYPTO_SERVICE_MAC, CryptodevServiceType::Mac),
        (VIRTIO_CRYPTO_SERVICE_AEAD, CryptodevServiceType::Aead),
        (VIRTIO_CRYPTO_SERVICE_AKCIPHER, CryptodevServiceType::Akcipher),
    ];
}

/// A client as reported by [`CryptodevBackend::query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CryptodevClientInfo {
    /// Queue served by the client.
    pub queue: u32,
    /// Backend kind.
    #[serde(rename = "type")]
    pub client_type: CryptodevBackendType,
}

/// Management view of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CryptodevInfo {
    /// Backend id.
    pub id: String,
    /// Advertised services.
    pub service: Vec<CryptodevServiceType>,
    /// Registered clients.
    pub client: Vec<CryptodevClientInfo>,
}

/// A crypto backend with its shared state.
pub struct CryptodevBackend {
    id: String,
    ops: Box<dyn CryptodevBackendOps>,
    conf: CryptodevBackendConf,
    gate: ThrottleGate,
    metrics: Arc<CryptodevMetrics>,
    completions: Option<LkcfCompletions>,
    ready: bool,
    used: bool,
}

impl std::fmt::Debug for CryptodevBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptodevBackend")
            .field("id", &self.id)
            .field("conf", &self.conf)
            .field("gate", &self.gate)
            .field("ready", &self.ready)
            .field("used", &self.used)
            .finish()
    }
}

impl CryptodevBackend {
    /// Wraps `ops`. The backend stays unusable until [`init`](Self::init) succeeds.
    pub fn new(
        id: impl Into<String>,
        ops: Box<dyn CryptodevBackendOps>,
        queues: u32,
        throttle: ThrottleConfig,
    ) -> Result<Self, CryptodevError> {
        Ok(CryptodevBackend {
            id: id.into(),
            ops,
            conf: CryptodevBackendConf::new(queues),
            gate: ThrottleGate::new(throttle)?,
            metrics: Arc::new(CryptodevMetrics::default()),
            completions: None,
            ready: false,
            used: false,
        })
    }

    /// Replaces the metrics, e.g. with ones shared with the concrete backend.
    pub fn with_metrics(mut self, metrics: Arc<CryptodevMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attaches the completion handle of an offload backend.
    pub fn with_completions(mut self, completions: LkcfCompletions) -> Self {
        self.completions = Some(completions);
        self
    }

    /// Validates `config`, then creates and initializes the backend it describes.
    pub fn from_config(config: &CryptodevConfig) -> Result<Self, CryptodevConfigError> {
        config.validate()?;
        let metrics = Arc::new(CryptodevMetrics::default());
        let throttle = config.throttle.unwrap_or_default();
        let mut backend = match config.backend {
            CryptodevBackendType::Builtin => CryptodevBackend::new(
                config.id.as_str(),
                Box::new(BuiltinBackend::new()),
                config.queues,
                throttle,
            )?,
            CryptodevBackendType::Lkcf => {
                let lkcf =
                    LkcfBackend::new(config.workers, Arc::new(KernelKeyring), metrics.clone());
                let completions = lkcf.completions();
                CryptodevBackend::new(config.id.as_str(), Box::new(lkcf), config.queues, throttle)?
                    .with_completions(completions)
            }
        }
        .with_metrics(metrics);
        backend.init()?;
        Ok(backend)
    }

    /// Initializes the concrete backend and marks this one ready.
    pub fn init(&mut self) -> Result<(), CryptodevError> {
        if self.ready {
            return Ok(());
        }
        if let Err(err) = self.ops.init(&mut self.conf) {
            error!("CRYPTODEV: {}: initialization failed: {}", self.id, err);
            return Err(err);
        }
        self.ready = true;
        info!(
            "CRYPTODEV: {}: ready, services {:#x}",
            self.id, self.conf.crypto_services
        );
        Ok(())
    }

    /// Fails deferred operations, closes every session and marks the backend not ready.
    pub fn cleanup(&mut self) {
        let deferred = self.gate.take_all();
        if !deferred.is_empty() {
            debug!(
                "CRYPTODEV: {}: failing {} deferred operations",
                self.id,
                deferred.len()
            );
        }
        for entry in deferred {
            self.metrics.op_fails.inc();
            (entry.cb)(Err(CryptodevError::ShuttingDown), entry.op);
        }
        self.ops.cleanup(&mut self.conf);
        self.ready = false;
    }

    /// Creates a session.
    pub fn create_session(
        &mut self,
        info: SessionInfo,
        queue_index: u32,
        cb: SessionCallback,
    ) -> Result<(), CryptodevError> {
        if !self.ready {
            self.metrics.session_create_fails.inc();
            return complete_session(cb, Err(CryptodevError::NotReady));
        }
        let res = self.ops.create_session(info, queue_index, cb);
        if res.is_err() {
            self.metrics.session_create_fails.inc();
        }
        res
    }

    /// Closes a live session.
    ///
    /// # Panics
    ///
    /// Panics when `session_id` was never allocated.
    pub fn close_session(
        &mut self,
        session_id: u64,
        queue_index: u32,
        cb: SessionCallback,
    ) -> Result<(), CryptodevError> {
        self.ops.close_session(session_id, queue_index, cb)
    }

    // Charges the statistics of `op` and returns its throttle cost.
    fn account(&self, op: &OpInfo) -> Result<u64, CryptodevError> {
        let (ops, bytes) = match (&op.data, op.op_code) {
            (OpData::Sym(_), VIRTIO_CRYPTO_CIPHER_ENCRYPT) => {
                (&self.metrics.sym_encrypt_ops, &self.metrics.sym_encrypt_bytes)
            }
            (OpData::Sym(_), VIRTIO_CRYPTO_CIPHER_DECRYPT) => {
                (&self.metrics.sym_decrypt_ops, &self.metrics.sym_decrypt_bytes)
            }
            (OpData::Asym(_), VIRTIO_CRYPTO_AKCIPHER_ENCRYPT) => (
                &self.metrics.asym_encrypt_ops,
                &self.metrics.asym_encrypt_bytes,
            ),
            (OpData::Asym(_), VIRTIO_CRYPTO_AKCIPHER_DECRYPT) => (
                &self.metrics.asym_decrypt_ops,
                &self.metrics.asym_decrypt_bytes,
            ),
            (OpData::Asym(_), VIRTIO_CRYPTO_AKCIPHER_SIGN) => {
                (&self.metrics.asym_sign_ops, &self.metrics.asym_sign_bytes)
            }
            (OpData::Asym(_), VIRTIO_CRYPTO_AKCIPHER_VERIFY) => {
                (&self.metrics.asym_verify_ops, &self.metrics.asym_verify_bytes)
            }
            (_, op_code) => return Err(CryptodevError::UnsupportedOpcode(op_code)),
        };
        let cost = op.src_len() as u64;
        ops.inc();
        bytes.add(cost);
        Ok(cost)
    }

    fn dispatch(&mut self, entry: DeferredOp) -> Result<(), CryptodevError> {
        let DeferredOp { op, cb, .. } = entry;
        let metrics = self.metrics.clone();
        self.ops.do_op(
            op,
            Box::new(move |res, op| {
                if res.is_err() {
                    metrics.op_fails.inc();
                }
                cb(res, op)
            }),
        )
    }

    /// Submits an operation.
    ///
    /// `Ok` means the operation was accepted, either run or deferred by the throttle. Its
    /// outcome is reported through `cb` in every case.
    pub fn operation(&mut self, op: OpInfo, cb: OpCallback) -> Result<(), CryptodevError> {
        if !self.ready {
            self.metrics.op_fails.inc();
            return reject_op(op, cb, CryptodevError::NotReady);
        }
        let cost = match self.account(&op) {
            Ok(cost) => cost,
            Err(err) => {
                error!("CRYPTODEV: {}: {}", self.id, err);
                self.metrics.op_fails.inc();
                return reject_op(op, cb, err);
            }
        };
        match self.gate.admit(op, cb, cost) {
            Admission::Run(entry) => self.dispatch(entry),
            Admission::Deferred => {
                self.metrics.throttled_ops.inc();
                Ok(())
            }
        }
    }

    /// Handles an event on [`throttle_timer_fd`](Self::throttle_timer_fd).
    pub fn process_throttle_event(&mut self) {
        match self.gate.on_timer() {
            Ok(ready) => {
                for entry in ready {
                    if let Err(err) = self.dispatch(entry) {
                        debug!("CRYPTODEV: {}: deferred operation refused: {}", self.id, err);
                    }
                }
            }
            Err(err) => error!("CRYPTODEV: {}: failed to handle throttle event: {}", self.id, err),
        }
    }

    /// Applies new rate limits. Disabling them runs every deferred operation right away.
    pub fn set_throttle(&mut self, config: ThrottleConfig) -> Result<(), CryptodevError> {
        let drained = self.gate.reconfigure(config)?;
        info!(
            "CRYPTODEV: {}: throttle set to {} bps, {} ops",
            self.id, config.bps, config.ops
        );
        for entry in drained {
            if let Err(err) = self.dispatch(entry) {
                debug!("CRYPTODEV: {}: deferred operation refused: {}", self.id, err);
            }
        }
        Ok(())
    }

    /// Current rate limits.
    pub fn throttle(&self) -> ThrottleConfig {
        self.gate.config()
    }

    /// Number of operations waiting for throttle budget.
    pub fn throttled(&self) -> usize {
        self.gate.pending()
    }

    /// Descriptor of the throttle timer.
    pub fn throttle_timer_fd(&self) -> RawFd {
        self.gate.as_raw_fd()
    }

    /// Descriptor signalled when offloaded operations complete.
    pub fn completion_fd(&self) -> Option<RawFd> {
        self.completions.as_ref().and_then(LkcfCompletions::notifier_fd)
    }

    /// Delivers finished offloaded operations and returns how many were delivered.
    pub fn process_completions(&mut self) -> usize {
        self.completions
            .as_ref()
            .map_or(0, LkcfCompletions::process)
    }

    /// Management view of the backend.
    pub fn query(&self) -> CryptodevInfo {
        CryptodevInfo {
            id: self.id.clone(),
            service: CryptodevServiceType::ALL
                .iter()
                .filter(|(bit, _)| self.conf.has_service(*bit))
                .map(|(_, service)| *service)
                .collect(),
            client: self
                .conf
                .peers
                .iter()
                .map(|client| CryptodevClientInfo {
                    queue: client.queue_index,
                    client_type: client.client_type,
                })
                .collect(),
        }
    }

    /// Backend id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Metrics of this backend.
    pub fn metrics(&self) -> &Arc<CryptodevMetrics> {
        &self.metrics
    }

    /// Configuration and capabilities.
    pub fn conf(&self) -> &CryptodevBackendConf {
        &self.conf
    }

    /// Whether the backend accepts requests.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Device status word.
    pub fn hw_status(&self) -> u32 {
        self.conf.hw_ready_status(self.ready)
    }

    /// Marks the backend as bound to a frontend.
    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    /// Whether a frontend is bound.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// A bound backend cannot be deleted.
    pub fn can_be_deleted(&self) -> bool {
        !self.used
    }
}

impl Drop for CryptodevBackend {
    fn drop(&mut self) {
        self.cleanup();
    }
}
