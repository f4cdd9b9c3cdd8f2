// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Asymmetric backend offloading private key operations to the kernel keyring.
//!
//! Operations are queued to a pool of worker threads. Finished operations go to a response
//! queue; the owner of the backend is woken through an eventfd when that queue becomes
//! non-empty and delivers the completions with [`LkcfCompletions::process`].

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use vmm_sys_util::eventfd::EventFd;
use zeroize::Zeroizing;

use super::client::{BackendClient, CryptodevBackendType};
use super::keyring::{KeyRing, KeySerial, KeyringOp};
use super::session::SessionTable;
use super::virtio_crypto::*;
use super::{
    akcipher_key_type, akcipher_options, akcipher_run, complete_session, reject_op,
    AsymOpInfo, CryptodevBackendConf, CryptodevBackendOps, CryptodevError, OpCallback, OpData,
    OpInfo, SessionCallback, SessionInfo, SessionParams,
};
use crate::crypto::{AkCipher, AkCipherKeyType, AkCipherOptions, RsaPadding};
use crate::logger::{debug, error, warn, CryptodevMetrics, IncMetric};

/// Default size of the worker pool.
pub const LKCF_DEFAULT_WORKERS: usize = 64;

const LKCF_KEY_TYPE: &str = "asymmetric";
const LKCF_KEY_DESCRIPTION: &str = "lkcf-backend-priv-key";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key material and options of an RSA session. Never mutated once created.
#[derive(Debug)]
struct LkcfSession {
    key: Zeroizing<Vec<u8>>,
    keytype: AkCipherKeyType,
    padding: RsaPadding,
}

impl LkcfSession {
    fn options(&self) -> AkCipherOptions {
        AkCipherOptions::Rsa(self.padding)
    }
}

struct Task {
    session: Arc<LkcfSession>,
    op: OpInfo,
    cb: OpCallback,
    status: Result<(), CryptodevError>,
}

impl Task {
    fn complete(self) {
        (self.cb)(self.status, self.op)
    }
}

struct RequestQueue {
    running: bool,
    tasks: VecDeque<Task>,
}

struct ResponseQueue {
    tasks: VecDeque<Task>,
    notifier: Option<EventFd>,
}

struct LkcfShared {
    requests: Mutex<RequestQueue>,
    work_available: Condvar,
    responses: Mutex<ResponseQueue>,
    keyring: Arc<dyn KeyRing>,
    metrics: Arc<CryptodevMetrics>,
}

impl LkcfShared {
    fn worker_loop(&self) {
        loop {
            let mut task = {
                let mut requests = lock(&self.requests);
                while requests.running && requests.tasks.is_empty() {
                    requests = self
                        .work_available
                        .wait(requests)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                if !requests.running {
                    return;
                }
                match requests.tasks.pop_front() {
                    Some(task) => task,
                    None => continue,
                }
            };
            self.execute(&mut task);
            self.respond(task);
        }
    }

    fn execute(&self, task: &mut Task) {
        let op_code = task.op.op_code;
        task.status = match &mut task.op.data {
            OpData::Asym(asym) => self.run(&task.session, op_code, asym),
            OpData::Sym(_) => Err(CryptodevError::BadMessage(
                "operation does not match the session algorithm",
            )),
        };
        if let Err(err) = &task.status {
            error!("CRYPTODEV: lkcf operation {:#x} failed: {}", op_code, err);
        }
    }

    fn run(
        &self,
        session: &LkcfSession,
        op_code: u32,
        op: &mut AsymOpInfo,
    ) -> Result<(), CryptodevError> {
        let ak = AkCipher::new(&session.options(), session.keytype, &session.key)?;
        if session.keytype == AkCipherKeyType::Private {
            if op_code == VIRTIO_CRYPTO_AKCIPHER_VERIFY {
                // The keyring does not check buffer sizes the way the in-process path does.
                ak.check_verify_input(&op.src, &op.dst)?;
            }
            if let Some(res) = self.run_in_keyring(&ak, session, op_code, op) {
                return res;
            }
        }
        akcipher_run(&ak, op_code, op)
    }

    // Returns `None` when the key could not be uploaded and the operation should run in
    // process instead.
    fn run_in_keyring(
        &self,
        ak: &AkCipher,
        session: &LkcfSession,
        op_code: u32,
        op: &mut AsymOpInfo,
    ) -> Option<Result<(), CryptodevError>> {
        let uploaded = ak
            .export_private_key_info()
            .map_err(CryptodevError::from)
            .and_then(|p8info| {
                self.keyring
                    .upload_key(LKCF_KEY_TYPE, LKCF_KEY_DESCRIPTION, &p8info)
                    .map_err(CryptodevError::from)
            });
        let key = match uploaded {
            Ok(key) => key,
            Err(err) => {
                debug!("CRYPTODEV: lkcf falling back to in-process key: {}", err);
                self.metrics.keyring_fallbacks.inc();
                return None;
            }
        };
        let res = self.keyring_op(key, &session.padding.op_descriptor(), op_code, op);
        if let Err(err) = self.keyring.revoke(key) {
            warn!("CRYPTODEV: cannot unlink lkcf key {}: {}", key, err);
        }
        Some(res)
    }

    fn keyring_op(
        &self,
        key: KeySerial,
        info: &str,
        op_code: u32,
        op: &mut AsymOpInfo,
    ) -> Result<(), CryptodevError> {
        let keyring_op = match op_code {
            VIRTIO_CRYPTO_AKCIPHER_ENCRYPT => KeyringOp::Encrypt,
            VIRTIO_CRYPTO_AKCIPHER_DECRYPT => KeyringOp::Decrypt,
            VIRTIO_CRYPTO_AKCIPHER_SIGN => KeyringOp::Sign,
            VIRTIO_CRYPTO_AKCIPHER_VERIFY => {
                self.keyring.verify(key, info, &op.dst, &op.src)?;
                op.dst_len = 0;
                return Ok(());
            }
            other => return Err(CryptodevError::UnsupportedOpcode(other)),
        };
        let written = self
            .keyring
            .crypt(key, keyring_op, info, &op.src, &mut op.dst)?;
        if written > op.dst.len() {
            return Err(CryptodevError::DstTooShort {
                needed: written,
                capacity: op.dst.len(),
            });
        }
        op.dst_len = written;
        Ok(())
    }

    fn respond(&self, task: Task) {
        let mut responses = lock(&self.responses);
        let was_empty = responses.tasks.is_empty();
        responses.tasks.push_back(task);
        // Signalled under the lock, otherwise a concurrent drain could miss the wakeup.
        if was_empty {
            if let Some(notifier) = &responses.notifier {
                if let Err(err) = notifier.write(1) {
                    error!("CRYPTODEV: cannot signal lkcf completion: {}", err);
                }
            }
        }
    }
}

/// Handle delivering the completions of an [`LkcfBackend`] on the owner's thread.
#[derive(Clone)]
pub struct LkcfCompletions {
    shared: Arc<LkcfShared>,
}

impl std::fmt::Debug for LkcfCompletions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LkcfCompletions")
            .field("fd", &self.notifier_fd())
            .finish()
    }
}

impl LkcfCompletions {
    /// Descriptor readable when completions are pending, absent while the backend is down.
    pub fn notifier_fd(&self) -> Option<RawFd> {
        lock(&self.shared.responses)
            .notifier
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }

    /// Invokes the callback of every finished operation, in completion order.
    ///
    /// Returns the number of callbacks invoked.
    pub fn process(&self) -> usize {
        let tasks = {
            let mut responses = lock(&self.shared.responses);
            if let Some(notifier) = &responses.notifier {
                match notifier.read() {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => warn!("CRYPTODEV: cannot read lkcf completion signal: {}", err),
                }
            }
            std::mem::take(&mut responses.tasks)
        };
        let count = tasks.len();
        tasks.into_iter().for_each(Task::complete);
        count
    }
}

/// The kernel keyring offload backend.
pub struct LkcfBackend {
    shared: Arc<LkcfShared>,
    sessions: SessionTable<Arc<LkcfSession>>,
    workers: Vec<JoinHandle<()>>,
    num_workers: usize,
}

impl std::fmt::Debug for LkcfBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LkcfBackend")
            .field("sessions", &self.sessions.len())
            .field("workers", &self.workers.len())
            .field("num_workers", &self.num_workers)
            .finish()
    }
}

impl LkcfBackend {
    /// Creates a backend that will run `num_workers` threads once initialized.
    pub fn new(
        num_workers: usize,
        keyring: Arc<dyn KeyRing>,
        metrics: Arc<CryptodevMetrics>,
    ) -> Self {
        LkcfBackend {
            shared: Arc::new(LkcfShared {
                requests: Mutex::new(RequestQueue {
                    running: false,
                    tasks: VecDeque::new(),
                }),
                work_available: Condvar::new(),
                responses: Mutex::new(ResponseQueue {
                    tasks: VecDeque::new(),
                    notifier: None,
                }),
                keyring,
                metrics,
            }),
            sessions: SessionTable::new(),
            workers: Vec::new(),
            num_workers,
        }
    }

    /// Handle used by the owner to deliver completions.
    pub fn completions(&self) -> LkcfCompletions {
        LkcfCompletions {
            shared: self.shared.clone(),
        }
    }

    fn new_session(&mut self, info: &SessionInfo) -> Result<u64, CryptodevError> {
        let asym = match (info.op_code, &info.params) {
            (VIRTIO_CRYPTO_AKCIPHER_CREATE_SESSION, SessionParams::Asym(asym)) => asym,
            (VIRTIO_CRYPTO_AKCIPHER_CREATE_SESSION, _) => {
                return Err(CryptodevError::BadMessage(
                    "session parameters do not match the opcode",
                ))
            }
            (op_code, _) => return Err(CryptodevError::UnsupportedOpcode(op_code)),
        };
        let padding = match akcipher_options(asym)? {
            AkCipherOptions::Rsa(padding) => padding,
            _ => return Err(CryptodevError::UnsupportedAkCipher(asym.algo)),
        };
        let keytype = akcipher_key_type(asym.keytype)?;
        // Parse once so a malformed key fails here rather than on every operation.
        AkCipher::new(&AkCipherOptions::Rsa(padding), keytype, &asym.key)?;
        self.sessions.insert(Arc::new(LkcfSession {
            key: asym.key.clone(),
            keytype,
            padding,
        }))
    }

    fn spawn_workers(&mut self) -> Result<(), CryptodevError> {
        for index in 0..self.num_workers {
            let shared = self.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("lkcf_worker{index}"))
                .spawn(move || shared.worker_loop())
                .map_err(|err| CryptodevError::SpawnWorker(err.to_string()))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    // Stops the workers and completes everything still queued.
    fn shutdown(&mut self) {
        {
            let mut requests = lock(&self.shared.requests);
            requests.running = false;
            self.shared.work_available.notify_all();
        }
        drop(lock(&self.shared.responses).notifier.take());

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("CRYPTODEV: lkcf worker panicked");
            }
        }

        let pending = std::mem::take(&mut lock(&self.shared.requests).tasks);
        for task in pending {
            (task.cb)(Err(CryptodevError::ShuttingDown), task.op);
        }
        let finished = std::mem::take(&mut lock(&self.shared.responses).tasks);
        finished.into_iter().for_each(Task::complete);
    }

    #[cfg(test)]
    fn run_inline(&self, count: usize) {
        for _ in 0..count {
            let task = lock(&self.shared.requests).tasks.pop_front();
            if let Some(mut task) = task {
                self.shared.execute(&mut task);
                self.shared.respond(task);
            }
        }
    }
}

impl CryptodevBackendOps for LkcfBackend {
    fn init(&mut self, conf: &mut CryptodevBackendConf) -> Result<(), CryptodevError> {
        if conf.queues != 1 {
            error!("CRYPTODEV: lkcf backend supports a single queue, got {}", conf.queues);
            return Err(CryptodevError::InvalidQueueCount(conf.queues));
        }
        let notifier = EventFd::new(libc::EFD_NONBLOCK)
            .map_err(|err| CryptodevError::EventFd(err.to_string()))?;
        lock(&self.shared.responses).notifier = Some(notifier);
        lock(&self.shared.requests).running = true;
        if let Err(err) = self.spawn_workers() {
            error!("CRYPTODEV: {}", err);
            self.shutdown();
            return Err(err);
        }

        conf.peers
            .register(BackendClient::new(CryptodevBackendType::Lkcf, 0));
        conf.crypto_services = 1 << VIRTIO_CRYPTO_SERVICE_AKCIPHER;
        conf.akcipher_algo = 1 << VIRTIO_CRYPTO_AKCIPHER_RSA;
        Ok(())
    }

    fn cleanup(&mut self, conf: &mut CryptodevBackendConf) {
        self.shutdown();
        let closed = self.sessions.close_all().len();
        if closed > 0 {
            debug!("CRYPTODEV: lkcf backend closed {} sessions", closed);
        }
        conf.peers.release_all();
    }

    fn create_session(
        &mut self,
        info: SessionInfo,
        _queue_index: u32,
        cb: SessionCallback,
    ) -> Result<(), CryptodevError> {
        let res = self.new_session(&info);
        if let Err(err) = &res {
            error!("CRYPTODEV: cannot create lkcf session: {}", err);
        }
        complete_session(cb, res)
    }

    fn close_session(
        &mut self,
        session_id: u64,
        _queue_index: u32,
        cb: SessionCallback,
    ) -> Result<(), CryptodevError> {
        self.sessions.close(session_id);
        complete_session(cb, Ok(session_id))
    }

    fn do_op(&mut self, op: OpInfo, cb: OpCallback) -> Result<(), CryptodevError> {
        let Some(session) = self.sessions.get(op.session_id).cloned() else {
            let session_id = op.session_id;
            error!("CRYPTODEV: cannot find a valid session id: {}", session_id);
            return reject_op(op, cb, CryptodevError::InvalidSession(session_id));
        };
        let mut requests = lock(&self.shared.requests);
        if !requests.running {
            drop(requests);
            return reject_op(op, cb, CryptodevError::ShuttingDown);
        }
        requests.tasks.push_back(Task {
            session,
            op,
            cb,
            status: Err(CryptodevError::ShuttingDown),
        });
        self.shared.work_available.notify_one();
        Ok(())
    }
}

impl Drop for LkcfBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
