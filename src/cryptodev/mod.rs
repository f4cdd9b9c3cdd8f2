// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Crypto device backends.
//!
//! A frontend talks to a [`backend::CryptodevBackend`], which owns one concrete implementation
//! of [`CryptodevBackendOps`]: the synchronous [`builtin::BuiltinBackend`] or the thread pool
//! based [`lkcf::LkcfBackend`]. Every request carries a completion callback that is invoked
//! exactly once.

pub mod backend;
pub mod builtin;
pub mod client;
pub mod keyring;
pub mod lkcf;
pub mod session;
pub mod throttle;
pub mod virtio_crypto;

use serde::Serialize;
use zeroize::Zeroizing;

use self::client::ClientRegistry;
use self::virtio_crypto::*;
use crate::crypto::{
    AkCipher, AkCipherError, AkCipherKeyType, AkCipherOptions, CipherError, HashAlg, RsaPadding,
};

/// Errors reported by the crypto backends.
///
/// Every variant maps to one of the virtio-crypto status codes, see [`status_code`].
///
/// [`status_code`]: CryptodevError::status_code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum CryptodevError {
    /// Only one queue is supported, got {0}
    InvalidQueueCount(u32),
    /// Backend is not ready
    NotReady,
    /// Backend is shutting down
    ShuttingDown,
    /// Total number of sessions created exceeds {0}
    NoCapacity(usize),
    /// Invalid session id: {0}
    InvalidSession(u64),
    /// Unsupported opcode: {0:#x}
    UnsupportedOpcode(u32),
    /// Unsupported cipher algorithm: {0}
    UnsupportedCipher(u32),
    /// Unsupported key length: {0}
    UnsupportedKeyLength(usize),
    /// Unsupported operation type: {0}
    UnsupportedOpType(u32),
    /// Unsupported asymmetric algorithm: {0}
    UnsupportedAkCipher(u32),
    /// Unsupported RSA padding algorithm: {0}
    UnsupportedPadding(u32),
    /// Unsupported RSA hash algorithm: {0}
    UnsupportedHash(u32),
    /// Unsupported asymmetric key type: {0}
    UnsupportedKeyType(u32),
    /// Invalid cipher direction: {0}
    InvalidDirection(u32),
    /// Request does not match the session: {0}
    BadMessage(&'static str),
    /// Cipher operation failed: {0}
    Cipher(#[from] CipherError),
    /// Asymmetric operation failed: {0}
    AkCipher(String),
    /// Destination buffer too short: need {needed} bytes, have {capacity}
    DstTooShort {
        /// Length of the produced result.
        needed: usize,
        /// Capacity declared by the caller.
        capacity: usize,
    },
    /// Signature rejected
    KeyRejected,
    /// Keyring operation failed: {0}
    Keyring(String),
    /// Cannot create event notifier: {0}
    EventFd(String),
    /// Cannot spawn worker thread: {0}
    SpawnWorker(String),
    /// Invalid throttle configuration: {0}
    InvalidThrottle(String),
}

impl CryptodevError {
    /// Virtio-crypto status reported to the frontend.
    pub fn status_code(&self) -> u8 {
        use self::CryptodevError::*;
        match self {
            NoCapacity(_) => VIRTIO_CRYPTO_NOSPC,
            InvalidSession(_) => VIRTIO_CRYPTO_INVSESS,
            UnsupportedOpcode(_)
            | UnsupportedCipher(_)
            | UnsupportedKeyLength(_)
            | UnsupportedOpType(_)
            | UnsupportedAkCipher(_)
            | UnsupportedPadding(_)
            | UnsupportedHash(_)
            | UnsupportedKeyType(_) => VIRTIO_CRYPTO_NOTSUPP,
            InvalidDirection(_) | BadMessage(_) => VIRTIO_CRYPTO_BADMSG,
            KeyRejected => VIRTIO_CRYPTO_KEY_REJECTED,
            InvalidQueueCount(_)
            | NotReady
            | ShuttingDown
            | Cipher(_)
            | AkCipher(_)
            | DstTooShort { .. }
            | Keyring(_)
            | EventFd(_)
            | SpawnWorker(_)
            | InvalidThrottle(_) => VIRTIO_CRYPTO_ERR,
        }
    }

    /// Negated status code, as carried by completion callbacks.
    pub fn to_status(&self) -> i32 {
        -i32::from(self.status_code())
    }
}

impl From<AkCipherError> for CryptodevError {
    fn from(err: AkCipherError) -> Self {
        match err {
            AkCipherError::VerifyFailed => CryptodevError::KeyRejected,
            err => CryptodevError::AkCipher(err.to_string()),
        }
    }
}

/// Status carried by a completion: `0` on success, a negated status code otherwise.
pub fn status_of<T>(res: &Result<T, CryptodevError>) -> i32 {
    match res {
        Ok(_) => i32::from(VIRTIO_CRYPTO_OK),
        Err(err) => err.to_status(),
    }
}

/// Parameters of a symmetric session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymSessionInfo {
    /// `VIRTIO_CRYPTO_CIPHER_*` algorithm.
    pub cipher_alg: u32,
    /// Raw key bytes.
    pub key: Zeroizing<Vec<u8>>,
    /// `VIRTIO_CRYPTO_OP_ENCRYPT` or `VIRTIO_CRYPTO_OP_DECRYPT`.
    pub direction: u32,
    /// `VIRTIO_CRYPTO_SYM_OP_*` operation type.
    pub op_type: u32,
}

/// RSA parameters of an asymmetric session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaParams {
    /// `VIRTIO_CRYPTO_RSA_*_PADDING`.
    pub padding: u32,
    /// `VIRTIO_CRYPTO_RSA_*` hash, used with PKCS#1 padding.
    pub hash: u32,
}

/// Parameters of an asymmetric session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsymSessionInfo {
    /// `VIRTIO_CRYPTO_AKCIPHER_*` algorithm.
    pub algo: u32,
    /// `VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_*`.
    pub keytype: u32,
    /// RSA options, ignored for other algorithms.
    pub rsa: RsaParams,
    /// DER encoded PKCS#1 key.
    pub key: Zeroizing<Vec<u8>>,
}

/// Algorithm specific part of a session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionParams {
    /// Symmetric cipher session.
    Sym(SymSessionInfo),
    /// Asymmetric key session.
    Asym(AsymSessionInfo),
}

/// Session creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// `*_CREATE_SESSION` opcode.
    pub op_code: u32,
    /// Algorithm parameters.
    pub params: SessionParams,
}

/// Symmetric operation buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymOpInfo {
    /// `VIRTIO_CRYPTO_SYM_OP_*` operation type.
    pub op_type: u32,
    /// Initialization vector to install before processing.
    pub iv: Option<Vec<u8>>,
    /// Input.
    pub src: Vec<u8>,
    /// Output, at least as long as `src`.
    pub dst: Vec<u8>,
}

/// Asymmetric operation buffers.
///
/// For verify, `src` holds the signature and `dst` the digest it is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsymOpInfo {
    /// Input.
    pub src: Vec<u8>,
    /// Output, its length is the capacity declared by the caller.
    pub dst: Vec<u8>,
    /// Number of bytes of `dst` filled by the operation.
    pub dst_len: usize,
}

/// Algorithm specific part of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpData {
    /// Symmetric cipher operation.
    Sym(SymOpInfo),
    /// Asymmetric key operation.
    Asym(AsymOpInfo),
}

/// One unit of work submitted to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpInfo {
    /// Session the operation runs in.
    pub session_id: u64,
    /// Data queue opcode, e.g. `VIRTIO_CRYPTO_CIPHER_ENCRYPT`.
    pub op_code: u32,
    /// Queue the request arrived on.
    pub queue_index: u32,
    /// Buffers.
    pub data: OpData,
}

impl OpInfo {
    /// Declared input length, used as the throttling cost.
    pub fn src_len(&self) -> usize {
        match &self.data {
            OpData::Sym(sym) => sym.src.len(),
            OpData::Asym(asym) => asym.src.len(),
        }
    }
}

/// Completion of a session request, carrying the session id on success.
pub type SessionCallback = Box<dyn FnOnce(Result<u64, CryptodevError>) + Send>;

/// Completion of an operation. The operation is handed back with its outcome.
pub type OpCallback = Box<dyn FnOnce(Result<(), CryptodevError>, OpInfo) + Send>;

/// Interface implemented by every concrete backend.
///
/// Methods taking a callback invoke it exactly once, including when the request is refused
/// before any work is done. The returned `Result` mirrors that outcome for the caller's
/// convenience; for [`do_op`](Self::do_op) it only tells whether the operation was accepted.
pub trait CryptodevBackendOps: Send {
    /// Validates `conf`, registers the backend clients and advertises capabilities.
    fn init(&mut self, conf: &mut CryptodevBackendConf) -> Result<(), CryptodevError>;

    /// Closes all sessions and releases the backend clients. Safe to call more than once.
    fn cleanup(&mut self, conf: &mut CryptodevBackendConf);

    /// Creates a session described by `info`.
    fn create_session(
        &mut self,
        info: SessionInfo,
        queue_index: u32,
        cb: SessionCallback,
    ) -> Result<(), CryptodevError>;

    /// Closes a live session.
    ///
    /// # Panics
    ///
    /// Closing an id that was never allocated is a caller bug and panics.
    fn close_session(
        &mut self,
        session_id: u64,
        queue_index: u32,
        cb: SessionCallback,
    ) -> Result<(), CryptodevError>;

    /// Runs `op` and reports its outcome through `cb`.
    fn do_op(&mut self, op: OpInfo, cb: OpCallback) -> Result<(), CryptodevError>;
}

/// Configuration and advertised capabilities of a backend.
#[derive(Debug, Default, Serialize)]
pub struct CryptodevBackendConf {
    /// Clients registered by the backend, one per queue.
    pub peers: ClientRegistry,
    /// Number of queues requested.
    pub queues: u32,
    /// Bitmask of `VIRTIO_CRYPTO_SERVICE_*`.
    pub crypto_services: u32,
    /// Low word of the cipher algorithm bitmask.
    pub cipher_algo_l: u32,
    /// High word of the cipher algorithm bitmask.
    pub cipher_algo_h: u32,
    /// Hash algorithm bitmask.
    pub hash_algo: u32,
    /// Low word of the MAC algorithm bitmask.
    pub mac_algo_l: u32,
    /// High word of the MAC algorithm bitmask.
    pub mac_algo_h: u32,
    /// AEAD algorithm bitmask.
    pub aead_algo: u32,
    /// Asymmetric algorithm bitmask.
    pub akcipher_algo: u32,
    /// Maximum length of a cipher key.
    pub max_cipher_key_len: u32,
    /// Maximum length of an authentication key.
    pub max_auth_key_len: u32,
    /// Maximum size of a request.
    pub max_size: u64,
}

impl CryptodevBackendConf {
    /// Creates an empty configuration for `queues` queues.
    pub fn new(queues: u32) -> Self {
        CryptodevBackendConf {
            queues,
            ..Default::default()
        }
    }

    /// Device status word for a backend in the given readiness state.
    pub fn hw_ready_status(&self, ready: bool) -> u32 {
        if ready {
            VIRTIO_CRYPTO_S_HW_READY
        } else {
            0
        }
    }

    /// Whether `service` is advertised.
    pub fn has_service(&self, service: u32) -> bool {
        self.crypto_services & (1 << service) != 0
    }
}

/// Reports the outcome of a session request to `cb` and returns it.
pub(crate) fn complete_session(
    cb: SessionCallback,
    res: Result<u64, CryptodevError>,
) -> Result<(), CryptodevError> {
    cb(res.clone());
    res.map(|_| ())
}

/// Fails `op` through its callback without running it.
pub(crate) fn reject_op(
    op: OpInfo,
    cb: OpCallback,
    err: CryptodevError,
) -> Result<(), CryptodevError> {
    cb(Err(err.clone()), op);
    Err(err)
}

/// Translates the asymmetric session parameters into primitive options.
pub(crate) fn akcipher_options(info: &AsymSessionInfo) -> Result<AkCipherOptions, CryptodevError> {
    match info.algo {
        VIRTIO_CRYPTO_AKCIPHER_RSA => {}
        VIRTIO_CRYPTO_AKCIPHER_ECDSA => return Ok(AkCipherOptions::Ecdsa { curve_id: 0 }),
        other => return Err(CryptodevError::UnsupportedAkCipher(other)),
    }
    let padding = match info.rsa.padding {
        VIRTIO_CRYPTO_RSA_RAW_PADDING => RsaPadding::Raw,
        VIRTIO_CRYPTO_RSA_PKCS1_PADDING => RsaPadding::Pkcs1(match info.rsa.hash {
            VIRTIO_CRYPTO_RSA_MD5 => HashAlg::Md5,
            VIRTIO_CRYPTO_RSA_SHA1 => HashAlg::Sha1,
            VIRTIO_CRYPTO_RSA_SHA256 => HashAlg::Sha256,
            VIRTIO_CRYPTO_RSA_SHA512 => HashAlg::Sha512,
            other => return Err(CryptodevError::UnsupportedHash(other)),
        }),
        other => return Err(CryptodevError::UnsupportedPadding(other)),
    };
    Ok(AkCipherOptions::Rsa(padding))
}

/// Translates the virtio key type.
pub(crate) fn akcipher_key_type(keytype: u32) -> Result<AkCipherKeyType, CryptodevError> {
    match keytype {
        VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PUBLIC => Ok(AkCipherKeyType::Public),
        VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE => Ok(AkCipherKeyType::Private),
        other => Err(CryptodevError::UnsupportedKeyType(other)),
    }
}

/// Runs an asymmetric operation in process and stores its result in `op`.
pub(crate) fn akcipher_run(
    ak: &AkCipher,
    op_code: u32,
    op: &mut AsymOpInfo,
) -> Result<(), CryptodevError> {
    let out = match op_code {
        VIRTIO_CRYPTO_AKCIPHER_ENCRYPT => ak.encrypt(&op.src)?,
        VIRTIO_CRYPTO_AKCIPHER_DECRYPT => ak.decrypt(&op.src)?,
        VIRTIO_CRYPTO_AKCIPHER_SIGN => ak.sign(&op.src)?,
        VIRTIO_CRYPTO_AKCIPHER_VERIFY => {
            ak.verify(&op.src, &op.dst)?;
            Vec::new()
        }
        other => return Err(CryptodevError::UnsupportedOpcode(other)),
    };
    akcipher_store(op, &out)
}

/// Copies an asymmetric result into the destination buffer.
///
/// Verify produces no output and leaves `dst` untouched.
pub(crate) fn akcipher_store(op: &mut AsymOpInfo, out: &[u8]) -> Result<(), CryptodevError> {
    if out.len() > op.dst.len() {
        return Err(CryptodevError::DstTooShort {
            needed: out.len(),
            capacity: op.dst.len(),
        });
    }
    op.dst[..out.len()].copy_from_slice(out);
    op.dst_len = out.len();
    Ok(())
}
