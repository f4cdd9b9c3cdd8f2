// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Software backend running every operation synchronously on the calling thread.

use super::client::{BackendClient, CryptodevBackendType};
use super::session::SessionTable;
use super::virtio_crypto::*;
use super::{
    akcipher_key_type, akcipher_options, akcipher_run, complete_session, reject_op,
    AsymSessionInfo, CryptodevBackendConf, CryptodevBackendOps, CryptodevError, OpCallback,
    OpData, OpInfo, SessionCallback, SessionInfo, SessionParams, SymOpInfo, SymSessionInfo,
};
use crate::crypto::{
    akcipher_supports, AkCipher, AkCipherOptions, Cipher, CipherAlg, CipherMode, RsaPadding,
};
use crate::logger::{debug, error};

/// Maximum cipher key length advertised by the builtin backend.
pub const BUILTIN_MAX_CIPHER_KEY_LEN: u32 = 64;
/// Maximum authentication key length advertised by the builtin backend.
pub const BUILTIN_MAX_AUTH_KEY_LEN: u32 = 512;
/// Maximum request size advertised by the builtin backend.
pub const BUILTIN_MAX_SIZE: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

#[derive(Debug)]
enum BuiltinSession {
    Cipher {
        cipher: Cipher,
        direction: Direction,
    },
    AkCipher(AkCipher),
}

/// Selects the AES variant for a key length. The mode breaks the tie between a 256 bit key
/// and a pair of 128 bit XTS keys.
fn aes_alg(key_len: usize, mode: CipherMode) -> Result<CipherAlg, CryptodevError> {
    match (key_len, mode) {
        (16, _) => Ok(CipherAlg::Aes128),
        (24, _) => Ok(CipherAlg::Aes192),
        (32, CipherMode::Xts) => Ok(CipherAlg::Aes128),
        (32, _) => Ok(CipherAlg::Aes256),
        (64, CipherMode::Xts) => Ok(CipherAlg::Aes256),
        (len, _) => Err(CryptodevError::UnsupportedKeyLength(len)),
    }
}

fn cipher_params(
    cipher_alg: u32,
    key_len: usize,
) -> Result<(CipherAlg, CipherMode), CryptodevError> {
    let mode = match cipher_alg {
        VIRTIO_CRYPTO_CIPHER_AES_ECB | VIRTIO_CRYPTO_CIPHER_3DES_ECB => CipherMode::Ecb,
        VIRTIO_CRYPTO_CIPHER_AES_CBC | VIRTIO_CRYPTO_CIPHER_3DES_CBC => CipherMode::Cbc,
        VIRTIO_CRYPTO_CIPHER_AES_CTR | VIRTIO_CRYPTO_CIPHER_3DES_CTR => CipherMode::Ctr,
        VIRTIO_CRYPTO_CIPHER_AES_XTS => CipherMode::Xts,
        other => return Err(CryptodevError::UnsupportedCipher(other)),
    };
    let alg = match cipher_alg {
        VIRTIO_CRYPTO_CIPHER_3DES_ECB
        | VIRTIO_CRYPTO_CIPHER_3DES_CBC
        | VIRTIO_CRYPTO_CIPHER_3DES_CTR => {
            if key_len != CipherAlg::Des3Ede.key_len() {
                return Err(CryptodevError::UnsupportedKeyLength(key_len));
            }
            CipherAlg::Des3Ede
        }
        _ => aes_alg(key_len, mode)?,
    };
    Ok((alg, mode))
}

/// The builtin software backend.
#[derive(Debug, Default)]
pub struct BuiltinBackend {
    sessions: SessionTable<BuiltinSession>,
}

impl BuiltinBackend {
    /// Creates a backend with an empty session table.
    pub fn new() -> Self {
        Self::default()
    }

    fn create_cipher_session(info: &SymSessionInfo) -> Result<BuiltinSession, CryptodevError> {
        if info.op_type != VIRTIO_CRYPTO_SYM_OP_CIPHER {
            return Err(CryptodevError::UnsupportedOpType(info.op_type));
        }
        let direction = match info.direction {
            VIRTIO_CRYPTO_OP_ENCRYPT => Direction::Encrypt,
            VIRTIO_CRYPTO_OP_DECRYPT => Direction::Decrypt,
            other => return Err(CryptodevError::InvalidDirection(other)),
        };
        let (alg, mode) = cipher_params(info.cipher_alg, info.key.len())?;
        let cipher = Cipher::new(alg, mode, &info.key)?;
        Ok(BuiltinSession::Cipher { cipher, direction })
    }

    fn create_akcipher_session(info: &AsymSessionInfo) -> Result<BuiltinSession, CryptodevError> {
        let opts = akcipher_options(info)?;
        if !akcipher_supports(&opts) {
            return Err(CryptodevError::UnsupportedAkCipher(info.algo));
        }
        let keytype = akcipher_key_type(info.keytype)?;
        Ok(BuiltinSession::AkCipher(AkCipher::new(
            &opts, keytype, &info.key,
        )?))
    }

    fn new_session(&mut self, info: &SessionInfo) -> Result<u64, CryptodevError> {
        let session = match (info.op_code, &info.params) {
            (VIRTIO_CRYPTO_CIPHER_CREATE_SESSION, SessionParams::Sym(sym)) => {
                Self::create_cipher_session(sym)?
            }
            (VIRTIO_CRYPTO_AKCIPHER_CREATE_SESSION, SessionParams::Asym(asym)) => {
                Self::create_akcipher_session(asym)?
            }
            (VIRTIO_CRYPTO_CIPHER_CREATE_SESSION, _)
            | (VIRTIO_CRYPTO_AKCIPHER_CREATE_SESSION, _) => {
                return Err(CryptodevError::BadMessage(
                    "session parameters do not match the opcode",
                ))
            }
            (op_code, _) => return Err(CryptodevError::UnsupportedOpcode(op_code)),
        };
        self.sessions.insert(session)
    }
}

fn sym_op(
    cipher: &mut Cipher,
    direction: Direction,
    op: &mut SymOpInfo,
) -> Result<(), CryptodevError> {
    if op.op_type == VIRTIO_CRYPTO_SYM_OP_ALGORITHM_CHAINING {
        return Err(CryptodevError::UnsupportedOpType(op.op_type));
    }
    if let Some(iv) = &op.iv {
        cipher.set_iv(iv)?;
    }
    match direction {
        Direction::Encrypt => cipher.encrypt(&op.src, &mut op.dst)?,
        Direction::Decrypt => cipher.decrypt(&op.src, &mut op.dst)?,
    }
    Ok(())
}

impl CryptodevBackendOps for BuiltinBackend {
    fn init(&mut self, conf: &mut CryptodevBackendConf) -> Result<(), CryptodevError> {
        if conf.queues != 1 {
            error!("CRYPTODEV: builtin backend supports a single queue, got {}", conf.queues);
            return Err(CryptodevError::InvalidQueueCount(conf.queues));
        }
        conf.peers
            .register(BackendClient::new(CryptodevBackendType::Builtin, 0));

        conf.crypto_services = 1 << VIRTIO_CRYPTO_SERVICE_CIPHER
            | 1 << VIRTIO_CRYPTO_SERVICE_HASH
            | 1 << VIRTIO_CRYPTO_SERVICE_MAC;
        conf.cipher_algo_l = [
            VIRTIO_CRYPTO_CIPHER_AES_ECB,
            VIRTIO_CRYPTO_CIPHER_AES_CBC,
            VIRTIO_CRYPTO_CIPHER_AES_CTR,
            VIRTIO_CRYPTO_CIPHER_AES_XTS,
            VIRTIO_CRYPTO_CIPHER_3DES_ECB,
            VIRTIO_CRYPTO_CIPHER_3DES_CBC,
            VIRTIO_CRYPTO_CIPHER_3DES_CTR,
        ]
        .iter()
        .fold(0u32, |mask, &alg| mask | (1u32 << alg));
        conf.hash_algo = 1 << VIRTIO_CRYPTO_HASH_SHA1;
        conf.mac_algo_l = 1 << VIRTIO_CRYPTO_MAC_HMAC_SHA1;
        if akcipher_supports(&AkCipherOptions::Rsa(RsaPadding::Raw)) {
            conf.crypto_services |= 1 << VIRTIO_CRYPTO_SERVICE_AKCIPHER;
            conf.akcipher_algo = 1 << VIRTIO_CRYPTO_AKCIPHER_RSA;
        }
        conf.max_size = BUILTIN_MAX_SIZE;
        conf.max_cipher_key_len = BUILTIN_MAX_CIPHER_KEY_LEN;
        conf.max_auth_key_len = BUILTIN_MAX_AUTH_KEY_LEN;
        Ok(())
    }

    fn cleanup(&mut self, conf: &mut CryptodevBackendConf) {
        let closed = self.sessions.close_all().len();
        if closed > 0 {
            debug!("CRYPTODEV: builtin backend closed {} sessions", closed);
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
            error!("CRYPTODEV: cannot create session: {}", err);
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

    fn do_op(&mut self, mut op: OpInfo, cb: OpCallback) -> Result<(), CryptodevError> {
        let Some(session) = self.sessions.get_mut(op.session_id) else {
            let session_id = op.session_id;
            error!("CRYPTODEV: cannot find a valid session id: {}", session_id);
            return reject_op(op, cb, CryptodevError::InvalidSession(session_id));
        };
        let op_code = op.op_code;
        let res = match (session, &mut op.data) {
            (BuiltinSession::Cipher { cipher, direction }, OpData::Sym(sym)) => {
                sym_op(cipher, *direction, sym)
            }
            (BuiltinSession::AkCipher(ak), OpData::Asym(asym)) => akcipher_run(ak, op_code, asym),
            _ => Err(CryptodevError::BadMessage(
                "operation does not match the session algorithm",
            )),
        };
        if let Err(err) = &res {
            error!("CRYPTODEV: operation {:#x} failed: {}", op_code, err);
        }
        cb(res, op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};
    use zeroize::Zeroizing;

    use super::*;
    use crate::crypto::akcipher::tests::test_keys;
    use crate::crypto::cipher::tests::{AES128_KEY, CBC_CIPHERTEXT, CBC_IV, PLAINTEXT};
    use crate::cryptodev::session::MAX_NUM_SESSIONS;
    use crate::cryptodev::tests::{asym_op, rsa_session, Completions};

    fn cipher_session(cipher_alg: u32, key: &[u8], direction: u32) -> SessionInfo {
        SessionInfo {
            op_code: VIRTIO_CRYPTO_CIPHER_CREATE_SESSION,
            params: SessionParams::Sym(SymSessionInfo {
                cipher_alg,
                key: Zeroizing::new(key.to_vec()),
                direction,
                op_type: VIRTIO_CRYPTO_SYM_OP_CIPHER,
            }),
        }
    }

    fn sym_op_info(session_id: u64, op_code: u32, iv: Option<&[u8]>, src: &[u8]) -> OpInfo {
        OpInfo {
            session_id,
            op_code,
            queue_index: 0,
            data: OpData::Sym(SymOpInfo {
                op_type: VIRTIO_CRYPTO_SYM_OP_CIPHER,
                iv: iv.map(<[u8]>::to_vec),
                src: src.to_vec(),
                dst: vec![0; src.len()],
            }),
        }
    }

    fn backend() -> (BuiltinBackend, CryptodevBackendConf) {
        let mut backend = BuiltinBackend::new();
        let mut conf = CryptodevBackendConf::new(1);
        backend.init(&mut conf).unwrap();
        (backend, conf)
    }

    fn create(backend: &mut BuiltinBackend, info: SessionInfo) -> Result<u64, CryptodevError> {
        let completions = Completions::default();
        let ret = backend.create_session(info, 0, completions.session_cb());
        let results = completions.session_results();
        assert_eq!(results.len(), 1);
        assert_eq!(ret, results[0].clone().map(|_| ()));
        results[0].clone()
    }

    fn run(backend: &mut BuiltinBackend, op: OpInfo) -> (Result<(), CryptodevError>, OpInfo) {
        let completions = Completions::default();
        let _ = backend.do_op(op, completions.op_cb());
        let mut ops = completions.take_ops();
        assert_eq!(ops.len(), 1);
        ops.remove(0)
    }

    fn sym_dst(op: &OpInfo) -> &[u8] {
        match &op.data {
            OpData::Sym(sym) => &sym.dst,
            OpData::Asym(_) => panic!("not a symmetric operation"),
        }
    }

    fn asym_out(op: &OpInfo) -> (&[u8], usize) {
        match &op.data {
            OpData::Asym(asym) => (&asym.dst, asym.dst_len),
            OpData::Sym(_) => panic!("not an asymmetric operation"),
        }
    }

    #[test]
    fn test_init() {
        let (_backend, conf) = backend();
        assert_eq!(conf.peers.len(), 1);
        assert_eq!(conf.peers.get(0).unwrap().info_str, "cryptodev-builtin0");
        assert!(conf.has_service(VIRTIO_CRYPTO_SERVICE_CIPHER));
        assert!(conf.has_service(VIRTIO_CRYPTO_SERVICE_HASH));
        assert!(conf.has_service(VIRTIO_CRYPTO_SERVICE_MAC));
        assert!(conf.has_service(VIRTIO_CRYPTO_SERVICE_AKCIPHER));
        assert!(!conf.has_service(VIRTIO_CRYPTO_SERVICE_AEAD));
        assert_ne!(conf.cipher_algo_l & 1 << VIRTIO_CRYPTO_CIPHER_AES_XTS, 0);
        assert_ne!(conf.cipher_algo_l & 1 << VIRTIO_CRYPTO_CIPHER_3DES_CBC, 0);
        assert_eq!(conf.cipher_algo_l & 1 << VIRTIO_CRYPTO_CIPHER_ARC4, 0);
        assert_eq!(conf.hash_algo, 1 << VIRTIO_CRYPTO_HASH_SHA1);
        assert_eq!(conf.akcipher_algo, 1 << VIRTIO_CRYPTO_AKCIPHER_RSA);
        assert_eq!(conf.max_cipher_key_len, 64);
        assert_eq!(conf.max_auth_key_len, 512);
    }

    #[test]
    fn test_init_rejects_multiqueue() {
        let mut backend = BuiltinBackend::new();
        let mut conf = CryptodevBackendConf::new(2);
        assert_eq!(
            backend.init(&mut conf).unwrap_err(),
            CryptodevError::InvalidQueueCount(2)
        );
        assert!(conf.peers.is_empty());
    }

    #[test]
    fn test_aes_key_selection() {
        assert_eq!(aes_alg(16, CipherMode::Cbc).unwrap(), CipherAlg::Aes128);
        assert_eq!(aes_alg(24, CipherMode::Ecb).unwrap(), CipherAlg::Aes192);
        assert_eq!(aes_alg(32, CipherMode::Xts).unwrap(), CipherAlg::Aes128);
        assert_eq!(aes_alg(32, CipherMode::Cbc).unwrap(), CipherAlg::Aes256);
        assert_eq!(aes_alg(64, CipherMode::Xts).unwrap(), CipherAlg::Aes256);
        for mode in [CipherMode::Ecb, CipherMode::Cbc, CipherMode::Ctr] {
            assert_eq!(
                aes_alg(64, mode).unwrap_err(),
                CryptodevError::UnsupportedKeyLength(64)
            );
        }
        assert_eq!(
            aes_alg(20, CipherMode::Cbc).unwrap_err().to_string(),
            "Unsupported key length: 20"
        );
    }

    #[test]
    fn test_xts_sessions() {
        let (mut backend, _conf) = backend();
        let key = [0x11; 64];
        assert_eq!(
            create(
                &mut backend,
                cipher_session(VIRTIO_CRYPTO_CIPHER_AES_XTS, &key[..32], VIRTIO_CRYPTO_OP_ENCRYPT)
            ),
            Ok(0)
        );
        assert_eq!(
            create(
                &mut backend,
                cipher_session(VIRTIO_CRYPTO_CIPHER_AES_XTS, &key, VIRTIO_CRYPTO_OP_ENCRYPT)
            ),
            Ok(1)
        );
        let err = create(
            &mut backend,
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &key, VIRTIO_CRYPTO_OP_ENCRYPT),
        )
        .unwrap_err();
        assert_eq!(err.status_code(), VIRTIO_CRYPTO_NOTSUPP);
    }

    #[test]
    fn test_cbc_encrypt_one_block() {
        let (mut backend, _conf) = backend();
        let id = create(
            &mut backend,
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT),
        )
        .unwrap();
        assert_eq!(id, 0);

        let op = sym_op_info(id, VIRTIO_CRYPTO_CIPHER_ENCRYPT, Some(&CBC_IV), &PLAINTEXT[..16]);
        let (res, op) = run(&mut backend, op);
        assert_eq!(res, Ok(()));
        assert_eq!(sym_dst(&op).len(), 16);
        assert_eq!(sym_dst(&op), &CBC_CIPHERTEXT[..16]);
    }

    #[test]
    fn test_decrypt_session() {
        let (mut backend, _conf) = backend();
        let id = create(
            &mut backend,
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &AES128_KEY, VIRTIO_CRYPTO_OP_DECRYPT),
        )
        .unwrap();
        let op = sym_op_info(id, VIRTIO_CRYPTO_CIPHER_DECRYPT, Some(&CBC_IV), &CBC_CIPHERTEXT);
        let (res, op) = run(&mut backend, op);
        assert_eq!(res, Ok(()));
        assert_eq!(sym_dst(&op), &PLAINTEXT);
    }

    #[test]
    fn test_unsupported_key_length() {
        let (mut backend, _conf) = backend();
        let err = create(
            &mut backend,
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &[0; 20], VIRTIO_CRYPTO_OP_ENCRYPT),
        )
        .unwrap_err();
        assert_eq!(err, CryptodevError::UnsupportedKeyLength(20));
        assert_eq!(err.status_code(), VIRTIO_CRYPTO_NOTSUPP);
        assert!(backend.sessions.is_empty());

        // Slot 0 is still free.
        assert_eq!(
            create(
                &mut backend,
                cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT)
            ),
            Ok(0)
        );
    }

    #[test]
    fn test_3des_key_length() {
        let (mut backend, _conf) = backend();
        assert_eq!(
            create(
                &mut backend,
                cipher_session(VIRTIO_CRYPTO_CIPHER_3DES_CBC, &[0; 16], VIRTIO_CRYPTO_OP_ENCRYPT)
            ),
            Err(CryptodevError::UnsupportedKeyLength(16))
        );
        let key: Vec<u8> = (0..24).collect();
        assert_eq!(
            create(
                &mut backend,
                cipher_session(VIRTIO_CRYPTO_CIPHER_3DES_ECB, &key, VIRTIO_CRYPTO_OP_ENCRYPT)
            ),
            Ok(0)
        );
    }

    #[test]
    fn test_unsupported_session_requests() {
        let (mut backend, _conf) = backend();

        let err = create(
            &mut backend,
            cipher_session(VIRTIO_CRYPTO_CIPHER_ARC4, &[0; 16], VIRTIO_CRYPTO_OP_ENCRYPT),
        )
        .unwrap_err();
        assert_eq!(err, CryptodevError::UnsupportedCipher(VIRTIO_CRYPTO_CIPHER_ARC4));

        let mut info = cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &[0; 16], 0);
        assert_eq!(
            create(&mut backend, info.clone()),
            Err(CryptodevError::InvalidDirection(0))
        );

        if let SessionParams::Sym(sym) = &mut info.params {
            sym.direction = VIRTIO_CRYPTO_OP_ENCRYPT;
            sym.op_type = VIRTIO_CRYPTO_SYM_OP_ALGORITHM_CHAINING;
        }
        let err = create(&mut backend, info.clone()).unwrap_err();
        assert_eq!(err.status_code(), VIRTIO_CRYPTO_NOTSUPP);

        info.op_code = VIRTIO_CRYPTO_HASH_CREATE_SESSION;
        assert_eq!(
            create(&mut backend, info.clone()),
            Err(CryptodevError::UnsupportedOpcode(VIRTIO_CRYPTO_HASH_CREATE_SESSION))
        );
        info.op_code = VIRTIO_CRYPTO_AKCIPHER_CREATE_SESSION;
        assert_eq!(
            create(&mut backend, info).unwrap_err().status_code(),
            VIRTIO_CRYPTO_BADMSG
        );
        assert!(backend.sessions.is_empty());
    }

    #[test]
    fn test_session_capacity() {
        let (mut backend, _conf) = backend();
        for expected in 0..MAX_NUM_SESSIONS as u64 {
            let info =
                cipher_session(VIRTIO_CRYPTO_CIPHER_AES_ECB, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT);
            assert_eq!(create(&mut backend, info), Ok(expected));
        }
        let info =
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_ECB, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT);
        let err = create(&mut backend, info).unwrap_err();
        assert_eq!(err.status_code(), VIRTIO_CRYPTO_NOSPC);

        let completions = Completions::default();
        backend
            .close_session(17, 0, completions.session_cb())
            .unwrap();
        assert_eq!(completions.session_results(), vec![Ok(17)]);
        let info =
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_ECB, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT);
        assert_eq!(create(&mut backend, info), Ok(17));
    }

    #[test]
    #[should_panic(expected = "is not allocated")]
    fn test_close_unknown_session() {
        let (mut backend, _conf) = backend();
        let _ = backend.close_session(3, 0, Box::new(|_| {}));
    }

    #[test]
    fn test_invalid_session_op() {
        let (mut backend, _conf) = backend();
        let completions = Completions::default();
        let op = sym_op_info(5, VIRTIO_CRYPTO_CIPHER_ENCRYPT, None, &[0; 16]);
        assert_eq!(
            backend.do_op(op, completions.op_cb()),
            Err(CryptodevError::InvalidSession(5))
        );
        let ops = completions.take_ops();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].0.as_ref().unwrap_err().status_code(), VIRTIO_CRYPTO_INVSESS);

        let op = sym_op_info(u64::MAX, VIRTIO_CRYPTO_CIPHER_ENCRYPT, None, &[0; 16]);
        let (res, _) = run(&mut backend, op);
        assert_eq!(res, Err(CryptodevError::InvalidSession(u64::MAX)));
    }

    #[test]
    fn test_sym_op_failures() {
        let (mut backend, _conf) = backend();
        let id = create(
            &mut backend,
            cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CBC, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT),
        )
        .unwrap();

        // Accepted, then failed through the callback.
        let completions = Completions::default();
        let op = sym_op_info(id, VIRTIO_CRYPTO_CIPHER_ENCRYPT, Some(&[0; 7]), &PLAINTEXT);
        assert_eq!(backend.do_op(op, completions.op_cb()), Ok(()));
        let (res, _) = completions.take_ops().remove(0);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_ERR);

        let op = sym_op_info(id, VIRTIO_CRYPTO_CIPHER_ENCRYPT, None, &PLAINTEXT[..15]);
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_ERR);

        let mut op = sym_op_info(id, VIRTIO_CRYPTO_CIPHER_ENCRYPT, None, &PLAINTEXT);
        if let OpData::Sym(sym) = &mut op.data {
            sym.dst.truncate(8);
        }
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_ERR);

        let mut op = sym_op_info(id, VIRTIO_CRYPTO_CIPHER_ENCRYPT, None, &PLAINTEXT);
        if let OpData::Sym(sym) = &mut op.data {
            sym.op_type = VIRTIO_CRYPTO_SYM_OP_ALGORITHM_CHAINING;
        }
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_NOTSUPP);

        let op = asym_op(id, VIRTIO_CRYPTO_AKCIPHER_SIGN, &[0; 32], vec![0; 128]);
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_BADMSG);
    }

    #[test]
    fn test_rsa_sign_verify() {
        let (private, public) = test_keys();
        let (mut backend, _conf) = backend();
        let signer = create(
            &mut backend,
            rsa_session(
                VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE,
                &private,
                VIRTIO_CRYPTO_RSA_PKCS1_PADDING,
                VIRTIO_CRYPTO_RSA_SHA256,
            ),
        )
        .unwrap();
        let verifier = create(
            &mut backend,
            rsa_session(
                VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PUBLIC,
                &public,
                VIRTIO_CRYPTO_RSA_PKCS1_PADDING,
                VIRTIO_CRYPTO_RSA_SHA256,
            ),
        )
        .unwrap();

        let digest = Sha256::digest(b"crypto device backend");
        let op = asym_op(signer, VIRTIO_CRYPTO_AKCIPHER_SIGN, &digest, vec![0; 256]);
        let (res, op) = run(&mut backend, op);
        assert_eq!(res, Ok(()));
        let (dst, dst_len) = asym_out(&op);
        assert_eq!(dst_len, 128);
        let signature = dst[..dst_len].to_vec();

        let op = asym_op(verifier, VIRTIO_CRYPTO_AKCIPHER_VERIFY, &signature, digest.to_vec());
        let (res, op) = run(&mut backend, op);
        assert_eq!(res, Ok(()));
        assert_eq!(asym_out(&op).1, 0);

        // Tampered signature.
        let mut tampered = signature.clone();
        tampered[10] ^= 0x01;
        let op = asym_op(verifier, VIRTIO_CRYPTO_AKCIPHER_VERIFY, &tampered, digest.to_vec());
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_KEY_REJECTED);

        // Well formed request with a wrong signature size.
        let op = asym_op(
            verifier,
            VIRTIO_CRYPTO_AKCIPHER_VERIFY,
            &signature[..64],
            digest.to_vec(),
        );
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_ERR);

        // Undersized destination.
        let op = asym_op(signer, VIRTIO_CRYPTO_AKCIPHER_SIGN, &digest, vec![0; 64]);
        let (res, _) = run(&mut backend, op);
        assert_eq!(
            res,
            Err(CryptodevError::DstTooShort {
                needed: 128,
                capacity: 64
            })
        );

        // Public keys cannot sign.
        let op = asym_op(verifier, VIRTIO_CRYPTO_AKCIPHER_SIGN, &digest, vec![0; 128]);
        let (res, _) = run(&mut backend, op);
        assert_eq!(res.unwrap_err().status_code(), VIRTIO_CRYPTO_ERR);
    }

    #[test]
    fn test_rsa_encrypt_decrypt() {
        let (private, public) = test_keys();
        let (mut backend, _conf) = backend();
        let enc = create(
            &mut backend,
            rsa_session(
                VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PUBLIC,
                &public,
                VIRTIO_CRYPTO_RSA_PKCS1_PADDING,
                VIRTIO_CRYPTO_RSA_SHA1,
            ),
        )
        .unwrap();
        let dec = create(
            &mut backend,
            rsa_session(
                VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE,
                &private,
                VIRTIO_CRYPTO_RSA_PKCS1_PADDING,
                VIRTIO_CRYPTO_RSA_SHA1,
            ),
        )
        .unwrap();

        let (res, op) = run(
            &mut backend,
            asym_op(enc, VIRTIO_CRYPTO_AKCIPHER_ENCRYPT, b"secret", vec![0; 128]),
        );
        assert_eq!(res, Ok(()));
        let ciphertext = asym_out(&op).0.to_vec();

        let (res, op) = run(
            &mut backend,
            asym_op(dec, VIRTIO_CRYPTO_AKCIPHER_DECRYPT, &ciphertext, vec![0; 128]),
        );
        assert_eq!(res, Ok(()));
        let (dst, dst_len) = asym_out(&op);
        assert_eq!(&dst[..dst_len], b"secret");
    }

    #[test]
    fn test_rsa_session_validation() {
        let (private, _) = test_keys();
        let (mut backend, _conf) = backend();

        let info = rsa_session(
            VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE,
            &private[..40],
            VIRTIO_CRYPTO_RSA_RAW_PADDING,
            VIRTIO_CRYPTO_RSA_NO_HASH,
        );
        assert_eq!(create(&mut backend, info).unwrap_err().status_code(), VIRTIO_CRYPTO_ERR);

        let info = rsa_session(
            VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE,
            &private,
            VIRTIO_CRYPTO_RSA_PKCS1_PADDING,
            VIRTIO_CRYPTO_RSA_SHA224,
        );
        assert_eq!(
            create(&mut backend, info),
            Err(CryptodevError::UnsupportedHash(VIRTIO_CRYPTO_RSA_SHA224))
        );

        let mut info = rsa_session(
            VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE,
            &private,
            VIRTIO_CRYPTO_RSA_RAW_PADDING,
            VIRTIO_CRYPTO_RSA_NO_HASH,
        );
        if let SessionParams::Asym(asym) = &mut info.params {
            asym.algo = VIRTIO_CRYPTO_AKCIPHER_ECDSA;
        }
        assert_eq!(
            create(&mut backend, info),
            Err(CryptodevError::UnsupportedAkCipher(VIRTIO_CRYPTO_AKCIPHER_ECDSA))
        );
        assert!(backend.sessions.is_empty());
    }

    #[test]
    fn test_cleanup() {
        let (mut backend, mut conf) = backend();
        for _ in 0..3 {
            let info =
                cipher_session(VIRTIO_CRYPTO_CIPHER_AES_CTR, &AES128_KEY, VIRTIO_CRYPTO_OP_ENCRYPT);
            create(&mut backend, info).unwrap();
        }
        backend.cleanup(&mut conf);
        assert!(backend.sessions.is_empty());
        assert!(conf.peers.is_empty());
        // Idempotent.
        backend.cleanup(&mut conf);
    }
}
