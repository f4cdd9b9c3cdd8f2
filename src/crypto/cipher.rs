// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Symmetric block ciphers in ECB, CBC, CTR and XTS modes.

use aes::{Aes128, Aes192, Aes256};
use cipher::consts::U16;
use cipher::generic_array::GenericArray;
use cipher::{
    Block, BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    BlockSizeUser, InnerIvInit, IvSizeUser, IvState, KeyInit, KeyIvInit, StreamCipher,
};
use des::TdesEde3;
use xts_mode::Xts128;
use zeroize::Zeroizing;

const AES_BLOCK_SIZE: usize = 16;

/// Block cipher algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlg {
    /// AES with a 128-bit key.
    Aes128,
    /// AES with a 192-bit key.
    Aes192,
    /// AES with a 256-bit key.
    Aes256,
    /// Triple DES, three independent keys.
    Des3Ede,
}

/// Block cipher mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// Electronic codebook.
    Ecb,
    /// Cipher block chaining.
    Cbc,
    /// Counter.
    Ctr,
    /// XEX-based tweaked codebook with ciphertext stealing.
    Xts,
}

/// Errors of the symmetric cipher primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum CipherError {
    /// Cipher mode {1:?} is not supported with {0:?}
    UnsupportedMode(CipherAlg, CipherMode),
    /// Invalid key length {got} for {alg:?}, expected {expected}
    InvalidKeyLength {
        /// Selected algorithm.
        alg: CipherAlg,
        /// Required key length.
        expected: usize,
        /// Supplied key length.
        got: usize,
    },
    /// Expected IV size {expected} not {got}
    InvalidIvLength {
        /// Required IV length.
        expected: usize,
        /// Supplied IV length.
        got: usize,
    },
    /// Length {0} must be a multiple of the block size {1}
    UnalignedLength(usize, usize),
    /// Length {0} is shorter than one block
    TooShort(usize),
    /// Destination of {dst} bytes cannot hold {src} bytes
    DestinationTooSmall {
        /// Source length.
        src: usize,
        /// Destination capacity.
        dst: usize,
    },
}

impl CipherAlg {
    /// Key length in bytes of a single cipher instance.
    pub fn key_len(self) -> usize {
        match self {
            CipherAlg::Aes128 => 16,
            CipherAlg::Aes192 | CipherAlg::Des3Ede => 24,
            CipherAlg::Aes256 => 32,
        }
    }

    /// Block length in bytes.
    pub fn block_len(self) -> usize {
        match self {
            CipherAlg::Des3Ede => 8,
            _ => AES_BLOCK_SIZE,
        }
    }
}

/// Returns whether the `alg`/`mode` combination can be instantiated.
pub fn cipher_supports(alg: CipherAlg, mode: CipherMode) -> bool {
    !matches!(
        (alg, mode),
        (CipherAlg::Aes192, CipherMode::Xts) | (CipherAlg::Des3Ede, CipherMode::Xts)
    )
}

// A keyed cipher in a given mode. Works in place; callers copy the source first.
trait CipherEngine: Send {
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CipherError>;
    fn encrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError>;
    fn decrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError>;
}

fn check_aligned(len: usize, block: usize) -> Result<(), CipherError> {
    if len % block != 0 {
        return Err(CipherError::UnalignedLength(len, block));
    }
    Ok(())
}

struct EcbEngine<C> {
    cipher: C,
}

impl<C> CipherEngine for EcbEngine<C>
where
    C: BlockEncrypt + BlockDecrypt + Send,
{
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CipherError> {
        Err(CipherError::InvalidIvLength {
            expected: 0,
            got: iv.len(),
        })
    }

    fn encrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        let bs = <C as BlockSizeUser>::block_size();
        check_aligned(buf.len(), bs)?;
        for chunk in buf.chunks_exact_mut(bs) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        let bs = <C as BlockSizeUser>::block_size();
        check_aligned(buf.len(), bs)?;
        for chunk in buf.chunks_exact_mut(bs) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }
}

// The chaining value carries over from one call to the next until a new IV is installed.
struct CbcEngine<C: BlockCipher> {
    cipher: C,
    iv: Block<C>,
}

impl<C> CipherEngine for CbcEngine<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + Clone + Send,
{
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CipherError> {
        let bs = <C as BlockSizeUser>::block_size();
        if iv.len() != bs {
            return Err(CipherError::InvalidIvLength {
                expected: bs,
                got: iv.len(),
            });
        }
        self.iv.copy_from_slice(iv);
        Ok(())
    }

    fn encrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        let bs = <C as BlockSizeUser>::block_size();
        check_aligned(buf.len(), bs)?;
        let mut enc = cbc::Encryptor::<C>::inner_iv_init(self.cipher.clone(), &self.iv);
        for chunk in buf.chunks_exact_mut(bs) {
            enc.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        self.iv = enc.iv_state();
        Ok(())
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        let bs = <C as BlockSizeUser>::block_size();
        check_aligned(buf.len(), bs)?;
        let mut dec = cbc::Decryptor::<C>::inner_iv_init(self.cipher.clone(), &self.iv);
        for chunk in buf.chunks_exact_mut(bs) {
            dec.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        self.iv = dec.iv_state();
        Ok(())
    }
}

// The keystream position carries over between calls until a new IV is installed.
struct CtrEngine<S> {
    key: Zeroizing<Vec<u8>>,
    stream: S,
}

impl<S> CtrEngine<S>
where
    S: KeyIvInit + StreamCipher + Send,
{
    fn new(alg: CipherAlg, key: &[u8]) -> Result<Self, CipherError> {
        let zero_iv = vec![0u8; <S as IvSizeUser>::iv_size()];
        let stream =
            S::new_from_slices(key, &zero_iv).map_err(|_| CipherError::InvalidKeyLength {
                alg,
                expected: alg.key_len(),
                got: key.len(),
            })?;
        Ok(CtrEngine {
            key: Zeroizing::new(key.to_vec()),
            stream,
        })
    }
}

impl<S> CipherEngine for CtrEngine<S>
where
    S: KeyIvInit + StreamCipher + Send,
{
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CipherError> {
        self.stream =
            S::new_from_slices(&self.key, iv).map_err(|_| CipherError::InvalidIvLength {
                expected: <S as IvSizeUser>::iv_size(),
                got: iv.len(),
            })?;
        Ok(())
    }

    fn encrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        self.stream.apply_keystream(buf);
        Ok(())
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        self.stream.apply_keystream(buf);
        Ok(())
    }
}

// The whole request is processed as one data unit, the IV being its tweak.
struct XtsEngine<C: BlockCipher + BlockEncrypt + BlockDecrypt> {
    xts: Xts128<C>,
    tweak: [u8; AES_BLOCK_SIZE],
}

impl<C> CipherEngine for XtsEngine<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + Send,
{
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CipherError> {
        if iv.len() != AES_BLOCK_SIZE {
            return Err(CipherError::InvalidIvLength {
                expected: AES_BLOCK_SIZE,
                got: iv.len(),
            });
        }
        self.tweak.copy_from_slice(iv);
        Ok(())
    }

    fn encrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        if buf.len() < AES_BLOCK_SIZE {
            return Err(CipherError::TooShort(buf.len()));
        }
        self.xts.encrypt_sector(buf, self.tweak);
        Ok(())
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        if buf.len() < AES_BLOCK_SIZE {
            return Err(CipherError::TooShort(buf.len()));
        }
        self.xts.decrypt_sector(buf, self.tweak);
        Ok(())
    }
}

fn block_cipher<C: KeyInit>(alg: CipherAlg, key: &[u8]) -> Result<C, CipherError> {
    C::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength {
        alg,
        expected: alg.key_len(),
        got: key.len(),
    })
}

fn ecb<C>(alg: CipherAlg, key: &[u8]) -> Result<Box<dyn CipherEngine>, CipherError>
where
    C: KeyInit + BlockEncrypt + BlockDecrypt + Send + 'static,
{
    Ok(Box::new(EcbEngine {
        cipher: block_cipher::<C>(alg, key)?,
    }))
}

fn cbc_mode<C>(alg: CipherAlg, key: &[u8]) -> Result<Box<dyn CipherEngine>, CipherError>
where
    C: KeyInit + BlockCipher + BlockEncrypt + BlockDecrypt + Clone + Send + 'static,
{
    Ok(Box::new(CbcEngine {
        cipher: block_cipher::<C>(alg, key)?,
        iv: Block::<C>::default(),
    }))
}

fn xts<C>(alg: CipherAlg, key: &[u8]) -> Result<Box<dyn CipherEngine>, CipherError>
where
    C: KeyInit
        + BlockCipher
        + BlockEncrypt
        + BlockDecrypt
        + BlockSizeUser<BlockSize = U16>
        + Send
        + 'static,
{
    if key.len() != 2 * alg.key_len() {
        return Err(CipherError::InvalidKeyLength {
            alg,
            expected: 2 * alg.key_len(),
            got: key.len(),
        });
    }
    let (data_key, tweak_key) = key.split_at(alg.key_len());
    Ok(Box::new(XtsEngine {
        xts: Xts128::new(
            block_cipher::<C>(alg, data_key)?,
            block_cipher::<C>(alg, tweak_key)?,
        ),
        tweak: [0u8; AES_BLOCK_SIZE],
    }))
}

/// A keyed symmetric cipher.
pub struct Cipher {
    alg: CipherAlg,
    mode: CipherMode,
    engine: Box<dyn CipherEngine>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("alg", &self.alg)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Cipher {
    /// Creates a cipher for `alg` in `mode` keyed with `key`.
    ///
    /// XTS keys are twice the algorithm key length: the data key followed by the tweak key.
    pub fn new(alg: CipherAlg, mode: CipherMode, key: &[u8]) -> Result<Self, CipherError> {
        if !cipher_supports(alg, mode) {
            return Err(CipherError::UnsupportedMode(alg, mode));
        }
        let engine = match (alg, mode) {
            (CipherAlg::Aes128, CipherMode::Ecb) => ecb::<Aes128>(alg, key)?,
            (CipherAlg::Aes192, CipherMode::Ecb) => ecb::<Aes192>(alg, key)?,
            (CipherAlg::Aes256, CipherMode::Ecb) => ecb::<Aes256>(alg, key)?,
            (CipherAlg::Des3Ede, CipherMode::Ecb) => ecb::<TdesEde3>(alg, key)?,
            (CipherAlg::Aes128, CipherMode::Cbc) => cbc_mode::<Aes128>(alg, key)?,
            (CipherAlg::Aes192, CipherMode::Cbc) => cbc_mode::<Aes192>(alg, key)?,
            (CipherAlg::Aes256, CipherMode::Cbc) => cbc_mode::<Aes256>(alg, key)?,
            (CipherAlg::Des3Ede, CipherMode::Cbc) => cbc_mode::<TdesEde3>(alg, key)?,
            (CipherAlg::Aes128, CipherMode::Ctr) => {
                Box::new(CtrEngine::<ctr::Ctr128BE<Aes128>>::new(alg, key)?)
            }
            (CipherAlg::Aes192, CipherMode::Ctr) => {
                Box::new(CtrEngine::<ctr::Ctr128BE<Aes192>>::new(alg, key)?)
            }
            (CipherAlg::Aes256, CipherMode::Ctr) => {
                Box::new(CtrEngine::<ctr::Ctr128BE<Aes256>>::new(alg, key)?)
            }
            (CipherAlg::Des3Ede, CipherMode::Ctr) => {
                Box::new(CtrEngine::<ctr::Ctr64BE<TdesEde3>>::new(alg, key)?)
            }
            (CipherAlg::Aes128, CipherMode::Xts) => xts::<Aes128>(alg, key)?,
            (CipherAlg::Aes256, CipherMode::Xts) => xts::<Aes256>(alg, key)?,
            (_, CipherMode::Xts) => return Err(CipherError::UnsupportedMode(alg, mode)),
        };
        Ok(Cipher { alg, mode, engine })
    }

    /// Algorithm of this cipher.
    pub fn alg(&self) -> CipherAlg {
        self.alg
    }

    /// Mode of this cipher.
    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Installs a new IV (the tweak for XTS, the initial counter block for CTR).
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<(), CipherError> {
        self.engine.set_iv(iv)
    }

    /// Encrypts `src` into the first `src.len()` bytes of `dst`.
    pub fn encrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(), CipherError> {
        let out = prepare(src, dst)?;
        self.engine.encrypt(out)
    }

    /// Decrypts `src` into the first `src.len()` bytes of `dst`.
    pub fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(), CipherError> {
        let out = prepare(src, dst)?;
        self.engine.decrypt(out)
    }
}

fn prepare<'a>(src: &[u8], dst: &'a mut [u8]) -> Result<&'a mut [u8], CipherError> {
    if dst.len() < src.len() {
        return Err(CipherError::DestinationTooSmall {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let out = &mut dst[..src.len()];
    out.copy_from_slice(src);
    Ok(out)
}
