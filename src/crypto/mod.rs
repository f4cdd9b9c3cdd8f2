// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic primitives used by the crypto backends.
//!
//! Thin, owned wrappers over the RustCrypto implementations so the backends only deal with
//! an algorithm identifier, a key and byte buffers.

pub mod akcipher;
pub mod cipher;

pub use self::akcipher::{
    akcipher_supports, AkCipher, AkCipherError, AkCipherKeyType, AkCipherOptions, HashAlg,
    RsaPadding,
};
pub use self::cipher::{cipher_supports, Cipher, CipherAlg, CipherError, CipherMode};
