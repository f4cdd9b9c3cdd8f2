// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Constants shared with the virtio-crypto frontend (Virtio Spec 1.2, Section 5.9).
//!
//! Status codes, service bits, algorithm identifiers and opcodes cross the frontend/backend
//! boundary verbatim.

#![allow(missing_docs)]

// Status codes.
pub const VIRTIO_CRYPTO_OK: u8 = 0;
pub const VIRTIO_CRYPTO_ERR: u8 = 1;
pub const VIRTIO_CRYPTO_BADMSG: u8 = 2;
pub const VIRTIO_CRYPTO_NOTSUPP: u8 = 3;
pub const VIRTIO_CRYPTO_INVSESS: u8 = 4;
pub const VIRTIO_CRYPTO_NOSPC: u8 = 5;
pub const VIRTIO_CRYPTO_KEY_REJECTED: u8 = 6;

// Device status bits.
pub const VIRTIO_CRYPTO_S_HW_READY: u32 = 1 << 0;

// Services.
pub const VIRTIO_CRYPTO_SERVICE_CIPHER: u32 = 0;
pub const VIRTIO_CRYPTO_SERVICE_HASH: u32 = 1;
pub const VIRTIO_CRYPTO_SERVICE_MAC: u32 = 2;
pub const VIRTIO_CRYPTO_SERVICE_AEAD: u32 = 3;
pub const VIRTIO_CRYPTO_SERVICE_AKCIPHER: u32 = 4;

/// Builds an opcode from a service and an operation.
pub const fn virtio_crypto_opcode(service: u32, op: u32) -> u32 {
    (service << 8) | op
}

// Control queue opcodes.
pub const VIRTIO_CRYPTO_CIPHER_CREATE_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_CIPHER, 0x02);
pub const VIRTIO_CRYPTO_CIPHER_DESTROY_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_CIPHER, 0x03);
pub const VIRTIO_CRYPTO_HASH_CREATE_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_HASH, 0x02);
pub const VIRTIO_CRYPTO_HASH_DESTROY_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_HASH, 0x03);
pub const VIRTIO_CRYPTO_MAC_CREATE_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_MAC, 0x02);
pub const VIRTIO_CRYPTO_MAC_DESTROY_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_MAC, 0x03);
pub const VIRTIO_CRYPTO_AEAD_CREATE_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AEAD, 0x02);
pub const VIRTIO_CRYPTO_AEAD_DESTROY_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AEAD, 0x03);
pub const VIRTIO_CRYPTO_AKCIPHER_CREATE_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AKCIPHER, 0x04);
pub const VIRTIO_CRYPTO_AKCIPHER_DESTROY_SESSION: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AKCIPHER, 0x05);

// Data queue opcodes.
pub const VIRTIO_CRYPTO_CIPHER_ENCRYPT: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_CIPHER, 0x00);
pub const VIRTIO_CRYPTO_CIPHER_DECRYPT: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_CIPHER, 0x01);
pub const VIRTIO_CRYPTO_HASH: u32 = virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_HASH, 0x00);
pub const VIRTIO_CRYPTO_MAC: u32 = virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_MAC, 0x00);
pub const VIRTIO_CRYPTO_AEAD_ENCRYPT: u32 = virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AEAD, 0x00);
pub const VIRTIO_CRYPTO_AEAD_DECRYPT: u32 = virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AEAD, 0x01);
pub const VIRTIO_CRYPTO_AKCIPHER_ENCRYPT: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AKCIPHER, 0x00);
pub const VIRTIO_CRYPTO_AKCIPHER_DECRYPT: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AKCIPHER, 0x01);
pub const VIRTIO_CRYPTO_AKCIPHER_SIGN: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AKCIPHER, 0x02);
pub const VIRTIO_CRYPTO_AKCIPHER_VERIFY: u32 =
    virtio_crypto_opcode(VIRTIO_CRYPTO_SERVICE_AKCIPHER, 0x03);

// Cipher algorithms.
pub const VIRTIO_CRYPTO_NO_CIPHER: u32 = 0;
pub const VIRTIO_CRYPTO_CIPHER_ARC4: u32 = 1;
pub const VIRTIO_CRYPTO_CIPHER_AES_ECB: u32 = 2;
pub const VIRTIO_CRYPTO_CIPHER_AES_CBC: u32 = 3;
pub const VIRTIO_CRYPTO_CIPHER_AES_CTR: u32 = 4;
pub const VIRTIO_CRYPTO_CIPHER_DES_ECB: u32 = 5;
pub const VIRTIO_CRYPTO_CIPHER_DES_CBC: u32 = 6;
pub const VIRTIO_CRYPTO_CIPHER_3DES_ECB: u32 = 7;
pub const VIRTIO_CRYPTO_CIPHER_3DES_CBC: u32 = 8;
pub const VIRTIO_CRYPTO_CIPHER_3DES_CTR: u32 = 9;
pub const VIRTIO_CRYPTO_CIPHER_AES_XTS: u32 = 13;

// Hash and MAC algorithms.
pub const VIRTIO_CRYPTO_HASH_SHA1: u32 = 2;
pub const VIRTIO_CRYPTO_MAC_HMAC_SHA1: u32 = 2;

// Asymmetric algorithms.
pub const VIRTIO_CRYPTO_NO_AKCIPHER: u32 = 0;
pub const VIRTIO_CRYPTO_AKCIPHER_RSA: u32 = 1;
pub const VIRTIO_CRYPTO_AKCIPHER_ECDSA: u32 = 2;

// Asymmetric key types.
pub const VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PUBLIC: u32 = 1;
pub const VIRTIO_CRYPTO_AKCIPHER_KEY_TYPE_PRIVATE: u32 = 2;

// RSA padding algorithms.
pub const VIRTIO_CRYPTO_RSA_RAW_PADDING: u32 = 0;
pub const VIRTIO_CRYPTO_RSA_PKCS1_PADDING: u32 = 1;

// RSA hash algorithms.
pub const VIRTIO_CRYPTO_RSA_NO_HASH: u32 = 0;
pub const VIRTIO_CRYPTO_RSA_MD2: u32 = 1;
pub const VIRTIO_CRYPTO_RSA_MD3: u32 = 2;
pub const VIRTIO_CRYPTO_RSA_MD4: u32 = 3;
pub const VIRTIO_CRYPTO_RSA_MD5: u32 = 4;
pub const VIRTIO_CRYPTO_RSA_SHA1: u32 = 5;
pub const VIRTIO_CRYPTO_RSA_SHA256: u32 = 6;
pub const VIRTIO_CRYPTO_RSA_SHA384: u32 = 7;
pub const VIRTIO_CRYPTO_RSA_SHA512: u32 = 8;
pub const VIRTIO_CRYPTO_RSA_SHA224: u32 = 9;

// Symmetric operation types.
pub const VIRTIO_CRYPTO_SYM_OP_NONE: u32 = 0;
pub const VIRTIO_CRYPTO_SYM_OP_CIPHER: u32 = 1;
pub const VIRTIO_CRYPTO_SYM_OP_ALGORITHM_CHAINING: u32 = 2;

// Cipher directions.
pub const VIRTIO_CRYPTO_OP_ENCRYPT: u32 = 1;
pub const VIRTIO_CRYPTO_OP_DECRYPT: u32 = 2;
