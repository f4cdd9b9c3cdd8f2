// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Access to the kernel key retention service for asymmetric key operations.

use std::ffi::CString;
use std::io;

/// Serial number of a key held by the kernel.
pub type KeySerial = i32;

const KEY_SPEC_PROCESS_KEYRING: KeySerial = -2;

const KEYCTL_UNLINK: libc::c_long = 9;
const KEYCTL_PKEY_ENCRYPT: libc::c_long = 25;
const KEYCTL_PKEY_DECRYPT: libc::c_long = 26;
const KEYCTL_PKEY_SIGN: libc::c_long = 27;
const KEYCTL_PKEY_VERIFY: libc::c_long = 28;

/// Errors of the key retention service.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum KeyringError {
    /// Invalid argument: {0}
    InvalidArgument(&'static str),
    /// Failed to add key: {0}
    AddKey(io::Error),
    /// Key operation failed: {0}
    Operation(io::Error),
    /// Signature rejected by the key
    KeyRejected,
    /// Failed to unlink key: {0}
    Unlink(io::Error),
}

impl From<KeyringError> for super::CryptodevError {
    fn from(err: KeyringError) -> Self {
        match err {
            KeyringError::KeyRejected => super::CryptodevError::KeyRejected,
            err => super::CryptodevError::Keyring(err.to_string()),
        }
    }
}

/// Operations producing an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringOp {
    /// Public key encryption.
    Encrypt,
    /// Private key decryption.
    Decrypt,
    /// Signature generation.
    Sign,
}

/// A facility storing private keys and running operations with them.
pub trait KeyRing: Send + Sync + std::fmt::Debug {
    /// Uploads `payload` as a key of `key_type` and returns its serial.
    fn upload_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
    ) -> Result<KeySerial, KeyringError>;

    /// Runs `op` with the key and returns the number of bytes written to `output`.
    fn crypt(
        &self,
        key: KeySerial,
        op: KeyringOp,
        info: &str,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, KeyringError>;

    /// Checks `signature` over `digest`.
    fn verify(
        &self,
        key: KeySerial,
        info: &str,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), KeyringError>;

    /// Removes the key from the keyring it was uploaded to.
    fn revoke(&self, key: KeySerial) -> Result<(), KeyringError>;
}

/// Layout of `struct keyctl_pkey_params`.
#[repr(C)]
#[derive(Debug, Default)]
struct KeyctlPkeyParams {
    key_id: i32,
    in_len: u32,
    // `out_len` or `in2_len` depending on the operation.
    out_len: u32,
    spare: [u32; 7],
}

/// The process keyring of the calling process.
#[derive(Debug, Default)]
pub struct KernelKeyring;

impl KernelKeyring {
    fn pkey_op(
        op: libc::c_long,
        params: &KeyctlPkeyParams,
        info: &CString,
        in1: *const u8,
        in2_or_out: *const u8,
    ) -> io::Result<usize> {
        // SAFETY: `params` and `info` are valid for the duration of the call, and the buffer
        // pointers come from slices whose lengths are the ones recorded in `params`.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                op,
                params as *const KeyctlPkeyParams,
                info.as_ptr(),
                in1,
                in2_or_out,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        usize::try_from(ret).map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))
    }
}

fn c_string(value: &str, what: &'static str) -> Result<CString, KeyringError> {
    CString::new(value).map_err(|_| KeyringError::InvalidArgument(what))
}

fn c_len(len: usize, what: &'static str) -> Result<u32, KeyringError> {
    u32::try_from(len).map_err(|_| KeyringError::InvalidArgument(what))
}

impl KeyRing for KernelKeyring {
    fn upload_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
    ) -> Result<KeySerial, KeyringError> {
        let key_type = c_string(key_type, "key type")?;
        let description = c_string(description, "key description")?;
        // SAFETY: the strings are NUL terminated and `payload` is valid for `payload.len()`
        // bytes. The kernel copies the payload before returning.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_add_key,
                key_type.as_ptr(),
                description.as_ptr(),
                payload.as_ptr(),
                payload.len(),
                libc::c_long::from(KEY_SPEC_PROCESS_KEYRING),
            )
        };
        if ret < 0 {
            return Err(KeyringError::AddKey(io::Error::last_os_error()));
        }
        KeySerial::try_from(ret).map_err(|_| KeyringError::InvalidArgument("key serial"))
    }

    fn crypt(
        &self,
        key: KeySerial,
        op: KeyringOp,
        info: &str,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, KeyringError> {
        let params = KeyctlPkeyParams {
            key_id: key,
            in_len: c_len(input.len(), "input length")?,
            out_len: c_len(output.len(), "output length")?,
            ..Default::default()
        };
        let info = c_string(info, "operation info")?;
        let op = match op {
            KeyringOp::Encrypt => KEYCTL_PKEY_ENCRYPT,
            KeyringOp::Decrypt => KEYCTL_PKEY_DECRYPT,
            KeyringOp::Sign => KEYCTL_PKEY_SIGN,
        };
        Self::pkey_op(op, &params, &info, input.as_ptr(), output.as_mut_ptr())
            .map_err(KeyringError::Operation)
    }

    fn verify(
        &self,
        key: KeySerial,
        info: &str,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), KeyringError> {
        let params = KeyctlPkeyParams {
            key_id: key,
            in_len: c_len(digest.len(), "digest length")?,
            out_len: c_len(signature.len(), "signature length")?,
            ..Default::default()
        };
        let info = c_string(info, "operation info")?;
        match Self::pkey_op(
            KEYCTL_PKEY_VERIFY,
            &params,
            &info,
            digest.as_ptr(),
            signature.as_ptr(),
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EKEYREJECTED) => {
                Err(KeyringError::KeyRejected)
            }
            Err(err) => Err(KeyringError::Operation(err)),
        }
    }

    fn revoke(&self, key: KeySerial) -> Result<(), KeyringError> {
        // SAFETY: KEYCTL_UNLINK only takes integer arguments.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                KEYCTL_UNLINK,
                libc::c_long::from(key),
                libc::c_long::from(KEY_SPEC_PROCESS_KEYRING),
            )
        };
        if ret < 0 {
            return Err(KeyringError::Unlink(io::Error::last_os_error()));
        }
        Ok(())
    }
}
