// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Cipher layer: symmetric session ciphers and asymmetric identity keys.
//!
//! The deployed server's compatibility contract is AES-256-CBC with PKCS7
//! padding for session traffic, and RSA with PSS-SHA512 signatures and
//! OAEP-SHA1 encryption for handshake material. Symmetric blobs are
//! self-contained: a fresh random 16-byte IV concatenated with the padded
//! ciphertext. All failures that indicate wrong or mismatched key material
//! surface as [`CryptologyError::InvalidKey`] — they are configuration
//! errors, never transient.

use std::path::Path;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    Oaep, Pss, RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::{Digest, Sha512};

use crate::{
    codec::{Packer, Unpacker},
    error::{CryptologyError, CryptologyResult},
};

/// Length of a symmetric session key in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// Length of a CBC initialization vector in bytes.
pub const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric session cipher for one direction of traffic.
///
/// One instance is generated locally per connection attempt (client to
/// server) and one is built from the key the server sends during handshake
/// (server to client). Never persisted or reused across connections.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; SESSION_KEY_LEN],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Creates a cipher from a 256-bit key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if `key` is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> CryptologyResult<Self> {
        let key: [u8; SESSION_KEY_LEN] = key.try_into().map_err(|_| {
            CryptologyError::InvalidKey(format!(
                "session key must be {SESSION_KEY_LEN} bytes, was {}",
                key.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generates a cipher from a fresh random 256-bit key.
    #[must_use]
    pub fn random() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Returns the raw key bytes (sent to the peer during handshake).
    #[must_use]
    pub fn key(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.key
    }

    /// Encrypts `data`, returning `iv ‖ ciphertext` with a fresh random IV.
    #[must_use]
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data);
        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypts an `iv ‖ ciphertext` blob produced by [`Cipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the blob is shorter than one IV, or if the
    /// cipher finalization or PKCS7 unpadding fails (wrong key).
    pub fn decrypt(&self, data: &[u8]) -> CryptologyResult<Vec<u8>> {
        if data.len() < IV_LEN {
            return Err(CryptologyError::InvalidKey(format!(
                "ciphertext too short: {} bytes",
                data.len()
            )));
        }
        let (iv, ciphertext) = data.split_at(IV_LEN);
        let iv: [u8; IV_LEN] = iv.try_into().expect("IV_LEN bytes");
        Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptologyError::InvalidKey("symmetric decryption failed".to_string()))
    }
}

/// Asymmetric identity key pair.
///
/// The public key is always present; the private key only for identities
/// that must sign or decrypt (the local client identity). Immutable once
/// loaded.
#[derive(Clone)]
pub struct Keys {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("has_private", &self.private.is_some())
            .finish_non_exhaustive()
    }
}

impl Keys {
    /// Creates a key pair from already-parsed RSA keys.
    #[must_use]
    pub const fn new(public: RsaPublicKey, private: Option<RsaPrivateKey>) -> Self {
        Self { public, private }
    }

    /// Loads a key pair from PEM files.
    ///
    /// Accepts SPKI/PKCS8 PEM documents with a PKCS1 fallback for
    /// `BEGIN RSA PUBLIC KEY` / `BEGIN RSA PRIVATE KEY` material.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed.
    pub fn load(
        public_path: impl AsRef<Path>,
        private_path: Option<impl AsRef<Path>>,
    ) -> anyhow::Result<Self> {
        let public_pem = std::fs::read_to_string(public_path.as_ref())?;
        let private_pem = match &private_path {
            Some(path) => Some(std::fs::read_to_string(path.as_ref())?),
            None => None,
        };
        Self::from_pem(&public_pem, private_pem.as_deref())
    }

    /// Parses a key pair from PEM strings.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM material cannot be parsed as RSA keys.
    pub fn from_pem(public_pem: &str, private_pem: Option<&str>) -> anyhow::Result<Self> {
        let public = RsaPublicKey::from_public_key_pem(public_pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_pem))
            .map_err(|e| anyhow::anyhow!("failed to parse public key: {e}"))?;
        let private = match private_pem {
            Some(pem) => Some(
                RsaPrivateKey::from_pkcs8_pem(pem)
                    .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                    .map_err(|e| anyhow::anyhow!("failed to parse private key: {e}"))?,
            ),
            None => None,
        };
        Ok(Self { public, private })
    }

    /// Returns whether a private key is present.
    #[must_use]
    pub const fn has_private(&self) -> bool {
        self.private.is_some()
    }

    fn private(&self) -> CryptologyResult<&RsaPrivateKey> {
        self.private
            .as_ref()
            .ok_or_else(|| CryptologyError::InvalidKey("private key not loaded".to_string()))
    }

    /// Signs `data` with the private key (PSS, SHA-512).
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if no private key is loaded or signing fails.
    pub fn sign(&self, data: &[u8]) -> CryptologyResult<Vec<u8>> {
        let digest = Sha512::digest(data);
        self.private()?
            .sign_with_rng(&mut OsRng, Pss::new::<Sha512>(), &digest)
            .map_err(|e| CryptologyError::InvalidKey(format!("signing failed: {e}")))
    }

    /// Verifies a PSS-SHA512 signature over `data` with the public key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the signature does not match.
    pub fn verify(&self, signature: &[u8], data: &[u8]) -> CryptologyResult<()> {
        let digest = Sha512::digest(data);
        self.public
            .verify(Pss::new::<Sha512>(), &digest, signature)
            .map_err(|_| CryptologyError::InvalidKey("signature verification failed".to_string()))
    }

    /// Encrypts a short payload with the public key (OAEP, SHA-1).
    ///
    /// Intended for key-exchange material only; the plaintext must fit a
    /// single RSA block.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the payload is too long for the key size.
    pub fn encrypt(&self, data: &[u8]) -> CryptologyResult<Vec<u8>> {
        self.public
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), data)
            .map_err(|e| CryptologyError::InvalidKey(format!("asymmetric encryption failed: {e}")))
    }

    /// Decrypts a short payload with the private key (OAEP, SHA-1).
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if no private key is loaded or decryption fails.
    pub fn decrypt(&self, data: &[u8]) -> CryptologyResult<Vec<u8>> {
        self.private()?
            .decrypt(Oaep::new::<Sha1>(), data)
            .map_err(|_| CryptologyError::InvalidKey("asymmetric decryption failed".to_string()))
    }
}

/// Signs `data`, envelopes `(signature, data)`, then symmetrically encrypts
/// the envelope.
///
/// Used for every application frame by protocol version 1; version 2 moves
/// signing to the handshake and encrypts frames directly.
///
/// # Errors
///
/// Returns `InvalidKey` if signing fails.
pub fn encrypt_and_sign(keys: &Keys, cipher: &Cipher, data: &[u8]) -> CryptologyResult<Vec<u8>> {
    let mut envelope = Packer::new();
    envelope.pack_bytes(&keys.sign(data)?);
    envelope.pack_bytes(data);
    Ok(cipher.encrypt(&envelope.into_bytes()))
}

/// Inverse of [`encrypt_and_sign`]: decrypts, unpacks, and verifies the
/// signature before returning the inner data.
///
/// # Errors
///
/// Returns `InvalidKey` on decryption or verification failure, or a decode
/// fault if the envelope is malformed.
pub fn decrypt_and_verify(
    keys: &Keys,
    cipher: &Cipher,
    encrypted: &[u8],
) -> CryptologyResult<Vec<u8>> {
    let raw = cipher.decrypt(encrypted)?;
    let mut xdr = Unpacker::new(&raw);
    let signature = xdr.unpack_bytes()?.to_vec();
    let data = xdr.unpack_bytes()?.to_vec();
    keys.verify(&signature, &data)?;
    Ok(data)
}
