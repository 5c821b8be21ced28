use std::fmt;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use p384::ecdh::EphemeralSecret;
use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::pkcs8::DecodePublicKey;
use p384::PublicKey;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::challenge::build_challenge;
use crate::encoding::decode_material;
use crate::error::{Result, SecurityError};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// CTR initial counter block length in bytes.
pub const IV_LEN: usize = 16;

/// Raw `r || s` length of a P-384 ECDSA signature.
const RAW_SIGNATURE_LEN: usize = 96;

/// Lifecycle of a [`SecurityContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    Uninitialized,
    KeyPairGenerated,
    Active,
    Failed,
}

impl fmt::Display for SecurityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityState::Uninitialized => "uninitialized",
            SecurityState::KeyPairGenerated => "key pair generated",
            SecurityState::Active => "active",
            SecurityState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Key material published by the server alongside the API document.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityMaterial {
    /// Server ECDH public key.
    pub key_enc: String,
    /// Server ECDSA verification key.
    pub key_ver: String,
    /// Signature over `nonce + key_enc + key_ver`.
    pub signature: String,
}

impl SecurityMaterial {
    pub fn new(
        key_enc: impl Into<String>,
        key_ver: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            key_enc: key_enc.into(),
            key_ver: key_ver.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Debug for SecurityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityMaterial")
            .field("key_enc", &self.key_enc)
            .field("key_ver", &self.key_ver)
            .field(
                "signature",
                &format_args!("<redacted:{} bytes>", self.signature.len()),
            )
            .finish()
    }
}

#[derive(Clone, Copy)]
struct CipherKey([u8; KEY_LEN]);

struct Inner {
    state: SecurityState,
    local: Option<EphemeralSecret>,
    public_hex: Option<String>,
    key: Option<CipherKey>,
}

impl Inner {
    fn empty(state: SecurityState) -> Self {
        Self {
            state,
            local: None,
            public_hex: None,
            key: None,
        }
    }
}

/// Key exchange, signature verification and symmetric encryption for one
/// session.
///
/// All methods take `&self`; the context is meant to be shared behind an
/// `Arc`. The derived key is replaced wholesale and copied out of the lock
/// before any cipher work runs.
pub struct SecurityContext {
    inner: RwLock<Inner>,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::empty(SecurityState::Uninitialized)),
        }
    }

    pub fn state(&self) -> SecurityState {
        self.inner.read().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SecurityState::Active
    }

    /// Hex of the uncompressed SEC1 local public key, once generated.
    pub fn public_key_hex(&self) -> Option<String> {
        self.inner.read().public_hex.clone()
    }

    /// Generate a fresh ephemeral P-384 ECDH key pair and return the public
    /// key as hex of the uncompressed SEC1 point.
    ///
    /// Replaces any previous pair. Rejected once the context is active.
    pub fn generate_local_key_pair(&self) -> Result<String> {
        let mut inner = self.inner.write();
        if inner.state == SecurityState::Active {
            return Err(SecurityError::InvalidState {
                operation: "generate a key pair",
                state: inner.state,
            });
        }

        let secret = EphemeralSecret::random(&mut OsRng);
        let public_hex = hex::encode(secret.public_key().to_encoded_point(false).as_bytes());

        *inner = Inner {
            state: SecurityState::KeyPairGenerated,
            local: Some(secret),
            public_hex: Some(public_hex.clone()),
            key: None,
        };
        debug!("local ECDH key pair generated");
        Ok(public_hex)
    }

    /// Verify the server material against `nonce` and derive the session
    /// key.
    ///
    /// Any failure leaves the context [`SecurityState::Failed`] with all key
    /// material dropped.
    pub fn init_from_server_material(
        &self,
        material: &SecurityMaterial,
        nonce: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state != SecurityState::KeyPairGenerated {
            return Err(SecurityError::InvalidState {
                operation: "initialize from server material",
                state: inner.state,
            });
        }

        let derived = inner
            .local
            .as_ref()
            .ok_or(SecurityError::InvalidState {
                operation: "initialize from server material",
                state: inner.state,
            })
            .and_then(|local| verify_and_derive(local, material, nonce));

        match derived {
            Ok(key) => {
                let public_hex = inner.public_hex.take();
                *inner = Inner {
                    state: SecurityState::Active,
                    local: None,
                    public_hex,
                    key: Some(key),
                };
                info!("security context active");
                Ok(())
            }
            Err(err) => {
                *inner = Inner::empty(SecurityState::Failed);
                warn!(error = %err, "server security material rejected");
                Err(err)
            }
        }
    }

    /// Encrypt with a fresh random IV. Returns `iv || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.active_key()?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut out = Vec::with_capacity(IV_LEN + plaintext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(plaintext);
        apply_keystream(&key, &iv, &mut out[IV_LEN..])?;
        Ok(out)
    }

    /// Decrypt `iv || ciphertext`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.active_key()?;
        if data.len() < IV_LEN {
            return Err(SecurityError::InvalidCiphertext {
                len: data.len(),
                min: IV_LEN,
            });
        }

        let (iv, ciphertext) = data.split_at(IV_LEN);
        let mut out = ciphertext.to_vec();
        apply_keystream(&key, iv, &mut out)?;
        Ok(out)
    }

    /// Drop all key material and return to [`SecurityState::Uninitialized`].
    pub fn destroy(&self) {
        *self.inner.write() = Inner::empty(SecurityState::Uninitialized);
        debug!("security context destroyed");
    }

    fn active_key(&self) -> Result<CipherKey> {
        let inner = self.inner.read();
        match (inner.state, inner.key) {
            (SecurityState::Active, Some(key)) => Ok(key),
            _ => Err(SecurityError::NotActive),
        }
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SecurityContext")
            .field("state", &inner.state)
            .field("public_key", &inner.public_hex)
            .field("key", &inner.key.map(|_| "<redacted>"))
            .finish()
    }
}

fn verify_and_derive(
    local: &EphemeralSecret,
    material: &SecurityMaterial,
    nonce: &str,
) -> Result<CipherKey> {
    let remote = import_ecdh_key(&material.key_enc)?;
    let verifier = import_verifying_key(&material.key_ver)?;
    let signature = parse_signature(&material.signature)?;

    let challenge = build_challenge(nonce, &material.key_enc, &material.key_ver);
    verifier
        .verify(challenge.as_bytes(), &signature)
        .map_err(|_| SecurityError::SignatureInvalid)?;

    let shared = local.diffie_hellman(&remote);
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&shared.raw_secret_bytes()[..KEY_LEN]);
    Ok(CipherKey(key))
}

fn import_ecdh_key(text: &str) -> Result<PublicKey> {
    let bytes = decode_material("keyEnc", text)?;
    PublicKey::from_public_key_der(&bytes)
        .or_else(|_| PublicKey::from_sec1_bytes(&bytes))
        .map_err(|_| unsupported_key("keyEnc", bytes.len()))
}

fn import_verifying_key(text: &str) -> Result<VerifyingKey> {
    let bytes = decode_material("keyVer", text)?;
    VerifyingKey::from_public_key_der(&bytes)
        .or_else(|_| VerifyingKey::from_sec1_bytes(&bytes))
        .map_err(|_| unsupported_key("keyVer", bytes.len()))
}

fn unsupported_key(field: &'static str, len: usize) -> SecurityError {
    SecurityError::Unsupported(format!(
        "{field} ({len} bytes) is neither a P-384 SPKI document nor a SEC1 point"
    ))
}

fn parse_signature(text: &str) -> Result<Signature> {
    let bytes = decode_material("signature", text)?;
    let parsed = if bytes.len() == RAW_SIGNATURE_LEN {
        Signature::from_slice(&bytes)
    } else {
        Signature::from_der(&bytes)
    };
    // A malformed signature is indistinguishable from a forged one.
    parsed.map_err(|_| SecurityError::SignatureInvalid)
}

fn apply_keystream(key: &CipherKey, iv: &[u8], buf: &mut [u8]) -> Result<()> {
    let mut cipher = Aes128Ctr::new_from_slices(&key.0, iv)
        .map_err(|e| SecurityError::Crypto(format!("AES-CTR setup: {e}")))?;
    cipher
        .try_apply_keystream(buf)
        .map_err(|e| SecurityError::Crypto(format!("AES-CTR keystream: {e}")))
}
