use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    // Bounds a container header may request; anything outside is refused
    // rather than clamped.
    const MAX_M_COST: u32 = 4 * 1024 * 1024;
    const MAX_T_COST: u32 = 64;
    const MAX_P_COST: u32 = 16;

    pub fn is_supported(&self) -> bool {
        (1..=Self::MAX_P_COST).contains(&self.p_cost)
            && (1..=Self::MAX_T_COST).contains(&self.t_cost)
            && self.m_cost >= 8 * self.p_cost
            && self.m_cost <= Self::MAX_M_COST
    }
}

/// Passphrase and optional key-file material folded into one 32-byte secret:
/// `SHA-256(SHA-256(passphrase) || SHA-256(key material))`.
#[derive(Clone)]
pub struct CompositeKey(Zeroizing<[u8; KEY_LEN]>);

impl CompositeKey {
    pub fn new(passphrase: &str, key_material: Option<&[u8]>) -> Self {
        let mut outer = Sha256::new();
        outer.update(Sha256::digest(passphrase.as_bytes()));
        if let Some(material) = key_material {
            outer.update(Sha256::digest(material));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&outer.finalize());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompositeKey(***)")
    }
}

/// Nonce and ciphertext of one AEAD seal, base64-encoded for the container.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SealedBlob {
    pub nonce: String,
    pub data: String,
}

pub fn derive_key_with_params(
    secret: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| anyhow!("Invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| anyhow!("Key derivation failed: {e}"))?;
    Ok(key)
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn encrypt_with_key(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<SealedBlob> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = random_bytes::<NONCE_LEN>();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| anyhow!("Encryption failed: {e}"))?;

    Ok(SealedBlob {
        nonce: base64::engine::general_purpose::STANDARD.encode(nonce_bytes),
        data: base64::engine::general_purpose::STANDARD.encode(ciphertext),
    })
}

/// Errors only on authentication failure; malformed encodings are reported
/// by [`decode_blob`] before this point.
pub fn decrypt_with_key(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| anyhow!("Decryption failed. Wrong credentials?"))
}

pub fn decode_blob(blob: &SealedBlob) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let nonce = base64::engine::general_purpose::STANDARD
        .decode(&blob.nonce)
        .map_err(|e| anyhow!("Invalid nonce encoding: {e}"))?;
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| anyhow!("Invalid nonce length"))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(&blob.data)
        .map_err(|e| anyhow!("Invalid ciphertext encoding: {e}"))?;
    Ok((nonce, data))
}
