//! Field-level encryption for secrets at rest.
//!
//! AES-256-GCM over each secret column. Stored form is
//! `hex(nonce || ciphertext || tag)` with a fresh random nonce per write.

use anyhow::{Context, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

/// Size of the encryption key (32 bytes = 256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce (12 bytes for AES-GCM).
const NONCE_SIZE: usize = 12;

/// Encryptor for credential columns, the private key and inventory text.
///
/// `Debug` never prints key material.
pub struct FieldEncryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldEncryptor { .. }")
    }
}

impl FieldEncryptor {
    /// Create a new encryptor with the given master key.
    ///
    /// The key must be exactly 32 bytes (256 bits), as produced by
    /// `generate_master_key` or read by a `MasterKeyProvider`.
    pub fn new(master_key: &[u8; KEY_SIZE]) -> Result<Self> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
            .map_err(|_| anyhow::anyhow!("Failed to create encryption key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a plaintext string.
    ///
    /// Returns the ciphertext as a hex-encoded string (nonce + ciphertext + tag).
    /// Each call draws a fresh nonce, so equal inputs produce different output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        // Encrypt in-place
        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

        // Prepend nonce to ciphertext
        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a hex-encoded ciphertext string.
    ///
    /// Expects format: hex(nonce + ciphertext + tag). Fails on a wrong key,
    /// a truncated value or tampered bytes.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let sealed = hex::decode(ciphertext_hex).context("Invalid hex encoding")?;
        if sealed.len() < NONCE_SIZE + AES_256_GCM.tag_len() {
            anyhow::bail!("Ciphertext too short");
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
        let nonce_array: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid nonce"))?;

        let mut in_out = encrypted.to_vec();
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_array),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| anyhow::anyhow!("Decryption failed - wrong key or corrupted data"))?;

        String::from_utf8(plaintext.to_vec()).context("Decrypted data is not valid UTF-8")
    }

    /// Encrypt a nullable column; `None` stays `NULL`.
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Decrypt a nullable column; `NULL` stays `None`.
    pub fn decrypt_optional(&self, ciphertext_hex: Option<&str>) -> Result<Option<String>> {
        ciphertext_hex.map(|c| self.decrypt(c)).transpose()
    }
}

/// Generate a random master key.
pub fn generate_master_key() -> Result<[u8; KEY_SIZE]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_SIZE];
    rng.fill(&mut key)
        .map_err(|_| anyhow::anyhow!("Failed to generate random key"))?;
    Ok(key)
}
