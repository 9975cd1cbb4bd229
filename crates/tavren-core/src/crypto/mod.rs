//! Hashing, signing, and package encryption primitives
//!
//! All keys are derived or supplied at process start and treated as
//! immutable; rotation requires a restart.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation salt for the package content key derivation
const PACKAGE_KEY_SALT: &[u8] = b"tavren-data-packaging-salt";

/// PBKDF2 iteration count for the package content key
const PACKAGE_KEY_ITERATIONS: u32 = 100_000;

/// Hex-encoded SHA-256 of the input
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stable pseudonym for a direct identifier: the first 16 hex chars of its
/// SHA-256. Equal inputs always map to equal pseudonyms.
pub fn pseudonymize(value: &str) -> String {
    sha256_hex(value.as_bytes())[..16].to_string()
}

/// HMAC-SHA256 signature over the message, base64-encoded
pub fn hmac_sign(key: &[u8], message: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a base64-encoded HMAC-SHA256 signature
pub fn hmac_verify(key: &[u8], message: &[u8], signature_b64: &str) -> bool {
    let signature = match BASE64.decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Raw HMAC-SHA256 bytes, base64url-encoded without padding. Used for
/// capability token signatures.
pub fn hmac_sign_url(key: &[u8], message: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    BASE64_URL.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a base64url HMAC-SHA256 signature
pub fn hmac_verify_url(key: &[u8], message: &[u8], signature_b64: &str) -> bool {
    let signature = match BASE64_URL.decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Symmetric cipher for package content, keyed via PBKDF2-HMAC-SHA256 from
/// the server's data encryption secret.
pub struct PackageCipher {
    cipher: Aes256Gcm,
}

impl PackageCipher {
    /// Derive the content key from the server secret
    pub fn from_secret(secret: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            secret.as_bytes(),
            PACKAGE_KEY_SALT,
            PACKAGE_KEY_ITERATIONS,
            &mut key,
        );
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self { cipher }
    }

    /// Encrypt to base64(nonce || ciphertext)
    pub fn encrypt(&self, plaintext: &[u8]) -> CoreResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CoreError::internal("Package content encryption failed"))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt base64(nonce || ciphertext); failures surface as integrity
    /// errors
    pub fn decrypt(&self, encoded: &str) -> CoreResult<Vec<u8>> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| CoreError::integrity("Package content is not valid base64"))?;
        if raw.len() < 12 {
            return Err(CoreError::integrity("Package ciphertext truncated"));
        }
        let (nonce, ciphertext) = raw.split_at(12);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::integrity("Package content decryption failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pseudonym_is_stable_and_short() {
        let a = pseudonymize("user-42");
        let b = pseudonymize("user-42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, pseudonymize("user-43"));
    }

    #[test]
    fn test_hmac_sign_verify_round_trip() {
        let key = b"test-hmac-key";
        let sig = hmac_sign(key, b"payload");
        assert!(hmac_verify(key, b"payload", &sig));
        assert!(!hmac_verify(key, b"tampered", &sig));
        assert!(!hmac_verify(b"other-key", b"payload", &sig));
        assert!(!hmac_verify(key, b"payload", "not base64!!"));
    }

    #[test]
    fn test_hmac_url_variant() {
        let key = b"token-secret";
        let sig = hmac_sign_url(key, b"header.payload");
        assert!(!sig.contains('='));
        assert!(hmac_verify_url(key, b"header.payload", &sig));
        assert!(!hmac_verify_url(key, b"header.other", &sig));
    }

    #[test]
    fn test_package_cipher_round_trip() {
        let cipher = PackageCipher::from_secret("dev-secret");
        let encrypted = cipher.encrypt(b"{\"records\":[]}").unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, b"{\"records\":[]}");
    }

    #[test]
    fn test_package_cipher_rejects_tampering() {
        let cipher = PackageCipher::from_secret("dev-secret");
        let encrypted = cipher.encrypt(b"data").unwrap();
        let mut raw = BASE64.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CoreError::Integrity(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_decrypt() {
        let cipher = PackageCipher::from_secret("key-a");
        let other = PackageCipher::from_secret("key-b");
        let encrypted = cipher.encrypt(b"data").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }
}
