use crate::fingerprint::NarInfoRecord;
use crate::signature::NarSignature;
use base64::{Engine, engine::general_purpose};
use ed25519_dalek::{Signer, SigningKey as DalekSigningKey, Verifier, VerifyingKey};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Failed to gather entropy for key generation: {0}")]
    Entropy(String),
}

/// Split a `name:base64` key string on its first colon and decode the key material.
fn parse_key_string(s: &str) -> Result<(String, Vec<u8>), SigningError> {
    let (name, key_base64) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| SigningError::InvalidKeyFormat("key does not contain a ':'".to_string()))?;

    if name.is_empty() {
        return Err(SigningError::InvalidKeyFormat("empty key name".to_string()));
    }

    let key = general_purpose::STANDARD
        .decode(key_base64.trim())
        .map_err(|e| SigningError::InvalidKeyFormat(format!("invalid base64: {e}")))?;

    Ok((name.to_string(), key))
}

/// A named ed25519 secret key in Nix's `name:base64` encoding
///
/// The key material may be the 32-byte seed or the 64-byte
/// seed‖public-key form written by `nix key generate-secret`.
#[derive(Clone, Debug)]
pub struct SigningKey {
    pub name: String,
    key: DalekSigningKey,
}

impl SigningKey {
    pub fn parse(s: &str) -> Result<Self, SigningError> {
        let (name, key) = parse_key_string(s)?;

        if key.len() != 32 && key.len() != 64 {
            return Err(SigningError::InvalidKeyFormat(format!(
                "expected 32 or 64 bytes, got {}",
                key.len()
            )));
        }

        // Both encodings start with the seed.
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&key[..32]);

        Ok(Self {
            name,
            key: DalekSigningKey::from_bytes(&seed),
        })
    }

    /// Parse a secret key from a file containing a single `name:base64` line
    pub fn from_file(path: &Path) -> Result<Self, SigningError> {
        let content = std::fs::read_to_string(path).map_err(|source| SigningError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Create a new key from the operating system's random number generator
    pub fn generate(name: &str) -> Result<Self, SigningError> {
        if name.is_empty() || name.contains(':') {
            return Err(SigningError::InvalidKeyFormat(format!(
                "key name {name:?} must be non-empty and must not contain ':'"
            )));
        }

        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed).map_err(|e| SigningError::Entropy(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            key: DalekSigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            name: self.name.clone(),
            key: self.key.verifying_key(),
        }
    }

    /// The 64-byte seed‖public-key form, as Nix writes secret key files
    pub fn to_text(&self) -> String {
        format!(
            "{}:{}",
            self.name,
            general_purpose::STANDARD.encode(self.key.to_keypair_bytes())
        )
    }

    pub fn sign(&self, msg: &[u8]) -> NarSignature {
        NarSignature::new(self.name.clone(), self.key.sign(msg))
    }

    /// Sign the fingerprint of `record` and return the `name:base64` signature text
    pub fn sign_record(&self, record: &NarInfoRecord) -> String {
        self.sign(record.fingerprint().as_bytes()).to_text()
    }
}

/// A named ed25519 public key in Nix's `name:base64` encoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub name: String,
    key: VerifyingKey,
}

impl PublicKey {
    pub fn parse(s: &str) -> Result<Self, SigningError> {
        let (name, key) = parse_key_string(s)?;

        let key_bytes: [u8; 32] = key.as_slice().try_into().map_err(|_| {
            SigningError::InvalidKeyFormat(format!("expected 32 bytes, got {}", key.len()))
        })?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| SigningError::InvalidKeyFormat(format!("invalid ed25519 key: {e}")))?;

        Ok(Self { name, key })
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}:{}",
            self.name,
            general_purpose::STANDARD.encode(self.key.as_bytes())
        )
    }

    /// Check a `name:base64` signature against the fingerprint of `record`.
    ///
    /// Any mismatch, including a malformed signature or one issued under
    /// a different key name, is `false`.
    pub fn verify_record(&self, record: &NarInfoRecord, signature: &str) -> bool {
        let Ok(sig) = NarSignature::parse(signature) else {
            return false;
        };
        if sig.key_name != self.name {
            return false;
        }
        self.key
            .verify(record.fingerprint().as_bytes(), &sig.sig)
            .is_ok()
    }
}

/// Sign `record` with a `name:base64` secret key string.
pub fn sign(record: &NarInfoRecord, private_key: &str) -> Result<String, SigningError> {
    Ok(SigningKey::parse(private_key)?.sign_record(record))
}

/// Verify `signature` over `record` with a `name:base64` public key string.
pub fn verify(
    record: &NarInfoRecord,
    signature: &str,
    public_key: &str,
) -> Result<bool, SigningError> {
    Ok(PublicKey::parse(public_key)?.verify_record(record, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record() -> NarInfoRecord {
        NarInfoRecord::new(
            "/nix/store/26xbg1ndr7hbcncrlf9nhx5is2b25d13-hello-2.12.1",
            "sha256:1mkvday29m2qxg1fnbv8xh9s6151bh8a2xzhh0k86j7lqhyfwibh",
            226560,
            vec![
                "/nix/store/26xbg1ndr7hbcncrlf9nhx5is2b25d13-hello-2.12.1".to_string(),
                "/nix/store/sl141d1g77wvhr050ah87lcyz2czdxa3-glibc-2.40-36".to_string(),
            ],
        )
    }

    fn seed_only(key: &SigningKey) -> String {
        format!(
            "{}:{}",
            key.name,
            general_purpose::STANDARD.encode(key.key.to_bytes())
        )
    }

    #[test]
    fn test_parse_signing_key() {
        let key_str = "test-key:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
        let key = SigningKey::parse(key_str).unwrap();
        assert_eq!(key.name, "test-key");
    }

    #[test]
    fn test_sign_round_trip() {
        let key = SigningKey::generate("cache.example.com-1").unwrap();
        let public = key.public_key().to_text();

        let sig = sign(&record(), &key.to_text()).unwrap();
        assert!(sig.starts_with("cache.example.com-1:"));
        assert!(verify(&record(), &sig, &public).unwrap());
    }

    #[test]
    fn test_seed_and_combined_forms_agree() {
        let key = SigningKey::generate("k").unwrap();
        let combined = sign(&record(), &key.to_text()).unwrap();
        let seed = sign(&record(), &seed_only(&key)).unwrap();
        // ed25519 signatures are deterministic
        assert_eq!(combined, seed);
    }

    #[test]
    fn test_tampered_record_fails() {
        let key = SigningKey::generate("k").unwrap();
        let sig = key.sign_record(&record());

        let mut tampered = record();
        tampered.nar_size += 1;
        assert!(!key.public_key().verify_record(&tampered, &sig));
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = SigningKey::generate("k").unwrap();
        let b = SigningKey::generate("k").unwrap();
        let sig = a.sign_record(&record());
        assert!(!b.public_key().verify_record(&record(), &sig));
    }

    #[test]
    fn test_key_name_mismatch_fails() {
        let key = SigningKey::generate("a").unwrap();
        let sig = key.sign_record(&record());
        let renamed = format!("b:{}", key.public_key().to_text().split_once(':').unwrap().1);
        assert!(!verify(&record(), &sig, &renamed).unwrap());
    }

    #[test]
    fn test_garbage_signature_is_false() {
        let key = SigningKey::generate("k").unwrap();
        assert!(!key.public_key().verify_record(&record(), "k:not-base64!!"));
        assert!(!key.public_key().verify_record(&record(), "no-colon"));
    }

    #[rstest]
    #[case::no_colon("no-colon-in-here")]
    #[case::empty_name(":AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")]
    #[case::bad_base64("name:***")]
    #[case::wrong_length("name:AAAA")]
    fn test_invalid_private_key(#[case] key: &str) {
        assert!(matches!(
            sign(&record(), key),
            Err(SigningError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_invalid_public_key() {
        let secret_length = format!("name:{}", general_purpose::STANDARD.encode([0u8; 64]));
        for key in ["no-colon-in-here", secret_length.as_str()] {
            assert!(matches!(
                verify(&record(), "k:AAAA", key),
                Err(SigningError::InvalidKeyFormat(_))
            ));
        }
    }

    #[test]
    fn test_key_file_trailing_newline() {
        let key = SigningKey::generate("cache-1").unwrap();
        let parsed = SigningKey::parse(&format!("{}\n", key.to_text())).unwrap();
        assert_eq!(parsed.to_text(), key.to_text());
    }
}
