use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{SIGNATURE_LENGTH, Signature};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signature is not valid base64: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Signature must be 64 bytes, got {0}")]
    InvalidLength(usize),

    #[error("Malformed signature: {0}")]
    InvalidFormat(String),
}

/// One `Sig:` value: the issuing key's name and the raw ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarSignature {
    pub key_name: String,
    pub sig: Signature,
}

impl NarSignature {
    pub fn new(key_name: impl Into<String>, sig: Signature) -> Self {
        Self {
            key_name: key_name.into(),
            sig,
        }
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Parse `name:base64`. Key names never contain `:`, base64 never
    /// does either, so the first colon is the separator.
    pub fn parse(s: &str) -> Result<Self, SignatureError> {
        let Some((key_name, encoded)) = s.trim().split_once(':') else {
            return Err(SignatureError::InvalidFormat(format!("no key name in {s:?}")));
        };
        if key_name.is_empty() {
            return Err(SignatureError::InvalidFormat("empty key name".into()));
        }

        let raw = STANDARD.decode(encoded)?;
        let raw = <[u8; SIGNATURE_LENGTH]>::try_from(raw.as_slice())
            .map_err(|_| SignatureError::InvalidLength(raw.len()))?;
        Ok(Self::new(key_name, Signature::from_bytes(&raw)))
    }
}

impl FromStr for NarSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NarSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_name, STANDARD.encode(self.sig.to_bytes()))
    }
}
