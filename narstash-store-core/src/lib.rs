//! Nix binary cache trust primitives.
//!
//! Fingerprints are computed exactly as Nix does, so signatures produced
//! here validate against `trusted-public-keys` on any Nix client.

pub mod fingerprint;
pub mod narinfo;
pub mod signature;
pub mod signing;

pub use fingerprint::{NarInfoRecord, fingerprint};
pub use narinfo::NarInfoError;
pub use signature::{NarSignature, SignatureError};
pub use signing::{PublicKey, SigningError, SigningKey, sign, verify};
