//! Salted pseudonyms and random session tokens
//!
//! Pseudonyms are a deterministic function of `(identifier, salt)`. Without
//! the salt the raw identifier cannot be recovered from a token. With the
//! built-in default salt this is only obfuscation, not a guarantee.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::SaltSource;

/// Hex characters kept from the digest (128 bits)
pub const PSEUDONYM_HEX_LEN: usize = 32;

/// Random bytes in a session token
const SESSION_TOKEN_BYTES: usize = 16;

/// Derives opaque tokens from stable identifiers
#[derive(Clone)]
pub struct Pseudonymizer {
    salt: String,
    source: SaltSource,
}

impl Pseudonymizer {
    pub fn new(salt: impl Into<String>, source: SaltSource) -> Self {
        Self {
            salt: salt.into(),
            source,
        }
    }

    /// Deterministic pseudonym of `identifier` under the configured salt
    pub fn pseudonymize(&self, identifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        hasher.update(self.salt.as_bytes());
        let mut token = hex::encode(hasher.finalize());
        token.truncate(PSEUDONYM_HEX_LEN);
        token
    }

    /// Fresh random token, unrelated to any identifier
    pub fn session_token(&self) -> String {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn salt_source(&self) -> SaltSource {
        self.source
    }
}

// Keep the salt out of debug output.
impl std::fmt::Debug for Pseudonymizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pseudonymizer")
            .field("salt", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}
