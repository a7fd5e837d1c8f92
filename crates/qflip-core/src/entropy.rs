//! Local random outcome generation
//!
//! Each outcome hashes three independent entropy sources together (a clock
//! sample, 32 bytes from the operating system, and a uniform draw from the
//! thread RNG) and reads the parity of the digest's leading byte. A weak
//! clock or a poorly seeded RNG alone cannot bias the result.

use chrono::Utc;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

use crate::types::Outcome;

/// Bytes drawn from the operating system per outcome
const OS_ENTROPY_BYTES: usize = 32;

/// Produces unbiased binary outcomes without any external dependency
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOutcomeGenerator;

impl RandomOutcomeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Draw a single outcome
    pub fn generate(&self) -> Outcome {
        let mut block = [0u8; OS_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut block);
        let draw: f64 = rand::thread_rng().gen();

        let mut hasher = Sha256::new();
        hasher.update(Utc::now().timestamp_millis().to_string().as_bytes());
        hasher.update(hex::encode(block).as_bytes());
        hasher.update(draw.to_string().as_bytes());
        let digest = hasher.finalize();

        outcome_from_byte(digest[0])
    }
}

/// Even leading byte is Heads, odd is Tails
fn outcome_from_byte(byte: u8) -> Outcome {
    if byte % 2 == 0 {
        Outcome::Heads
    } else {
        Outcome::Tails
    }
}
