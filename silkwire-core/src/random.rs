//! Process-wide random source
//!
//! Mask keys and handshake nonces draw from a single seedable generator so
//! that tests can make frame encoding deterministic. Seeding after the first
//! session has been opened is undefined at the contract level: frames already
//! queued keep the keys they were encoded with.

use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::sync::{Mutex, PoisonError};

static SOURCE: Mutex<Option<StdRng>> = Mutex::new(None);

/// Replace the generator with one seeded from `value`. Intended for tests.
pub fn seed(value: u64) {
    let mut guard = SOURCE.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(StdRng::seed_from_u64(value));
}

/// Fill `buf` with random bytes.
pub fn fill(buf: &mut [u8]) {
    let mut guard = SOURCE.lock().unwrap_or_else(PoisonError::into_inner);
    let rng = guard.get_or_insert_with(StdRng::from_entropy);
    rng.fill_bytes(buf);
}

/// Produce a fresh 4-byte masking key.
pub fn mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    fill(&mut key);
    key
}
