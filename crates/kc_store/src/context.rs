//! Injected time and randomness.
//!
//! Every timestamp the store writes comes from a `Clock`, and every id, token
//! and salt from an `Entropy` source, so tests can pin both.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::{rngs::OsRng, rngs::StdRng, RngCore, SeedableRng};

pub const TEAM_ID_LEN: usize = 16;
pub const SECRET_ID_LEN: usize = 16;
pub const TOKEN_ID_LEN: usize = 32;
pub const SESSION_ID_LEN: usize = 24;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.0.lock() = t;
    }

    pub fn advance(&self, by: Duration) {
        let mut t = self.0.lock();
        *t += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

pub trait Entropy: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// Deterministic stream from a 64-bit seed.
#[derive(Debug)]
pub struct SeededEntropy(Mutex<StdRng>);

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl Entropy for SeededEntropy {
    fn fill(&self, buf: &mut [u8]) {
        self.0.lock().fill_bytes(buf);
    }
}

/// An unpadded base64url token of exactly `len` characters.
pub fn random_token(entropy: &dyn Entropy, len: usize) -> String {
    let mut raw = vec![0u8; len * 3 / 4 + 1];
    entropy.fill(&mut raw);
    let mut token = URL_SAFE_NO_PAD.encode(&raw);
    token.truncate(len);
    token
}
