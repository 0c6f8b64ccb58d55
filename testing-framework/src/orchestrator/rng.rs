// File: testing-framework/src/orchestrator/rng.rs
//
// Seeded RNG shared by the whole run.
//
// Node keys and invoice preimages come from here, so a failing run can be
// replayed bit for bit with the seed it printed.

use ln_itest_common::crypto::{Hash, KeyPair, HASH_SIZE, SECRET_KEY_SIZE};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

/// Environment variable that overrides the run seed
pub const SEED_ENV_VAR: &str = "LN_ITEST_SEED";

/// Seeded random source, safe to share between tasks.
pub struct TestRng {
    inner: Mutex<StdRng>,
    seed: u64,
}

impl TestRng {
    /// Deterministic generator for `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
            seed,
        }
    }

    /// Read `LN_ITEST_SEED` (hex, optional `0x`) or draw a fresh seed
    pub fn new_from_env_or_random() -> Self {
        let seed = seed_from_env().unwrap_or_else(|| rand::thread_rng().gen());

        log::info!("TestRng seed: 0x{:016x}", seed);
        log::info!("Replay: {}=0x{:016x} ln-itest ...", SEED_ENV_VAR, seed);

        Self::with_seed(seed)
    }

    /// Seed this generator was built from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sample a value from the standard distribution
    pub fn gen<T>(&self) -> T
    where
        rand::distributions::Standard: rand::distributions::Distribution<T>,
    {
        self.inner.lock().gen()
    }

    /// Sample a value in `range`
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.inner.lock().gen_range(range)
    }

    /// Fill `dest` with random bytes
    pub fn fill_bytes(&self, dest: &mut [u8]) {
        self.inner.lock().fill_bytes(dest)
    }

    /// Fresh node identity
    pub fn gen_keypair(&self) -> KeyPair {
        let mut secret = [0u8; SECRET_KEY_SIZE];
        self.fill_bytes(&mut secret);
        KeyPair::from_secret(secret)
    }

    /// Fresh invoice preimage
    pub fn gen_preimage(&self) -> Hash {
        let mut bytes = [0u8; HASH_SIZE];
        self.fill_bytes(&mut bytes);
        Hash::new(bytes)
    }
}

/// Parse a hex seed such as `0xa3f5c8e1b2d94706`
pub fn parse_seed(s: &str) -> Option<u64> {
    let trimmed = s.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(trimmed, 16).ok()
}

/// Seed from `LN_ITEST_SEED`, if set and valid
pub fn seed_from_env() -> Option<u64> {
    std::env::var(SEED_ENV_VAR).ok().and_then(|s| parse_seed(&s))
}
