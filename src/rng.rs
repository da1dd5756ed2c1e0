//! Seedable random number generator for deterministic testing.
//!
//! The secure-transport engines draw their non-cryptographic randomness
//! from here. The generator is personalized with the endpoint name and
//! can additionally be seeded via [`Config::rng_seed`](crate::Config) so
//! tests are reproducible.

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

/// A random number generator that can be seeded for deterministic behavior.
///
/// When created with a seed, it produces deterministic random values.
/// When created without a seed, it uses the thread-local random generator.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    /// Create a new RNG with an optional seed.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    /// Create an RNG personalized with the endpoint name.
    ///
    /// A hash of the endpoint name is mixed into the seed on both paths,
    /// so two endpoints with the same seed still diverge. When `seed` is
    /// `Some` the generator is reproducible; when it is `None` the base
    /// entropy comes from the OS.
    pub fn for_endpoint(endpoint_name: &str, seed: Option<u64>) -> Self {
        let digest = Sha256::digest(endpoint_name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let pers = u64::from_be_bytes(bytes);

        let base = seed.unwrap_or_else(rand::random);
        Self {
            inner: Some(StdRng::seed_from_u64(base ^ pers)),
        }
    }

    /// Generate a random value of type T.
    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        match self.inner.as_mut() {
            Some(rng) => rng.gen(),
            None => rand::random(),
        }
    }

    /// Fill a buffer with random bytes.
    pub fn fill(&mut self, buf: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(buf),
            None => rand::thread_rng().fill_bytes(buf),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let is_seeded = self.inner.is_some();
        f.debug_struct("SeededRng")
            .field("seeded", &is_seeded)
            .finish()
    }
}
