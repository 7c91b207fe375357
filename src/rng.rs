//! Seeded pseudo-random number generator
//!
//! All randomness in the simulation (slippage, random spread) flows through
//! an engine-owned `SimRng`. The generator is ChaCha8, whose output stream
//! is specified independently of platform and library version, so the same
//! seed produces the same sequence everywhere. The seed is stored with the
//! backtest configuration for exact replay.

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seeded random number generator for deterministic simulation.
#[derive(Debug, Clone)]
pub struct SimRng {
    engine: ChaCha8Rng,
    seed: u64,
}

impl SimRng {
    /// Construct with an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            engine: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed this RNG was (last) initialized with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Rewind the stream to its initial state.
    pub fn reset(&mut self) {
        self.engine = ChaCha8Rng::seed_from_u64(self.seed);
    }

    /// Reseed with a new value and rewind.
    pub fn reset_with(&mut self, seed: u64) {
        self.seed = seed;
        self.engine = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Uniform integer in `[min, max]` (inclusive). Returns `min` when
    /// `min >= max`.
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.engine.gen_range(min..=max)
    }

    /// Uniform double in `[0, 1)` built from the top 53 bits of one draw.
    pub fn next_double(&mut self) -> f64 {
        const SCALE: f64 = 1.0 / (1u64 << 53) as f64;
        (self.engine.gen::<u64>() >> 11) as f64 * SCALE
    }

    /// Uniform double in `[min, max)`. Returns `min` when `min >= max`.
    pub fn next_double_range(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        min + (max - min) * self.next_double()
    }

    /// Bernoulli draw with the given probability of `true`.
    pub fn next_bool(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.next_double() < probability
    }

    /// Normal draw via Box-Muller (two uniform draws per call).
    pub fn next_normal(&mut self, mean: f64, stddev: f64) -> f64 {
        // u1 in (0, 1] so the log is finite
        let u1 = 1.0 - self.next_double();
        let u2 = self.next_double();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + stddev * z
    }

    /// Exponential draw via inverse CDF. Non-positive lambda returns 0.
    pub fn next_exponential(&mut self, lambda: f64) -> f64 {
        if lambda <= 0.0 {
            return 0.0;
        }
        let u = self.next_double();
        -(1.0 - u).ln() / lambda
    }
}
