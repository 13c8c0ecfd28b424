//! Injectable randomness for backoff jitter

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Mutex;

/// Lower bound of the jitter factor applied to computed delays
pub const JITTER_MIN_FACTOR: f64 = 0.9;
/// Upper bound of the jitter factor applied to computed delays
pub const JITTER_MAX_FACTOR: f64 = 1.1;

/// Source of uniform samples used to perturb backoff delays
pub trait JitterSource: Send + Sync {
    /// Uniform sample in `[0.0, 1.0)`
    fn sample(&self) -> f64;

    /// Multiplicative factor in `[0.9, 1.1]`
    ///
    /// A NaN sample yields the neutral factor `1.0`.
    fn factor(&self) -> f64 {
        let sample = self.sample();
        if sample.is_nan() {
            return 1.0;
        }
        let spread = JITTER_MAX_FACTOR - JITTER_MIN_FACTOR;
        JITTER_MIN_FACTOR + spread * sample.clamp(0.0, 1.0)
    }
}

/// Thread-local RNG, the default for production use
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Seeded generator for reproducible delays
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl fmt::Debug for SeededJitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededJitter").finish_non_exhaustive()
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        // A poisoned lock only means another sampler panicked; the RNG state is still usable.
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen::<f64>()
    }
}

/// Fixed sample, mostly for tests
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}
