//! The random-number contract the sampler runs against.

use rand::Rng;
use rand_distr::StandardNormal;

/// Source of the two primitive draws the sampler needs.
///
/// The model owns a single source; every proposal and every Metropolis test
/// consumes draws from it in a fixed order, so two runs with the same seed,
/// the same initial values, and the same node registration order produce
/// identical chains.
pub trait RandomSource {
    /// A draw from `Uniform[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// A draw from the standard normal distribution.
    fn normal(&mut self) -> f64;
}

impl<R: Rng> RandomSource for R {
    fn uniform(&mut self) -> f64 {
        self.gen()
    }

    fn normal(&mut self) -> f64 {
        self.sample(StandardNormal)
    }
}
