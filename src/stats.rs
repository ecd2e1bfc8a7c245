//! Streaming moments over chain draws.

use ndarray::Array1;
use num_traits::ToPrimitive;

use crate::error::{ModelError, Result};

/// Incrementally tracks the mean and mean-square of a fixed-width stream of
/// draws, without retaining the draws themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMoments {
    n: usize,
    mean: Array1<f64>,
    mean_sq: Array1<f64>,
}

impl RunningMoments {
    pub fn new(n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
        }
    }

    /// Fold one draw into the moments.
    pub fn step<T>(&mut self, x: &[T]) -> Result<()>
    where
        T: ToPrimitive,
    {
        if x.len() != self.mean.len() {
            return Err(ModelError::Shape(format!(
                "draw has {} parameters, tracker expects {}",
                x.len(),
                self.mean.len()
            )));
        }
        self.n += 1;
        let n = self.n as f64;
        let x_arr = Array1::from_iter(x.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)));

        self.mean = (self.mean.clone() * (n - 1.0) + &x_arr) / n;
        if self.n == 1 {
            self.mean_sq = x_arr.mapv(|v| v * v);
        } else {
            self.mean_sq = (self.mean_sq.clone() * (n - 1.0) + x_arr.mapv(|v| v * v)) / n;
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Unbiased sample variance per parameter.
    pub fn variance(&self) -> Array1<f64> {
        let n = self.n as f64;
        (self.mean_sq.clone() - self.mean.mapv(|m| m * m)) * n / (n - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn matches_two_pass_moments() {
        let draws = [[1.0, -2.0], [2.0, 0.0], [3.0, 2.0], [4.0, 4.0]];
        let mut tracker = RunningMoments::new(2);
        for d in &draws {
            tracker.step(d).unwrap();
        }
        assert_eq!(tracker.count(), 4);
        assert_abs_diff_eq!(tracker.mean()[0], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tracker.mean()[1], 1.0, epsilon = 1e-12);
        // two-pass unbiased variances
        assert_abs_diff_eq!(tracker.variance()[0], 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tracker.variance()[1], 20.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn integer_draws_are_widened() {
        let mut tracker = RunningMoments::new(1);
        tracker.step(&[1_i64]).unwrap();
        tracker.step(&[2_i64]).unwrap();
        assert_abs_diff_eq!(tracker.mean()[0], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_width_is_an_error() {
        let mut tracker = RunningMoments::new(2);
        assert!(tracker.step(&[1.0]).is_err());
    }
}
