//! Stochastic nodes: random-walk proposals, support policies, scale tuning.

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::core::{Node, NodeId};
use crate::distributions::Distribution;
use crate::error::{ModelError, Result};
use crate::rng::RandomSource;
use crate::value::{mean_of, Value};

/// Acceptance ratio the tuner steers toward, appropriate for univariate
/// random-walk Metropolis on non-Gaussian targets.
pub const TARGET_ACCEPTANCE: f64 = 0.4;

const DILUTION: f64 = 0.2;

/// Whole-block redraw attempts before a constrained proposal gives up and
/// lets the acceptance test reject the out-of-support draw.
pub const PROPOSAL_RETRY_CAP: usize = 10_000;

/// Multiplier applied to a proposal scale after a tuning window.
pub fn tune_scale(acceptance_ratio: f64) -> f64 {
    1.0 + (acceptance_ratio - TARGET_ACCEPTANCE) * DILUTION
}

/// How a stochastic node proposes moves while honoring its support.
#[derive(Debug, Clone)]
pub enum JumpPolicy {
    /// Unconstrained Gaussian random walk.
    Gaussian,
    /// Redraw the whole block until every element is nonnegative.
    Positive,
    /// Redraw the whole block until every element lies in `[lower, upper]`.
    Interval { lower: f64, upper: f64 },
    /// Walk the Cholesky factor of a symmetric positive-definite matrix.
    Cholesky(CholeskyWalk),
}

/// Auxiliary parameterization of a symmetric positive-definite value.
///
/// The walk stores the log-diagonal and the strictly-lower elements of the
/// Cholesky factor `L`; proposals perturb those vectors and rebuild
/// `value = L·Lᵀ`, which is positive-definite by construction.
#[derive(Debug, Clone)]
pub struct CholeskyWalk {
    order: usize,
    log_diag: DVector<f64>,
    offdiag: DVector<f64>,
    old_log_diag: DVector<f64>,
    old_offdiag: DVector<f64>,
}

impl CholeskyWalk {
    pub fn from_matrix(value: &DMatrix<f64>) -> Result<Self> {
        let d = value.nrows();
        if value.ncols() != d {
            return Err(ModelError::Shape(format!(
                "positive-definite walk needs a square value, got {}x{}",
                value.nrows(),
                value.ncols()
            )));
        }
        let chol = Cholesky::new(value.clone()).ok_or_else(|| {
            ModelError::Config("initial value is not positive definite".into())
        })?;
        let l = chol.l();
        let log_diag = l.diagonal().map(f64::ln);
        let mut offdiag = DVector::zeros(d * (d - 1) / 2);
        let mut idx = 0;
        for i in 1..d {
            for j in 0..i {
                offdiag[idx] = l[(i, j)];
                idx += 1;
            }
        }
        let walk = Self {
            order: d,
            old_log_diag: log_diag.clone(),
            old_offdiag: offdiag.clone(),
            log_diag,
            offdiag,
        };
        let recovered = walk.reconstruct();
        for (a, b) in value.iter().zip(recovered.iter()) {
            if (a - b).abs() > 1e-8 * a.abs().max(1.0) {
                return Err(ModelError::Config(
                    "Cholesky parameterization did not recover the initial value".into(),
                ));
            }
        }
        Ok(walk)
    }

    /// Number of proposal coordinates: `d` log-diagonal plus `d(d-1)/2`
    /// off-diagonal entries.
    pub fn n_coords(&self) -> usize {
        self.order + self.offdiag.len()
    }

    /// Rebuild `L·Lᵀ` from the stored parameterization.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        let d = self.order;
        let mut l = DMatrix::zeros(d, d);
        for i in 0..d {
            l[(i, i)] = self.log_diag[i].exp();
        }
        let mut idx = 0;
        for i in 1..d {
            for j in 0..i {
                l[(i, j)] = self.offdiag[idx];
                idx += 1;
            }
        }
        &l * l.transpose()
    }

    fn step(&mut self, rng: &mut dyn RandomSource, scale: &[f64]) {
        let d = self.order;
        for i in 0..d {
            self.log_diag[i] += rng.normal() * scale[i];
        }
        for j in 0..self.offdiag.len() {
            self.offdiag[j] += rng.normal() * scale[d + j];
        }
    }

    fn preserve(&mut self) {
        self.old_log_diag.copy_from(&self.log_diag);
        self.old_offdiag.copy_from(&self.offdiag);
    }

    fn revert(&mut self) {
        self.log_diag.copy_from(&self.old_log_diag);
        self.offdiag.copy_from(&self.old_offdiag);
    }
}

/// A node with an associated distribution.
///
/// Unobserved nodes hold per-coordinate proposal scales and trial counters;
/// observed nodes are fixed data and only contribute their log-likelihood.
#[derive(Debug)]
pub struct Stochastic {
    value: Value,
    old_value: Value,
    history: Vec<Value>,
    observed: bool,
    tracked: bool,
    component: bool,
    scale: Vec<f64>,
    accepted: Vec<u64>,
    rejected: Vec<u64>,
    policy: JumpPolicy,
    dist: Distribution,
}

impl Stochastic {
    pub(crate) fn from_parts(value: Value, dist: Distribution, policy: JumpPolicy) -> Self {
        let n_coords = match &policy {
            JumpPolicy::Cholesky(walk) => walk.n_coords(),
            _ => value.n_elem(),
        };
        Self {
            old_value: value.clone(),
            value,
            history: Vec::new(),
            observed: false,
            tracked: true,
            component: false,
            scale: vec![1.0; n_coords],
            accepted: vec![0; n_coords],
            rejected: vec![0; n_coords],
            policy,
            dist,
        }
    }

    /// Mark the value as fixed data: proposals, tuning, preserve and revert
    /// become no-ops, and the node is never tallied.
    pub fn observed(mut self) -> Self {
        self.observed = true;
        self.tracked = false;
        self
    }

    /// Metropolis-test one coordinate at a time instead of whole-block
    /// moves. Ignored for the Cholesky walk, whose coordinates only make
    /// sense jointly.
    pub fn component_wise(mut self) -> Self {
        if !matches!(self.policy, JumpPolicy::Cholesky(_)) {
            self.component = true;
        }
        self
    }

    /// Override the initial proposal standard deviation (default 1) on
    /// every coordinate.
    pub fn initial_scale(mut self, scale: f64) -> Self {
        self.scale.iter_mut().for_each(|s| *s = scale);
        self
    }

    /// Per-coordinate proposal standard deviations.
    pub fn proposal_scale(&self) -> &[f64] {
        &self.scale
    }

    fn in_support(&self) -> bool {
        match &self.policy {
            JumpPolicy::Positive => (0..self.value.n_elem()).all(|i| self.value.elem(i) >= 0.0),
            JumpPolicy::Interval { lower, upper } => (0..self.value.n_elem())
                .all(|i| (*lower..=*upper).contains(&self.value.elem(i))),
            _ => true,
        }
    }

    fn gaussian_step_from(&mut self, base: &Value, rng: &mut dyn RandomSource) {
        for i in 0..self.value.n_elem() {
            let x = base.elem(i) + rng.normal() * self.scale[i];
            self.value.set_elem(i, x);
        }
    }
}

impl Node for Stochastic {
    fn value(&self) -> &Value {
        &self.value
    }

    fn is_stochastic(&self) -> bool {
        true
    }

    fn is_observed(&self) -> bool {
        self.observed
    }

    fn preserve(&mut self) {
        if self.observed {
            return;
        }
        self.old_value = self.value.clone();
        if let JumpPolicy::Cholesky(walk) = &mut self.policy {
            walk.preserve();
        }
    }

    fn revert(&mut self) {
        if self.observed {
            return;
        }
        self.value = self.old_value.clone();
        if let JumpPolicy::Cholesky(walk) = &mut self.policy {
            walk.revert();
        }
    }

    fn tally(&mut self) {
        self.history.push(self.value.clone());
    }

    fn history(&self) -> &[Value] {
        &self.history
    }

    fn mean(&self) -> Option<Value> {
        mean_of(&self.history)
    }

    fn tracked(&self) -> bool {
        self.tracked
    }

    fn set_tracked(&mut self, tracked: bool) {
        self.tracked = tracked && !self.observed;
    }

    fn parents(&self) -> Vec<NodeId> {
        self.dist.parent_ids()
    }

    fn check_parents(&self, earlier: &[Box<dyn Node>]) -> Result<()> {
        self.dist.validate(&self.value, earlier)
    }

    fn loglik(&self, earlier: &[Box<dyn Node>]) -> f64 {
        self.dist.logp(&self.value, earlier)
    }

    fn jump(&mut self, rng: &mut dyn RandomSource) {
        if self.observed {
            return;
        }
        if let JumpPolicy::Cholesky(walk) = &mut self.policy {
            walk.step(rng, &self.scale);
            self.value = Value::RealMat(walk.reconstruct());
            return;
        }
        if matches!(self.policy, JumpPolicy::Gaussian) {
            for i in 0..self.value.n_elem() {
                self.value.add_elem(i, rng.normal() * self.scale[i]);
            }
            return;
        }
        let base = self.value.clone();
        for _ in 0..PROPOSAL_RETRY_CAP {
            self.gaussian_step_from(&base, rng);
            if self.in_support() {
                return;
            }
        }
        // cap exhausted: the out-of-support draw stays and the acceptance
        // test rejects it through a -inf loglik
    }

    fn tune(&mut self) {
        if self.observed {
            return;
        }
        for i in 0..self.scale.len() {
            let trials = self.accepted[i] + self.rejected[i];
            if trials == 0 {
                continue;
            }
            let ratio = self.accepted[i] as f64 / trials as f64;
            self.scale[i] *= tune_scale(ratio);
        }
        self.accepted.fill(0);
        self.rejected.fill(0);
    }

    fn uses_component_sampling(&self) -> bool {
        self.component && !self.observed
    }

    fn n_components(&self) -> usize {
        self.scale.len()
    }

    fn jump_component(&mut self, idx: usize, rng: &mut dyn RandomSource) {
        if self.observed {
            return;
        }
        self.old_value.set_elem(idx, self.value.elem(idx));
        self.value.add_elem(idx, rng.normal() * self.scale[idx]);
    }

    fn revert_component(&mut self, idx: usize) {
        if self.observed {
            return;
        }
        self.value.set_elem(idx, self.old_value.elem(idx));
    }

    fn record_trial(&mut self, idx: usize, accepted: bool) {
        if accepted {
            self.accepted[idx] += 1;
        } else {
            self.rejected[idx] += 1;
        }
    }

    fn record_block(&mut self, accepted: bool) {
        for i in 0..self.scale.len() {
            self.record_trial(i, accepted);
        }
    }

    fn trial_counts(&self) -> Option<(u64, u64)> {
        Some((
            self.accepted.iter().sum(),
            self.rejected.iter().sum(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn tune_scale_fixed_point_and_monotonicity() {
        assert_abs_diff_eq!(tune_scale(TARGET_ACCEPTANCE), 1.0);
        assert!(tune_scale(0.41) > 1.0);
        assert!(tune_scale(0.39) < 1.0);
        let mut prev = tune_scale(0.0);
        for i in 1..=20 {
            let next = tune_scale(i as f64 / 20.0);
            assert!(next > prev, "tune_scale not monotone at {i}");
            prev = next;
        }
    }

    #[test]
    fn counter_and_scale_shapes_match_the_value() {
        let node = Stochastic::normal(DVector::<f64>::zeros(4), 0.0, 1.0).unwrap();
        assert_eq!(node.proposal_scale().len(), 4);
        assert_eq!(node.n_components(), 4);
        assert_eq!(node.value().n_elem(), 4);
    }

    #[test]
    fn preserve_then_revert_restores_the_value() {
        let mut node = Stochastic::normal(vec![1.0, 2.0, 3.0], 0.0, 1.0).unwrap();
        let before = node.value().clone();
        node.preserve();
        let mut rng = SmallRng::seed_from_u64(1);
        node.jump(&mut rng);
        assert_ne!(*node.value(), before);
        node.revert();
        assert_eq!(*node.value(), before);
    }

    #[test]
    fn component_trials_add_up_and_tune_resets_them() {
        let mut node = Stochastic::normal(vec![0.0, 0.0], 0.0, 1.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(2);
        for trial in 0..10 {
            for c in 0..node.n_components() {
                node.jump_component(c, &mut rng);
                let accept = trial % 3 == 0;
                if !accept {
                    node.revert_component(c);
                }
                node.record_trial(c, accept);
            }
        }
        let (accepted, rejected) = node.trial_counts().unwrap();
        assert_eq!(accepted + rejected, 20);
        node.tune();
        assert_eq!(node.trial_counts().unwrap(), (0, 0));
    }

    #[test]
    fn positive_policy_never_leaves_the_support() {
        let mut node = Stochastic::gamma(0.5, 2.0, 1.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..2_000 {
            node.preserve();
            node.jump(&mut rng);
            assert!(node.value().elem(0) >= 0.0);
        }
    }

    #[test]
    fn interval_policy_stays_in_bounds() {
        let mut node = Stochastic::uniform(3.0, 2.0, 5.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..2_000 {
            node.preserve();
            node.jump(&mut rng);
            let x = node.value().elem(0);
            assert!((2.0..=5.0).contains(&x), "escaped the interval: {x}");
        }
    }

    #[test]
    fn observed_nodes_ignore_every_mutation() {
        let mut node = Stochastic::normal(vec![1.0, 2.0], 0.0, 1.0)
            .unwrap()
            .observed();
        let before = node.value().clone();
        let mut rng = SmallRng::seed_from_u64(5);
        node.preserve();
        node.jump(&mut rng);
        node.jump_component(0, &mut rng);
        node.tune();
        assert_eq!(*node.value(), before);
        assert!(!node.tracked());
    }

    #[test]
    fn cholesky_walk_round_trips_the_initial_value() {
        let m = nalgebra::DMatrix::from_row_slice(
            3,
            3,
            &[4.0, 1.0, 0.5, 1.0, 3.0, 1.0, 0.5, 1.0, 2.0],
        );
        let walk = CholeskyWalk::from_matrix(&m).unwrap();
        let recovered = walk.reconstruct();
        for (a, b) in m.iter().zip(recovered.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
        assert_eq!(walk.n_coords(), 6);
    }

    #[test]
    fn cholesky_walk_rejects_indefinite_matrices() {
        let m = nalgebra::DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(CholeskyWalk::from_matrix(&m).is_err());
    }

    #[test]
    fn cholesky_jumps_keep_the_value_positive_definite() {
        let mut node = Stochastic::wishart(
            nalgebra::DMatrix::<f64>::identity(3, 3),
            nalgebra::DMatrix::<f64>::identity(3, 3),
            5.0,
        )
        .unwrap()
        .initial_scale(0.1);
        let mut rng = SmallRng::seed_from_u64(6);
        for _ in 0..200 {
            node.preserve();
            node.jump(&mut rng);
            let m = node.value().as_real_mat().unwrap();
            assert!((m - m.transpose()).abs().max() < 1e-12);
            assert!(nalgebra::Cholesky::new(m.clone()).is_some());
        }
    }

    #[test]
    fn cholesky_revert_restores_value_and_parameterization() {
        let mut node = Stochastic::wishart(
            nalgebra::DMatrix::<f64>::identity(2, 2),
            nalgebra::DMatrix::<f64>::identity(2, 2),
            4.0,
        )
        .unwrap();
        let before = node.value().clone();
        let mut rng = SmallRng::seed_from_u64(7);
        node.preserve();
        node.jump(&mut rng);
        node.revert();
        assert_eq!(*node.value(), before);
        // a fresh jump after the revert walks from the restored state
        if let JumpPolicy::Cholesky(walk) = &node.policy {
            let recovered = walk.reconstruct();
            let value = node.value().as_real_mat().unwrap();
            for (a, b) in value.iter().zip(recovered.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
            }
        } else {
            unreachable!("wishart nodes walk the Cholesky factor");
        }
    }
}
