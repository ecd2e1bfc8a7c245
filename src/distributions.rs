//! The distribution library: hyperparameters, log-density bindings, and one
//! constructor per supported distribution.

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::core::{Node, NodeId};
use crate::error::{ModelError, Result};
use crate::math;
use crate::stochastic::{CholeskyWalk, JumpPolicy, Stochastic};
use crate::value::Value;

/// A hyperparameter: either a literal captured at construction or a handle
/// to another node, dereferenced at `loglik` time.
#[derive(Debug, Clone)]
pub enum Param {
    Const(Value),
    Node(NodeId),
}

impl Param {
    /// The current value of this parameter, if it can be resolved against
    /// the given arena prefix.
    pub(crate) fn resolve<'a>(&'a self, earlier: &'a [Box<dyn Node>]) -> Option<&'a Value> {
        match self {
            Param::Const(v) => Some(v),
            Param::Node(id) => earlier.get(id.0).map(|n| n.value()),
        }
    }

    fn constant(&self) -> Option<&Value> {
        match self {
            Param::Const(v) => Some(v),
            Param::Node(_) => None,
        }
    }

    fn node_id(&self) -> Option<NodeId> {
        match self {
            Param::Const(_) => None,
            Param::Node(id) => Some(*id),
        }
    }
}

impl From<f64> for Param {
    fn from(x: f64) -> Self {
        Param::Const(Value::Real(x))
    }
}

impl From<NodeId> for Param {
    fn from(id: NodeId) -> Self {
        Param::Node(id)
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Const(v)
    }
}

impl From<DVector<f64>> for Param {
    fn from(v: DVector<f64>) -> Self {
        Param::Const(Value::RealVec(v))
    }
}

impl From<DMatrix<f64>> for Param {
    fn from(m: DMatrix<f64>) -> Self {
        Param::Const(Value::RealMat(m))
    }
}

impl From<Vec<f64>> for Param {
    fn from(v: Vec<f64>) -> Self {
        Param::Const(Value::RealVec(DVector::from_vec(v)))
    }
}

/// Which log-density a stochastic node evaluates, and against which
/// hyperparameters.
#[derive(Debug, Clone)]
pub enum Distribution {
    Normal { mu: Param, tau: Param },
    Uniform { lower: Param, upper: Param },
    Gamma { alpha: Param, beta: Param },
    Beta { alpha: Param, beta: Param },
    Bernoulli { p: Param },
    Binomial { n: Param, p: Param },
    Poisson { mu: Param },
    Exponential { lambda: Param },
    Categorical { p: Param },
    MvNormal { mu: Param, sigma: Param },
    Wishart { tau: Param, n: Param },
}

impl Distribution {
    fn params(&self) -> Vec<&Param> {
        match self {
            Distribution::Normal { mu, tau } => vec![mu, tau],
            Distribution::Uniform { lower, upper } => vec![lower, upper],
            Distribution::Gamma { alpha, beta } => vec![alpha, beta],
            Distribution::Beta { alpha, beta } => vec![alpha, beta],
            Distribution::Bernoulli { p } => vec![p],
            Distribution::Binomial { n, p } => vec![n, p],
            Distribution::Poisson { mu } => vec![mu],
            Distribution::Exponential { lambda } => vec![lambda],
            Distribution::Categorical { p } => vec![p],
            Distribution::MvNormal { mu, sigma } => vec![mu, sigma],
            Distribution::Wishart { tau, n } => vec![tau, n],
        }
    }

    /// Handles of the hyperparameters that live on other nodes.
    pub(crate) fn parent_ids(&self) -> Vec<NodeId> {
        self.params().into_iter().filter_map(Param::node_id).collect()
    }

    /// Construction-time checks against whatever parameters are resolvable.
    ///
    /// Called twice: with an empty prefix when the node is built (covering
    /// literal hyperparameters) and with the real prefix when the node is
    /// added to a model (covering node-valued ones).
    pub(crate) fn validate(&self, value: &Value, earlier: &[Box<dyn Node>]) -> Result<()> {
        match self {
            Distribution::Normal { .. }
            | Distribution::Uniform { .. }
            | Distribution::Gamma { .. }
            | Distribution::Beta { .. }
            | Distribution::Bernoulli { .. }
            | Distribution::Binomial { .. }
            | Distribution::Poisson { .. }
            | Distribution::Exponential { .. } => {
                for param in self.params() {
                    if let Some(p) = param.resolve(earlier) {
                        if p.n_elem() > value.n_elem() {
                            return Err(ModelError::Shape(format!(
                                "hyperparameter has {} elements but the value has only {}",
                                p.n_elem(),
                                value.n_elem()
                            )));
                        }
                    }
                }
                Ok(())
            }
            Distribution::Categorical { p } => {
                let x = value.as_int_vec().ok_or_else(|| {
                    ModelError::Config(format!(
                        "categorical values must be integer vectors, got {}",
                        value.kind()
                    ))
                })?;
                if let Some(table) = p.resolve(earlier) {
                    let k = match table {
                        Value::RealVec(t) => t.len(),
                        Value::RealMat(t) => {
                            if t.nrows() != x.len() {
                                return Err(ModelError::Shape(format!(
                                    "probability table has {} rows for {} observations",
                                    t.nrows(),
                                    x.len()
                                )));
                            }
                            t.ncols()
                        }
                        other => {
                            return Err(ModelError::Config(format!(
                                "categorical probabilities must be a real vector or matrix, got {}",
                                other.kind()
                            )))
                        }
                    };
                    if x.iter().any(|&xi| xi < 0 || xi >= k as i64) {
                        return Err(ModelError::Config(format!(
                            "categorical index out of range for a {k}-column table"
                        )));
                    }
                }
                Ok(())
            }
            Distribution::MvNormal { mu, sigma } => {
                let k = match mu.resolve(earlier) {
                    Some(Value::RealVec(m)) => Some(m.len()),
                    Some(other) => {
                        return Err(ModelError::Config(format!(
                            "multivariate normal mean must be a real vector, got {}",
                            other.kind()
                        )))
                    }
                    None => None,
                };
                if let Some(k) = k {
                    let ok = match value {
                        Value::RealVec(x) => x.len() == k,
                        Value::RealMat(x) => x.ncols() == k,
                        _ => false,
                    };
                    if !ok {
                        return Err(ModelError::Shape(format!(
                            "value does not conform to a mean of dimension {k}"
                        )));
                    }
                }
                match sigma.resolve(earlier) {
                    Some(Value::RealMat(s)) => {
                        if s.nrows() != s.ncols() || k.is_some_and(|k| s.nrows() != k) {
                            return Err(ModelError::Shape(format!(
                                "covariance is {}x{} but the mean has dimension {}",
                                s.nrows(),
                                s.ncols(),
                                k.unwrap_or(s.nrows())
                            )));
                        }
                        if sigma.constant().is_some() && Cholesky::new(s.clone()).is_none() {
                            return Err(ModelError::Config(
                                "declared covariance is not positive definite".into(),
                            ));
                        }
                        Ok(())
                    }
                    Some(other) => Err(ModelError::Config(format!(
                        "covariance must be a real matrix, got {}",
                        other.kind()
                    ))),
                    None => Ok(()),
                }
            }
            Distribution::Wishart { tau, n } => {
                let x = value.as_real_mat().ok_or_else(|| {
                    ModelError::Config(format!(
                        "Wishart values must be real matrices, got {}",
                        value.kind()
                    ))
                })?;
                let d = x.nrows();
                if x.ncols() != d {
                    return Err(ModelError::Shape(format!(
                        "Wishart value must be square, got {}x{}",
                        x.nrows(),
                        x.ncols()
                    )));
                }
                match tau.resolve(earlier) {
                    Some(Value::RealMat(t)) => {
                        if t.nrows() != d || t.ncols() != d {
                            return Err(ModelError::Shape(
                                "dimensions of the value do not match the scale matrix".into(),
                            ));
                        }
                        if tau.constant().is_some() && Cholesky::new(t.clone()).is_none() {
                            return Err(ModelError::Config(
                                "scale matrix is not positive definite".into(),
                            ));
                        }
                    }
                    Some(other) => {
                        return Err(ModelError::Config(format!(
                            "Wishart scale must be a real matrix, got {}",
                            other.kind()
                        )))
                    }
                    None => {}
                }
                match n.resolve(earlier) {
                    Some(Value::Real(n)) if *n > 0.0 => Ok(()),
                    Some(_) => Err(ModelError::Config(
                        "degrees of freedom must be a positive scalar".into(),
                    )),
                    None => Ok(()),
                }
            }
        }
    }

    /// Evaluate the bound log-density at the current parameter values.
    pub(crate) fn logp(&self, value: &Value, earlier: &[Box<dyn Node>]) -> f64 {
        match self {
            Distribution::Normal { mu, tau } => match (mu.resolve(earlier), tau.resolve(earlier)) {
                (Some(mu), Some(tau)) => {
                    math::normal_logp(value.broadcast(), mu.broadcast(), tau.broadcast())
                }
                _ => f64::NEG_INFINITY,
            },
            Distribution::Uniform { lower, upper } => {
                match (lower.resolve(earlier), upper.resolve(earlier)) {
                    (Some(lo), Some(hi)) => {
                        math::uniform_logp(value.broadcast(), lo.broadcast(), hi.broadcast())
                    }
                    _ => f64::NEG_INFINITY,
                }
            }
            Distribution::Gamma { alpha, beta } => {
                match (alpha.resolve(earlier), beta.resolve(earlier)) {
                    (Some(a), Some(b)) => {
                        math::gamma_logp(value.broadcast(), a.broadcast(), b.broadcast())
                    }
                    _ => f64::NEG_INFINITY,
                }
            }
            Distribution::Beta { alpha, beta } => {
                match (alpha.resolve(earlier), beta.resolve(earlier)) {
                    (Some(a), Some(b)) => {
                        math::beta_logp(value.broadcast(), a.broadcast(), b.broadcast())
                    }
                    _ => f64::NEG_INFINITY,
                }
            }
            Distribution::Bernoulli { p } => match p.resolve(earlier) {
                Some(p) => math::bernoulli_logp(value.broadcast(), p.broadcast()),
                None => f64::NEG_INFINITY,
            },
            Distribution::Binomial { n, p } => match (n.resolve(earlier), p.resolve(earlier)) {
                (Some(n), Some(p)) => {
                    math::binomial_logp(value.broadcast(), n.broadcast(), p.broadcast())
                }
                _ => f64::NEG_INFINITY,
            },
            Distribution::Poisson { mu } => match mu.resolve(earlier) {
                Some(mu) => math::poisson_logp(value.broadcast(), mu.broadcast()),
                None => f64::NEG_INFINITY,
            },
            Distribution::Exponential { lambda } => match lambda.resolve(earlier) {
                Some(l) => math::exponential_logp(value.broadcast(), l.broadcast()),
                None => f64::NEG_INFINITY,
            },
            Distribution::Categorical { p } => match (value.as_int_vec(), p.resolve(earlier)) {
                (Some(x), Some(Value::RealVec(p))) => math::categorical_vec_logp(x, p),
                (Some(x), Some(Value::RealMat(p))) => math::categorical_table_logp(x, p),
                _ => f64::NEG_INFINITY,
            },
            Distribution::MvNormal { mu, sigma } => {
                match (mu.resolve(earlier), sigma.resolve(earlier)) {
                    (Some(Value::RealVec(mu)), Some(Value::RealMat(sigma))) => match value {
                        Value::RealVec(x) => math::multivariate_normal_vec_logp(x, mu, sigma),
                        Value::RealMat(x) => math::multivariate_normal_rows_logp(x, mu, sigma),
                        _ => f64::NEG_INFINITY,
                    },
                    _ => f64::NEG_INFINITY,
                }
            }
            Distribution::Wishart { tau, n } => {
                match (value.as_real_mat(), tau.resolve(earlier), n.resolve(earlier)) {
                    (Some(x), Some(Value::RealMat(tau)), Some(Value::Real(n))) => {
                        math::wishart_logp(x, tau, *n)
                    }
                    _ => f64::NEG_INFINITY,
                }
            }
        }
    }
}

impl Stochastic {
    /// Normal with mean `mu` and precision `tau`.
    pub fn normal(
        value: impl Into<Value>,
        mu: impl Into<Param>,
        tau: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Normal {
            mu: mu.into(),
            tau: tau.into(),
        };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Uniform on `[lower, upper]`. Literal bounds install the
    /// interval-rejection proposal; node-valued bounds fall back to the
    /// free walk and rely on the acceptance test.
    pub fn uniform(
        value: impl Into<Value>,
        lower: impl Into<Param>,
        upper: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let (lower, upper) = (lower.into(), upper.into());
        let policy = match (lower.constant(), upper.constant()) {
            (Some(Value::Real(lo)), Some(Value::Real(hi))) => {
                if lo >= hi {
                    return Err(ModelError::Config(format!(
                        "uniform bounds are inverted: [{lo}, {hi}]"
                    )));
                }
                JumpPolicy::Interval {
                    lower: *lo,
                    upper: *hi,
                }
            }
            _ => JumpPolicy::Gaussian,
        };
        let dist = Distribution::Uniform { lower, upper };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, policy))
    }

    /// Gamma with shape `alpha` and rate `beta`. Proposals are
    /// rejection-sampled onto the nonnegative half-line.
    pub fn gamma(
        value: impl Into<Value>,
        alpha: impl Into<Param>,
        beta: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Gamma {
            alpha: alpha.into(),
            beta: beta.into(),
        };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Positive))
    }

    /// Beta with shapes `alpha`, `beta`.
    pub fn beta(
        value: impl Into<Value>,
        alpha: impl Into<Param>,
        beta: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Beta {
            alpha: alpha.into(),
            beta: beta.into(),
        };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Bernoulli with success probability `p`.
    pub fn bernoulli(value: impl Into<Value>, p: impl Into<Param>) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Bernoulli { p: p.into() };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Binomial with `n` trials and success probability `p`. Counts are
    /// nonnegative, so proposals are rejection-sampled like the Gamma.
    pub fn binomial(
        value: impl Into<Value>,
        n: impl Into<Param>,
        p: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Binomial {
            n: n.into(),
            p: p.into(),
        };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Positive))
    }

    /// Poisson with mean `mu`.
    pub fn poisson(value: impl Into<Value>, mu: impl Into<Param>) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Poisson { mu: mu.into() };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Exponential with rate `lambda`.
    pub fn exponential(value: impl Into<Value>, lambda: impl Into<Param>) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Exponential {
            lambda: lambda.into(),
        };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Categorical over `[0, k)` with a shared probability vector or a
    /// per-observation probability matrix.
    pub fn categorical(value: impl Into<Value>, p: impl Into<Param>) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Categorical { p: p.into() };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Multivariate normal with mean `mu` and covariance `sigma`. A matrix
    /// value is one observation per row.
    pub fn mv_normal(
        value: impl Into<Value>,
        mu: impl Into<Param>,
        sigma: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::MvNormal {
            mu: mu.into(),
            sigma: sigma.into(),
        };
        dist.validate(&value, &[])?;
        Ok(Self::from_parts(value, dist, JumpPolicy::Gaussian))
    }

    /// Wishart with scale matrix `tau` and `n` degrees of freedom. The
    /// value walks its Cholesky factor, so every proposal is symmetric
    /// positive-definite by construction.
    pub fn wishart(
        value: impl Into<Value>,
        tau: impl Into<Param>,
        n: impl Into<Param>,
    ) -> Result<Self> {
        let value = value.into();
        let dist = Distribution::Wishart {
            tau: tau.into(),
            n: n.into(),
        };
        dist.validate(&value, &[])?;
        let walk = match &value {
            Value::RealMat(m) => CholeskyWalk::from_matrix(m)?,
            other => {
                return Err(ModelError::Config(format!(
                    "Wishart values must be real matrices, got {}",
                    other.kind()
                )))
            }
        };
        Ok(Self::from_parts(value, dist, JumpPolicy::Cholesky(walk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperparameters_larger_than_the_value_are_rejected() {
        let err = Stochastic::normal(0.0, vec![0.0, 0.0, 0.0], 1.0).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)), "got {err}");
    }

    #[test]
    fn inverted_uniform_bounds_are_rejected() {
        let err = Stochastic::uniform(3.0, 5.0, 2.0).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)), "got {err}");
    }

    #[test]
    fn wishart_construction_checks() {
        let identity = DMatrix::<f64>::identity(3, 3);
        // degrees of freedom must be positive
        assert!(Stochastic::wishart(identity.clone(), identity.clone(), 0.0).is_err());
        // the scale must conform
        assert!(Stochastic::wishart(identity.clone(), DMatrix::<f64>::identity(2, 2), 5.0).is_err());
        // the initial value must be positive definite
        let indefinite = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert!(Stochastic::wishart(indefinite, identity.clone(), 5.0).is_err());
        assert!(Stochastic::wishart(identity.clone(), identity, 5.0).is_ok());
    }

    #[test]
    fn categorical_value_kind_and_range_checks() {
        let p = vec![0.2, 0.3, 0.5];
        let err = Stochastic::categorical(vec![0.0, 1.0], p.clone()).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
        let err = Stochastic::categorical(vec![0_i64, 3], p.clone()).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
        assert!(Stochastic::categorical(vec![0_i64, 2], p).is_ok());
    }

    #[test]
    fn mv_normal_requires_a_positive_definite_covariance() {
        let mu = vec![0.0, 0.0];
        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let err = Stochastic::mv_normal(vec![0.0, 0.0], mu.clone(), bad).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
        let good = DMatrix::<f64>::identity(2, 2);
        assert!(Stochastic::mv_normal(vec![0.0, 0.0], mu, good).is_ok());
    }

    #[test]
    fn dynamic_parameters_defer_resolution() {
        // a node-valued hyperparameter cannot be checked until the node is
        // added to a model, so construction succeeds
        let node = Stochastic::normal(0.0, NodeId(0), 1.0).unwrap();
        assert_eq!(node.parents(), vec![NodeId(0)]);
    }

    #[test]
    fn loglik_falls_to_neg_infinity_on_unresolvable_parameters() {
        let node = Stochastic::normal(0.0, NodeId(5), 1.0).unwrap();
        assert_eq!(node.loglik(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn constructors_bind_their_log_densities() {
        use approx::assert_abs_diff_eq;
        use crate::math::{self, Broadcast};

        let node = Stochastic::beta(0.5, 2.0, 2.0).unwrap();
        assert_abs_diff_eq!(
            node.loglik(&[]),
            math::beta_logp(Broadcast::Scalar(0.5), Broadcast::Scalar(2.0), Broadcast::Scalar(2.0)),
            epsilon = 1e-12
        );

        let node = Stochastic::poisson(vec![2_i64, 4], 3.0).unwrap();
        let x = [2_i64, 4];
        assert_abs_diff_eq!(
            node.loglik(&[]),
            math::poisson_logp(Broadcast::Ints(&x), Broadcast::Scalar(3.0)),
            epsilon = 1e-12
        );

        let node = Stochastic::exponential(2.0, 0.5).unwrap();
        assert_abs_diff_eq!(node.loglik(&[]), 0.5_f64.ln() - 1.0, epsilon = 1e-12);

        let node = Stochastic::mv_normal(
            vec![1.0, 2.0],
            vec![0.0, 0.0],
            DMatrix::<f64>::identity(2, 2),
        )
        .unwrap();
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let mu = DVector::zeros(2);
        let sigma = DMatrix::identity(2, 2);
        assert_abs_diff_eq!(
            node.loglik(&[]),
            math::multivariate_normal_vec_logp(&x, &mu, &sigma),
            epsilon = 1e-12
        );
    }
}
