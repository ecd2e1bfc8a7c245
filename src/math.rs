//! Log-density kernels and the numeric helpers behind them.
//!
//! Every kernel returns a scalar log-density in natural log, summed over the
//! elements of the observation payload. Hyperparameters broadcast: a scalar
//! applies to every element, a slice must match the payload element count.
//! Domain violations are first-class results, expressed as `-inf`.

use std::cell::RefCell;
use std::f64::consts::{LN_2, PI};

use nalgebra::{Cholesky, DMatrix, DVector};

/// Elementwise logarithm used by the kernels.
///
/// The `fast-log` build substitutes a bit-decomposition approximation that is
/// accurate to well under 1e-9 relative error, small enough to leave
/// acceptance decisions untouched.
#[cfg(not(feature = "fast-log"))]
#[inline]
pub fn log_approx(x: f64) -> f64 {
    x.ln()
}

#[cfg(feature = "fast-log")]
pub fn log_approx(x: f64) -> f64 {
    if x > 0.0 && x.is_finite() {
        let bits = x.to_bits();
        let e = ((bits >> 52) & 0x7ff) as i64 - 1023;
        if e == -1023 {
            // subnormal, fall back to the exact path
            return x.ln();
        }
        let m = f64::from_bits((bits & 0x000f_ffff_ffff_ffff) | (1023u64 << 52));
        // ln(m) for m in [1, 2) via the atanh series in s = (m-1)/(m+1).
        let s = (m - 1.0) / (m + 1.0);
        let s2 = s * s;
        let ln_m =
            2.0 * s * (1.0 + s2 * (1.0 / 3.0 + s2 * (0.2 + s2 * (1.0 / 7.0 + s2 / 9.0))));
        e as f64 * LN_2 + ln_m
    } else if x == 0.0 {
        f64::NEG_INFINITY
    } else {
        x.ln()
    }
}

/// Natural log of the gamma function via the Lanczos approximation (g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // Reflection: Γ(x) = π / (sin(πx) · Γ(1-x))
        let log_pi_over_sin = (PI / (PI * x).sin()).ln();
        log_pi_over_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5; // g + 0.5
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

thread_local! {
    static FACTLN_TABLE: RefCell<Vec<f64>> = const { RefCell::new(Vec::new()) };
}

fn ln_factorial_direct(n: usize) -> f64 {
    let mut prod = 1.0_f64;
    for i in 2..=n {
        prod *= i as f64;
    }
    prod.ln()
}

/// `log(n!)`, `-inf` for negative `n`.
///
/// Small arguments are computed directly and memoized in a thread-local
/// table; arguments above 100 go through `ln_gamma(n + 1)`.
pub fn factln(n: i64) -> f64 {
    if n < 0 {
        return f64::NEG_INFINITY;
    }
    if n > 100 {
        return ln_gamma(n as f64 + 1.0);
    }
    let n = n as usize;
    FACTLN_TABLE.with(|table| {
        let mut table = table.borrow_mut();
        while table.len() <= n {
            let next = table.len();
            table.push(ln_factorial_direct(next));
        }
        table[n]
    })
}

/// Broadcasting view over a payload or hyperparameter.
///
/// A scalar (or one-element slice) repeats over every index; anything else
/// must conform to the observation's element count.
#[derive(Clone, Copy)]
pub enum Broadcast<'a> {
    Scalar(f64),
    Reals(&'a [f64]),
    Ints(&'a [i64]),
}

impl Broadcast<'_> {
    pub fn len(&self) -> usize {
        match self {
            Broadcast::Scalar(_) => 1,
            Broadcast::Reals(s) => s.len(),
            Broadcast::Ints(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i`, with scalars repeating.
    pub fn get(&self, i: usize) -> f64 {
        match self {
            Broadcast::Scalar(x) => *x,
            Broadcast::Reals(s) => {
                if s.len() == 1 {
                    s[0]
                } else {
                    s[i]
                }
            }
            Broadcast::Ints(s) => {
                if s.len() == 1 {
                    s[0] as f64
                } else {
                    s[i] as f64
                }
            }
        }
    }

    pub fn conforms_to(&self, n: usize) -> bool {
        let len = self.len();
        len == 1 || len == n
    }
}

// ── Scalar-family kernels ──────────────────────────────────────────────────

pub fn normal_logp(x: Broadcast, mu: Broadcast, tau: Broadcast) -> f64 {
    let n = x.len();
    if !mu.conforms_to(n) || !tau.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, mi, ti) = (x.get(i), mu.get(i), tau.get(i));
        let d = xi - mi;
        acc += 0.5 * log_approx(0.5 * ti / PI) - 0.5 * ti * d * d;
    }
    acc
}

pub fn uniform_logp(x: Broadcast, lower: Broadcast, upper: Broadcast) -> f64 {
    let n = x.len();
    if !lower.conforms_to(n) || !upper.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, lo, hi) = (x.get(i), lower.get(i), upper.get(i));
        if xi < lo || xi > hi {
            return f64::NEG_INFINITY;
        }
        acc -= log_approx(hi - lo);
    }
    acc
}

pub fn gamma_logp(x: Broadcast, alpha: Broadcast, beta: Broadcast) -> f64 {
    let n = x.len();
    if !alpha.conforms_to(n) || !beta.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, ai, bi) = (x.get(i), alpha.get(i), beta.get(i));
        if xi < 0.0 {
            return f64::NEG_INFINITY;
        }
        acc += (ai - 1.0) * log_approx(xi) - bi * xi - ln_gamma(ai) + ai * log_approx(bi);
    }
    acc
}

pub fn beta_logp(x: Broadcast, alpha: Broadcast, beta: Broadcast) -> f64 {
    let n = x.len();
    if !alpha.conforms_to(n) || !beta.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, ai, bi) = (x.get(i), alpha.get(i), beta.get(i));
        if xi <= 0.0 || xi >= 1.0 || ai <= 0.0 || bi <= 0.0 {
            return f64::NEG_INFINITY;
        }
        acc += ln_gamma(ai + bi) - ln_gamma(ai) - ln_gamma(bi)
            + (ai - 1.0) * log_approx(xi)
            + (bi - 1.0) * log_approx(1.0 - xi);
    }
    acc
}

pub fn bernoulli_logp(x: Broadcast, p: Broadcast) -> f64 {
    let n = x.len();
    if !p.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, pi) = (x.get(i), p.get(i));
        if pi <= 0.0 || pi >= 1.0 || (xi != 0.0 && xi != 1.0) {
            return f64::NEG_INFINITY;
        }
        acc += xi * log_approx(pi) + (1.0 - xi) * log_approx(1.0 - pi);
    }
    acc
}

pub fn binomial_logp(x: Broadcast, n_trials: Broadcast, p: Broadcast) -> f64 {
    let n = x.len();
    if !n_trials.conforms_to(n) || !p.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, ni, pi) = (x.get(i), n_trials.get(i), p.get(i));
        if pi <= 0.0 || pi >= 1.0 || xi < 0.0 || xi > ni {
            return f64::NEG_INFINITY;
        }
        acc += xi * log_approx(pi) + (ni - xi) * log_approx(1.0 - pi) + factln(ni as i64)
            - factln(xi as i64)
            - factln((ni - xi) as i64);
    }
    acc
}

pub fn poisson_logp(x: Broadcast, mu: Broadcast) -> f64 {
    let n = x.len();
    if !mu.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, mi) = (x.get(i), mu.get(i));
        if mi < 0.0 || xi < 0.0 {
            return f64::NEG_INFINITY;
        }
        acc += xi * log_approx(mi) - mi - factln(xi as i64);
    }
    acc
}

pub fn exponential_logp(x: Broadcast, lambda: Broadcast) -> f64 {
    let n = x.len();
    if !lambda.conforms_to(n) {
        return f64::NEG_INFINITY;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let (xi, li) = (x.get(i), lambda.get(i));
        acc += log_approx(li) - li * xi;
    }
    acc
}

// ── Categorical ────────────────────────────────────────────────────────────

/// Categorical with one probability table shared by every observation.
pub fn categorical_vec_logp(x: &DVector<i64>, p: &DVector<f64>) -> f64 {
    let k = p.len() as i64;
    if p.iter().any(|&pi| pi <= 0.0 || pi >= 1.0) {
        return f64::NEG_INFINITY;
    }
    if x.iter().any(|&xi| xi < 0 || xi >= k) {
        return f64::NEG_INFINITY;
    }
    x.iter().map(|&xi| log_approx(p[xi as usize])).sum()
}

/// Categorical with one probability row per observation.
pub fn categorical_table_logp(x: &DVector<i64>, p: &DMatrix<f64>) -> f64 {
    let k = p.ncols() as i64;
    if p.nrows() != x.len() {
        return f64::NEG_INFINITY;
    }
    if p.iter().any(|&pi| pi <= 0.0 || pi >= 1.0) {
        return f64::NEG_INFINITY;
    }
    if x.iter().any(|&xi| xi < 0 || xi >= k) {
        return f64::NEG_INFINITY;
    }
    x.iter()
        .enumerate()
        .map(|(i, &xi)| log_approx(p[(i, xi as usize)]))
        .sum()
}

// ── Multivariate normal and Wishart ────────────────────────────────────────

/// Determinant of `L·Lᵀ` from the Cholesky factor `L`.
pub fn cholesky_determinant(l: &DMatrix<f64>) -> f64 {
    l.diagonal().iter().map(|d| d * d).product()
}

/// Squared Mahalanobis distance through the Cholesky factor `L` of the
/// covariance. A singular factor pushes the distance to `+inf`, which the
/// caller turns into a `-inf` log-density.
pub fn mahalanobis_chol(x: &DVector<f64>, mu: &DVector<f64>, l: &DMatrix<f64>) -> f64 {
    let err = x - mu;
    match l.solve_lower_triangular(&err) {
        Some(z) => z.norm_squared(),
        None => f64::INFINITY,
    }
}

fn multivariate_normal_chol_logp(x: &DVector<f64>, mu: &DVector<f64>, l: &DMatrix<f64>) -> f64 {
    let log_2pi = (2.0 * PI).ln();
    let k = x.len() as f64;
    let ldet = log_approx(cholesky_determinant(l));
    -0.5 * (k * log_2pi + ldet + mahalanobis_chol(x, mu, l))
}

/// Multivariate normal (covariance form) for a single observation vector.
pub fn multivariate_normal_vec_logp(
    x: &DVector<f64>,
    mu: &DVector<f64>,
    sigma: &DMatrix<f64>,
) -> f64 {
    let k = mu.len();
    if x.len() != k || sigma.nrows() != k || sigma.ncols() != k {
        return f64::NEG_INFINITY;
    }
    match Cholesky::new(sigma.clone()) {
        Some(chol) => multivariate_normal_chol_logp(x, mu, &chol.l()),
        None => f64::NEG_INFINITY,
    }
}

/// Multivariate normal (covariance form), one observation per matrix row.
pub fn multivariate_normal_rows_logp(
    x: &DMatrix<f64>,
    mu: &DVector<f64>,
    sigma: &DMatrix<f64>,
) -> f64 {
    let k = mu.len();
    if x.ncols() != k || sigma.nrows() != k || sigma.ncols() != k {
        return f64::NEG_INFINITY;
    }
    let chol = match Cholesky::new(sigma.clone()) {
        Some(chol) => chol,
        None => return f64::NEG_INFINITY,
    };
    let l = chol.l();
    let mut acc = 0.0;
    for i in 0..x.nrows() {
        let row = x.row(i).transpose();
        acc += multivariate_normal_chol_logp(&row, mu, &l);
    }
    acc
}

/// Wishart log-density of `x` against scale `tau` with `n` degrees of
/// freedom.
pub fn wishart_logp(x: &DMatrix<f64>, tau: &DMatrix<f64>, n: f64) -> f64 {
    let k = x.ncols();
    if x.nrows() != k || tau.nrows() != tau.ncols() || tau.nrows() != k || (k as f64) > n {
        return f64::NEG_INFINITY;
    }
    let dx = x.determinant();
    let db = tau.determinant();
    if dx <= 0.0 || db <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let ldx = log_approx(dx);
    let ldb = log_approx(db);
    let tbx = (x * tau).trace();
    let kf = k as f64;
    let cum_lgamma = kf * ln_gamma((n + 1.0) / 2.0);
    (n - kf - 1.0) / 2.0 * ldx + (n / 2.0) * ldb - 0.5 * tbx - (n * kf / 2.0) * LN_2 - cum_lgamma
}
