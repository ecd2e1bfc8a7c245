//! Observed-data scenarios: logistic regression through deterministic
//! transforms, and a Binomial count with a Uniform prior.

use graph_mcmc::deterministic::Deterministic;
use graph_mcmc::model::Model;
use graph_mcmc::stochastic::Stochastic;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const ITERATIONS: usize = 50_000;
const BURN: usize = 10_000;
const ADAPT_EVERY: usize = 100;
const THIN: usize = 10;
const SEED: u64 = 42;

#[test]
fn bernoulli_regression_recovers_the_coefficients() {
    const N: usize = 100;
    const TRUE_B: [f64; 2] = [-0.5, 1.2];

    // synthetic design: an intercept column and one spread-out covariate
    let mut data_rng = SmallRng::seed_from_u64(7);
    let covariate: Vec<f64> = (0..N).map(|_| data_rng.gen::<f64>() * 6.0 - 3.0).collect();
    let design = DMatrix::from_fn(N, 2, |i, j| if j == 0 { 1.0 } else { covariate[i] });
    let y: Vec<i64> = (0..N)
        .map(|i| {
            let eta = TRUE_B[0] + TRUE_B[1] * covariate[i];
            let p = 1.0 / (1.0 + (-eta).exp());
            (data_rng.gen::<f64>() < p) as i64
        })
        .collect();

    let mut model = Model::new(SEED);
    let b = model
        .add(
            Stochastic::normal(DVector::<f64>::zeros(2), 0.0, 0.01)
                .unwrap()
                .component_wise(),
        )
        .unwrap();
    let eta = model.add(Deterministic::linear(design, b)).unwrap();
    let p = model.add(Deterministic::logistic(eta, N)).unwrap();
    model
        .add(
            Stochastic::bernoulli(DVector::from_vec(y), p)
                .unwrap()
                .observed(),
        )
        .unwrap();

    model.sample(ITERATIONS, BURN, ADAPT_EVERY, THIN);

    let posterior = model.mean(b).unwrap();
    let posterior = posterior.as_real_vec().unwrap();
    for (i, truth) in TRUE_B.iter().enumerate() {
        assert!(
            (posterior[i] - truth).abs() < 0.2,
            "coefficient {i} off: posterior {} vs truth {truth}",
            posterior[i]
        );
    }
}

#[test]
fn binomial_count_recovers_the_success_probability() {
    // ten draws from Binomial(20, 0.3), sixty successes in total
    let counts: Vec<i64> = vec![6, 5, 7, 4, 8, 6, 5, 9, 3, 7];

    let mut model = Model::new(SEED);
    let p = model
        .add(
            Stochastic::uniform(0.5, 0.0, 1.0)
                .unwrap()
                .initial_scale(0.1),
        )
        .unwrap();
    model
        .add(
            Stochastic::binomial(DVector::from_vec(counts), 20.0, p)
                .unwrap()
                .observed(),
        )
        .unwrap();

    model.sample(ITERATIONS, BURN, ADAPT_EVERY, THIN);

    let posterior = model.mean(p).unwrap().elem(0);
    assert!(
        (posterior - 0.3).abs() < 0.03,
        "posterior mean of p off target: {posterior}"
    );
}
