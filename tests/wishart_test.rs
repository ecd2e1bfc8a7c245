//! The Cholesky-parameterized walk must keep every Wishart draw symmetric
//! positive-definite, with a finite trace, for the whole run.

use graph_mcmc::core::Node;
use graph_mcmc::model::Model;
use graph_mcmc::stats::RunningMoments;
use graph_mcmc::stochastic::Stochastic;
use nalgebra::{Cholesky, DMatrix};

#[test]
fn wishart_chain_preserves_symmetric_positive_definiteness() {
    let mut model = Model::new(42);
    let w = model
        .add(
            Stochastic::wishart(
                DMatrix::<f64>::identity(3, 3),
                DMatrix::<f64>::identity(3, 3),
                5.0,
            )
            .unwrap()
            .initial_scale(0.1),
        )
        .unwrap();

    model.sample(10_000, 0, 0, 1);

    let history = model.node(w).history();
    assert_eq!(history.len(), 10_000);

    let mut traces = RunningMoments::new(1);
    for draw in history {
        let m = draw.as_real_mat().unwrap();
        let asymmetry = (m - m.transpose()).abs().max();
        assert!(asymmetry < 1e-12, "draw lost symmetry by {asymmetry}");
        assert!(
            Cholesky::new(m.clone()).is_some(),
            "draw is not positive definite"
        );
        traces.step(&[m.trace()]).unwrap();
    }
    assert!(
        traces.mean()[0].is_finite(),
        "trace mean is not finite: {}",
        traces.mean()[0]
    );
}
