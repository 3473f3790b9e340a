use approx::assert_relative_eq;
use deriva_core::{Loss, Ode, OdeFunction, Problem, Scalar};
use deriva_sensitivity::{
    ConfigurationError, Error, Options, SensitivityAlgorithm, gradient_unobserved,
};

/// `u' = p - u`, which settles at `u = p`.
struct Relaxation;

impl OdeFunction for Relaxation {
    fn dim(&self) -> usize {
        1
    }

    fn num_params(&self) -> usize {
        1
    }

    fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
        du[0] = p[0].clone() - u[0].clone();
    }
}

/// The mean of `u` over `count` save points.
struct Average {
    count: usize,
}

impl Loss for Average {
    fn term<T: Scalar>(&self, _index: usize, _t: f64, u: &[T]) -> T {
        u[0].clone() / self.count as f64
    }
}

const INTERVALS: usize = 100;

fn settled() -> (Problem<Ode<Relaxation>>, Vec<f64>) {
    let problem = Problem::new(Ode::new(Relaxation), vec![1.0], (0.0, INTERVALS as f64), vec![1.0])
        .expect("should be a valid problem");
    let saves = (0..=INTERVALS).map(|i| i as f64).collect();
    (problem, saves)
}

#[test]
fn forward_and_adjoint_shadowing_agree() {
    let (problem, saves) = settled();
    let loss = Average {
        count: INTERVALS + 1,
    };
    let alpha = SensitivityAlgorithm::DEFAULT_ALPHA;

    let forward = gradient_unobserved(
        &problem,
        &loss,
        &Options::new(SensitivityAlgorithm::ForwardLss { alpha }).saving(saves.clone()),
    )
    .expect("should shadow");
    let adjoint = gradient_unobserved(
        &problem,
        &loss,
        &Options::new(SensitivityAlgorithm::AdjointLss { alpha }).saving(saves),
    )
    .expect("should shadow");

    // The minimum-norm shadow of v_{i+1} = r v_i + (1 - r), r = e^{-1}, has
    // mean 1 - (1 + r) / ((1 - r) (K + 1)).
    let r = (-1.0_f64).exp();
    let expected = 1.0 - (1.0 + r) / ((1.0 - r) * (INTERVALS + 1) as f64);

    assert_relative_eq!(forward.dp[0], expected, epsilon = 1e-4);
    assert_relative_eq!(adjoint.dp[0], forward.dp[0], epsilon = 1e-10, max_relative = 1e-8);
    assert_relative_eq!(forward.loss, 1.0, epsilon = 1e-8);
    assert_eq!(forward.du0, vec![0.0]);
}

#[test]
fn shadowing_needs_two_intervals() {
    let (problem, _) = settled();
    let options = Options::new(SensitivityAlgorithm::AdjointLss { alpha: 10.0 })
        .saving(vec![50.0, 100.0]);

    let err = gradient_unobserved(&problem, &Average { count: 2 }, &options)
        .expect_err("should need more intervals");
    assert_eq!(err, Error::Configuration(ConfigurationError::SaveIntervals(1)));
}
