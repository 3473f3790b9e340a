use approx::assert_relative_eq;
use deriva_core::{
    Component, Dae, DaeFunction, Dde, DelayFunction, EquationClass, Problem, Scalar,
};
use deriva_sensitivity::{
    ConfigurationError, Error, Options, SensitivityAlgorithm, VjpChoice, gradient_unobserved,
};

/// `y' = -z` with `0 = z - p y`, so `y = y0 e^{-pt}` and `z = p y`.
struct Coupled;

impl DaeFunction for Coupled {
    fn differential_dim(&self) -> usize {
        1
    }

    fn algebraic_dim(&self) -> usize {
        1
    }

    fn num_params(&self) -> usize {
        1
    }

    fn differential<T: Scalar>(&self, _y: &[T], z: &[T], _p: &[T], _t: &T, dy: &mut [T]) {
        dy[0] = -z[0].clone();
    }

    fn algebraic<T: Scalar>(&self, y: &[T], z: &[T], p: &[T], _t: &T, res: &mut [T]) {
        res[0] = z[0].clone() - p[0].clone() * y[0].clone();
    }
}

/// `u' = -p u(t - 1)` with `u = 1` before the start.
struct Feedback;

impl DelayFunction for Feedback {
    fn dim(&self) -> usize {
        1
    }

    fn num_params(&self) -> usize {
        1
    }

    fn lags(&self) -> Vec<f64> {
        vec![1.0]
    }

    fn eval<T: Scalar>(&self, _u: &[T], lagged: &[Vec<T>], p: &[T], _t: &T, du: &mut [T]) {
        du[0] = -(p[0].clone() * lagged[0][0].clone());
    }

    fn history<T: Scalar>(&self, _p: &[T], _t: f64, u: &mut [T]) {
        u[0] = T::one();
    }
}

fn coupled(reinit: bool) -> Problem<Dae<Coupled>> {
    // z0 is only a starting guess for the constraint solve.
    let dae = Dae::new(Coupled).with_reinit(reinit);
    Problem::new(dae, vec![1.0, 0.0], (0.0, 1.0), vec![1.5]).expect("should be a valid problem")
}

fn feedback() -> Problem<Dde<Feedback>> {
    Problem::new(Dde::new(Feedback), vec![1.0], (0.0, 2.0), vec![0.5])
        .expect("should be a valid problem")
}

#[test]
fn algebraic_loss_through_every_dae_algorithm() {
    let algorithms = [
        SensitivityAlgorithm::ForwardDiffSensitivity {
            chunk_size: 0,
            convert_tspan: true,
        },
        SensitivityAlgorithm::InterpolatingAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: false,
        },
        SensitivityAlgorithm::InterpolatingAdjoint {
            autojacvec: VjpChoice::ForwardMode,
            checkpointing: true,
        },
        SensitivityAlgorithm::BacksolveAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: true,
        },
        SensitivityAlgorithm::ReverseDiffAdjoint,
    ];
    let problem = coupled(true);

    // L = z(1) = p e^{-p} with y0 = 1.
    let p = 1.5_f64;
    let decay = (-p).exp();

    for algorithm in algorithms {
        let name = algorithm.name();
        let grad = gradient_unobserved(&problem, &Component(1), &Options::new(algorithm))
            .unwrap_or_else(|err| panic!("{name} should differentiate: {err}"));

        assert_relative_eq!(grad.loss, p * decay, epsilon = 1e-7);
        assert_relative_eq!(grad.du0[0], p * decay, epsilon = 1e-6);
        assert_relative_eq!(grad.du0[1], 0.0, epsilon = 1e-8);
        assert_relative_eq!(grad.dp[0], decay * (1.0 - p), epsilon = 1e-6);
    }
}

#[test]
fn backsolve_needs_reinit_on_a_dae() {
    let algorithm = SensitivityAlgorithm::BacksolveAdjoint {
        autojacvec: VjpChoice::Auto,
        checkpointing: false,
    };
    let err = gradient_unobserved(&coupled(false), &Component(0), &Options::new(algorithm))
        .expect_err("should need reinit");
    assert_eq!(err, Error::Configuration(ConfigurationError::DaeWithoutReinit));
}

#[test]
fn delay_gradient_follows_the_method_of_steps() {
    // u = u0 - p t on [0, 1], so u(2) = u0 - p - p u0 + p²/2.
    let (u0, p) = (1.0, 0.5);
    let expected = u0 - p - p * u0 + 0.5 * p * p;
    let algorithms = [
        SensitivityAlgorithm::ForwardDiffSensitivity {
            chunk_size: 1,
            convert_tspan: false,
        },
        SensitivityAlgorithm::ReverseDiffAdjoint,
        SensitivityAlgorithm::PassThrough,
    ];

    for algorithm in algorithms {
        let name = algorithm.name();
        let grad = gradient_unobserved(&feedback(), &Component(0), &Options::new(algorithm))
            .unwrap_or_else(|err| panic!("{name} should differentiate: {err}"));

        assert_relative_eq!(grad.loss, expected, epsilon = 1e-8);
        assert_relative_eq!(grad.du0[0], 1.0 - p, epsilon = 1e-8);
        assert_relative_eq!(grad.dp[0], -1.0 - u0 + p, epsilon = 1e-8);
    }
}

#[test]
fn continuous_adjoints_do_not_apply_to_delays() {
    let err = gradient_unobserved(&feedback(), &Component(0), &Options::default())
        .expect_err("should reject a delay equation");

    assert_eq!(
        err,
        Error::Configuration(ConfigurationError::Inapplicable {
            algorithm: "InterpolatingAdjoint",
            class: EquationClass::Dde,
        })
    );
}
