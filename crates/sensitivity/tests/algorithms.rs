use approx::assert_relative_eq;
use deriva_core::{Component, Ode, OdeFunction, Problem, Scalar, SumOfStates};
use deriva_sensitivity::{
    ConfigurationError, Error, Options, Pullback, SensitivityAlgorithm, UserVjp, VjpChoice,
    gradient_unobserved,
};

/// `u' = (p1 - p2) u`
struct Growth;

impl OdeFunction for Growth {
    fn dim(&self) -> usize {
        1
    }

    fn num_params(&self) -> usize {
        2
    }

    fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
        du[0] = p[0].clone() * u[0].clone() - p[1].clone() * u[0].clone();
    }
}

/// Lotka–Volterra with prey growth `p0` and predator death `p1`.
struct PredatorPrey;

impl OdeFunction for PredatorPrey {
    fn dim(&self) -> usize {
        2
    }

    fn num_params(&self) -> usize {
        2
    }

    fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
        let (x, y) = (u[0].clone(), u[1].clone());
        du[0] = p[0].clone() * x.clone() - x.clone() * y.clone();
        du[1] = x * y.clone() - p[1].clone() * y;
    }
}

/// The hand-written pullback of [`PredatorPrey`].
fn predator_prey_vjp() -> UserVjp {
    UserVjp::new(|u: &[f64], p: &[f64], _t: f64| {
        let (x, y, p0, p1) = (u[0], u[1], p[0], p[1]);
        let f = vec![p0 * x - x * y, x * y - p1 * y];
        let pullback: Pullback = Box::new(move |v: &[f64]| {
            let du = vec![v[0] * (p0 - y) + v[1] * y, -v[0] * x + v[1] * (x - p1)];
            let dp = vec![v[0] * x, -v[1] * y];
            (du, dp)
        });
        (f, pullback)
    })
}

fn growth() -> Problem<Ode<Growth>> {
    Problem::new(Ode::new(Growth), vec![1.0], (0.0, 1.0), vec![1.5, 1.0])
        .expect("should be a valid problem")
}

fn predator_prey() -> Problem<Ode<PredatorPrey>> {
    Problem::new(
        Ode::new(PredatorPrey),
        vec![1.0, 1.0],
        (0.0, 2.0),
        vec![1.5, 3.0],
    )
    .expect("should be a valid problem")
}

fn saving(algorithm: SensitivityAlgorithm) -> Options {
    Options::new(algorithm).saving(vec![0.5, 1.0, 1.5, 2.0])
}

fn reference() -> deriva_sensitivity::Gradient {
    let options = saving(SensitivityAlgorithm::ForwardDiffSensitivity {
        chunk_size: 0,
        convert_tspan: false,
    });
    gradient_unobserved(&predator_prey(), &SumOfStates, &options).expect("should differentiate")
}

fn assert_matches(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert_relative_eq!(*a, *e, epsilon = 1e-6, max_relative = 1e-4);
    }
}

#[test]
fn growth_gradient_matches_closed_form() {
    let problem = growth();
    let e = 0.5_f64.exp();

    for algorithm in [
        SensitivityAlgorithm::default(),
        SensitivityAlgorithm::ForwardDiffSensitivity {
            chunk_size: 0,
            convert_tspan: false,
        },
    ] {
        let grad = gradient_unobserved(&problem, &Component(0), &Options::new(algorithm))
            .expect("should differentiate");

        assert_relative_eq!(grad.loss, e, max_relative = 1e-6);
        assert_relative_eq!(grad.dp[0], e, max_relative = 1e-4);
        assert_relative_eq!(grad.dp[1], -e, max_relative = 1e-4);
        assert_relative_eq!(grad.du0[0], e, max_relative = 1e-4);
    }
}

#[test]
fn every_algorithm_agrees_on_predator_prey() {
    let expected = reference();
    let algorithms = [
        SensitivityAlgorithm::ForwardSensitivity {
            autojacvec: VjpChoice::Auto,
        },
        SensitivityAlgorithm::ForwardDiffSensitivity {
            chunk_size: 1,
            convert_tspan: false,
        },
        SensitivityAlgorithm::BacksolveAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: false,
        },
        SensitivityAlgorithm::BacksolveAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: true,
        },
        SensitivityAlgorithm::InterpolatingAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: false,
        },
        SensitivityAlgorithm::InterpolatingAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: true,
        },
        SensitivityAlgorithm::QuadratureAdjoint {
            autojacvec: VjpChoice::Auto,
            abstol: 1e-10,
            reltol: 1e-8,
        },
        SensitivityAlgorithm::ReverseDiffAdjoint,
        SensitivityAlgorithm::TrackerAdjoint,
        SensitivityAlgorithm::ZygoteAdjoint,
        SensitivityAlgorithm::PassThrough,
    ];

    for algorithm in algorithms {
        let name = algorithm.name();
        let grad = gradient_unobserved(&predator_prey(), &SumOfStates, &saving(algorithm))
            .unwrap_or_else(|err| panic!("{name} should differentiate: {err}"));

        assert_relative_eq!(grad.loss, expected.loss, max_relative = 1e-6);
        assert_matches(&grad.du0, &expected.du0);
        assert_matches(&grad.dp, &expected.dp);
        assert_eq!(grad.solution.t, vec![0.5, 1.0, 1.5, 2.0]);
    }
}

#[test]
fn every_vjp_choice_agrees() {
    let expected = reference();
    let choices = [
        VjpChoice::ReverseDiff { compile: true },
        VjpChoice::ReverseDiff { compile: false },
        VjpChoice::Tracker,
        VjpChoice::Zygote,
        VjpChoice::Enzyme,
        VjpChoice::ForwardMode,
        VjpChoice::Numerical,
        VjpChoice::UserProvided(predator_prey_vjp()),
    ];

    for autojacvec in choices {
        let name = autojacvec.name();
        let algorithm = SensitivityAlgorithm::InterpolatingAdjoint {
            autojacvec,
            checkpointing: false,
        };
        let grad = gradient_unobserved(&predator_prey(), &SumOfStates, &saving(algorithm))
            .unwrap_or_else(|err| panic!("{name} should differentiate: {err}"));

        assert_matches(&grad.du0, &expected.du0);
        assert_matches(&grad.dp, &expected.dp);
    }
}

#[test]
fn forward_algorithms_report_sensitivities() {
    let algorithm = SensitivityAlgorithm::ForwardSensitivity {
        autojacvec: VjpChoice::Numerical,
    };
    let grad = gradient_unobserved(&predator_prey(), &SumOfStates, &saving(algorithm))
        .expect("should differentiate");
    let forward = grad.sensitivities.expect("should keep sensitivities");
    let dual = reference().sensitivities.expect("should keep sensitivities");

    assert_eq!(forward.len(), 4);
    for (s, d) in forward.iter().zip(&dual) {
        assert_eq!(s.shape(), (2, 4));
        assert_relative_eq!(s, d, epsilon = 1e-6, max_relative = 1e-4);
    }
}

#[test]
fn forward_sensitivity_rejects_reverse_choices() {
    let algorithm = SensitivityAlgorithm::ForwardSensitivity {
        autojacvec: VjpChoice::Zygote,
    };
    let err = gradient_unobserved(&growth(), &Component(0), &Options::new(algorithm))
        .expect_err("should reject a reverse-mode choice");

    assert_eq!(
        err,
        Error::Configuration(ConfigurationError::ReverseVjp {
            vjp: "Zygote",
            algorithm: "ForwardSensitivity",
        })
    );
}

#[test]
fn backsolve_reports_divergence_from_the_forward_state() {
    for (checkpointing, first_check) in [(false, 0.0), (true, 1.5)] {
        let backsolve = SensitivityAlgorithm::BacksolveAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing,
        };
        let options = saving(backsolve)
            .with_instability_tol(1e-14)
            .expect("should accept the tolerance");

        let err = gradient_unobserved(&predator_prey(), &SumOfStates, &options)
            .expect_err("should detect the divergence");
        let Error::NumericalInstability { t, divergence, tolerance } = err else {
            panic!("expected a numerical instability, got {err:?}");
        };
        assert_relative_eq!(t, first_check);
        assert_relative_eq!(tolerance, 1e-14);
        assert!(divergence > tolerance);
    }
}

#[test]
fn checkpointed_backsolve_counts_its_checkpoints() {
    let checkpointed = SensitivityAlgorithm::BacksolveAdjoint {
        autojacvec: VjpChoice::Auto,
        checkpointing: true,
    };
    let grad = gradient_unobserved(&predator_prey(), &SumOfStates, &saving(checkpointed))
        .expect("should differentiate");

    // One comparison per stop below the end: 1.5, 1.0, 0.5, and 0.0.
    assert_eq!(grad.stats.checkpoints, 4);
    assert!(grad.stats.backward.steps > 0);
}
