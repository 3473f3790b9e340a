use approx::assert_relative_eq;
use deriva_core::{
    Callbacks, Component, Direction, EquationClass, EventKind, Ode, OdeFunction, Problem, Scalar,
};
use deriva_sensitivity::{
    ConfigurationError, Error, Options, SensitivityAlgorithm, VjpChoice, gradient_unobserved,
};

/// A ball in free fall: `u = [x, v]`, `x' = v`, `v' = -p`.
struct Fall;

impl OdeFunction for Fall {
    fn dim(&self) -> usize {
        2
    }

    fn num_params(&self) -> usize {
        1
    }

    fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
        du[0] = u[1].clone();
        du[1] = -p[0].clone();
    }
}

/// Reverses and halves the velocity when the ball reaches the floor.
struct Bounce;

impl Callbacks for Bounce {
    fn events(&self) -> Vec<EventKind> {
        vec![EventKind::Continuous {
            direction: Direction::Down,
        }]
    }

    fn condition<T: Scalar>(&self, _index: usize, u: &[T], _p: &[T], _t: &T) -> T {
        u[0].clone()
    }

    fn affect<T: Scalar>(&self, _index: usize, u: &mut [T], _p: &[T], _t: &T) {
        u[1] = -(u[1].clone() * 0.5);
    }
}

/// `u' = -p0 u`
struct Clearance;

impl OdeFunction for Clearance {
    fn dim(&self) -> usize {
        1
    }

    fn num_params(&self) -> usize {
        2
    }

    fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
        du[0] = -(p[0].clone() * u[0].clone());
    }
}

/// Adds a dose of `p1` at each of `times`.
struct Doses {
    times: Vec<f64>,
}

impl Callbacks for Doses {
    fn events(&self) -> Vec<EventKind> {
        self.times
            .iter()
            .map(|&t| EventKind::Preset { times: vec![t] })
            .collect()
    }

    fn affect<T: Scalar>(&self, _index: usize, u: &mut [T], p: &[T], _t: &T) {
        u[0] = u[0].clone() + p[1].clone();
    }
}

fn bouncing() -> Problem<Ode<Fall>, Bounce> {
    Problem::with_callbacks(Ode::new(Fall), vec![1.0, 0.0], (0.0, 1.8), vec![2.0], Bounce)
        .expect("should be a valid problem")
}

fn dosed(times: Vec<f64>) -> Problem<Ode<Clearance>, Doses> {
    Problem::with_callbacks(
        Ode::new(Clearance),
        vec![1.0],
        (0.0, 1.0),
        vec![0.8, 0.5],
        Doses { times },
    )
    .expect("should be a valid problem")
}

fn event_algorithms() -> Vec<SensitivityAlgorithm> {
    vec![
        SensitivityAlgorithm::ForwardDiffSensitivity {
            chunk_size: 0,
            convert_tspan: true,
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
            autojacvec: VjpChoice::ForwardMode,
            checkpointing: true,
        },
        SensitivityAlgorithm::QuadratureAdjoint {
            autojacvec: VjpChoice::Auto,
            abstol: 1e-10,
            reltol: 1e-8,
        },
        SensitivityAlgorithm::ReverseDiffAdjoint,
    ]
}

#[test]
fn bounce_moves_with_the_drop_height_and_gravity() {
    // Impact at τ = √(2 x0 / p) = 1, then x(T) = v⁺ s - p s² / 2 with
    // s = T - τ = 0.8 and v⁺ = p τ / 2.
    let problem = bouncing();
    let (x_final, dx0, dp) = (0.16, 0.7, -0.27);

    let reference = gradient_unobserved(
        &problem,
        &Component(0),
        &Options::new(SensitivityAlgorithm::ReverseDiffAdjoint),
    )
    .expect("should differentiate");

    for algorithm in event_algorithms() {
        let name = algorithm.name();
        let grad = gradient_unobserved(&problem, &Component(0), &Options::new(algorithm))
            .unwrap_or_else(|err| panic!("{name} should differentiate: {err}"));

        assert_relative_eq!(grad.loss, x_final, epsilon = 1e-7);
        assert_relative_eq!(grad.du0[0], dx0, epsilon = 1e-5);
        assert_relative_eq!(grad.du0[1], reference.du0[1], epsilon = 1e-5);
        assert_relative_eq!(grad.dp[0], dp, epsilon = 1e-5);
        assert_eq!(grad.solution.events.len(), 1);
    }
}

#[test]
fn doses_shift_the_gradient() {
    // u(1) = (u0 e^{-p0/2} + p1) e^{-p0/2}.
    let problem = dosed(vec![0.5]);
    let (u0, p0, p1) = (1.0, 0.8, 0.5);
    let half = (-0.5 * p0).exp();
    let expected_du0 = half * half;
    let expected_dp = [-u0 * half * half - 0.5 * p1 * half, half];

    for algorithm in event_algorithms() {
        let name = algorithm.name();
        let grad = gradient_unobserved(&problem, &Component(0), &Options::new(algorithm))
            .unwrap_or_else(|err| panic!("{name} should differentiate: {err}"));

        assert_relative_eq!(grad.loss, (u0 * half + p1) * half, epsilon = 1e-8);
        assert_relative_eq!(grad.du0[0], expected_du0, epsilon = 1e-6);
        assert_relative_eq!(grad.dp[0], expected_dp[0], epsilon = 1e-6);
        assert_relative_eq!(grad.dp[1], expected_dp[1], epsilon = 1e-6);
    }
}

#[test]
fn saves_at_a_dose_see_the_dosed_state() {
    let problem = dosed(vec![0.5]);
    let options = Options::new(SensitivityAlgorithm::default()).saving(vec![0.5]);
    let grad =
        gradient_unobserved(&problem, &Component(0), &options).expect("should differentiate");

    let half = (-0.4_f64).exp();
    assert_relative_eq!(grad.loss, half + 0.5, epsilon = 1e-8);
    assert_relative_eq!(grad.dp[1], 1.0, epsilon = 1e-8);
    assert_relative_eq!(grad.du0[0], half, epsilon = 1e-7);
}

#[test]
fn forward_sensitivities_reject_callbacks() {
    let algorithm = SensitivityAlgorithm::ForwardSensitivity {
        autojacvec: VjpChoice::Auto,
    };
    let err = gradient_unobserved(&bouncing(), &Component(0), &Options::new(algorithm))
        .expect_err("should reject callbacks");

    assert_eq!(
        err,
        Error::Configuration(ConfigurationError::Callbacks {
            algorithm: "ForwardSensitivity",
            class: EquationClass::Ode,
        })
    );
}

#[test]
fn forward_diff_needs_converted_event_times() {
    let algorithm = SensitivityAlgorithm::ForwardDiffSensitivity {
        chunk_size: 0,
        convert_tspan: false,
    };
    let err = gradient_unobserved(&bouncing(), &Component(0), &Options::new(algorithm))
        .expect_err("should require convert_tspan");

    assert_eq!(err, Error::Configuration(ConfigurationError::ConvertTspan));
}

#[test]
fn adjoints_reject_simultaneous_presets() {
    let problem = dosed(vec![0.5, 0.5]);
    let err = gradient_unobserved(&problem, &Component(0), &Options::default())
        .expect_err("should reject two doses at once");
    assert_eq!(
        err,
        Error::Configuration(ConfigurationError::SimultaneousEvents(0.5))
    );

    let forward_diff = SensitivityAlgorithm::ForwardDiffSensitivity {
        chunk_size: 0,
        convert_tspan: true,
    };
    let grad = gradient_unobserved(&problem, &Component(0), &Options::new(forward_diff))
        .expect("forward mode should accept simultaneous doses");
    let half = (-0.4_f64).exp();
    assert_relative_eq!(grad.dp[1], 2.0 * half, epsilon = 1e-8);
}
