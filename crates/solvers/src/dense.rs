use deriva_core::Scalar;

/// The continuous extension of one accepted Dormand–Prince step.
///
/// Evaluates
///
/// ```text
/// y(t0 + θh) = r1 + θ (r2 + (1 - θ) (r3 + θ (r4 + (1 - θ) r5)))
/// ```
///
/// which is a fourth-order accurate interpolant over the step.
#[derive(Debug, Clone)]
pub struct DenseStep<T> {
    t0: T,
    h: T,
    end: f64,
    r: [Vec<T>; 5],
}

impl<T: Scalar> DenseStep<T> {
    pub(crate) fn new(t0: T, h: T, end: f64, r: [Vec<T>; 5]) -> Self {
        Self { t0, h, end, r }
    }

    /// Returns the time the step starts at.
    #[must_use]
    pub fn start(&self) -> f64 {
        self.t0.value()
    }

    /// Returns the time the step ends at.
    #[must_use]
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Returns the lower and upper time bounds, regardless of direction.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64) {
        let (a, b) = (self.start(), self.end);
        if a <= b { (a, b) } else { (b, a) }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.r[0].len()
    }

    /// Interpolates the state at `t`.
    #[must_use]
    pub fn eval(&self, t: &T) -> Vec<T> {
        let theta = (t.clone() - self.t0.clone()) / self.h.clone();
        let theta1 = T::one() - theta.clone();
        let [r1, r2, r3, r4, r5] = &self.r;
        (0..self.dim())
            .map(|i| {
                let inner = r4[i].clone() + theta1.clone() * r5[i].clone();
                let inner = r3[i].clone() + theta.clone() * inner;
                let inner = r2[i].clone() + theta1.clone() * inner;
                r1[i].clone() + theta.clone() * inner
            })
            .collect()
    }

    /// Drops derivative information, keeping only primal values.
    #[must_use]
    pub fn to_values(&self) -> DenseStep<f64> {
        DenseStep {
            t0: self.t0.value(),
            h: self.h.value(),
            end: self.end,
            r: self.r.clone().map(|r| r.iter().map(Scalar::value).collect()),
        }
    }
}

/// A piecewise continuous interpolant of a whole solve.
///
/// Steps are stored in integration order. Across an event the state jumps;
/// use [`window`](Self::window) to evaluate on one side of a jump.
#[derive(Debug, Clone, Default)]
pub struct DenseOutput {
    steps: Vec<DenseStep<f64>>,
}

impl DenseOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: DenseStep<f64>) {
        self.steps.push(step);
    }

    #[must_use]
    pub fn steps(&self) -> &[DenseStep<f64>] {
        &self.steps
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Interpolates the state at `t` over the whole solve.
    ///
    /// At an event time the state before the event is returned.
    ///
    /// # Panics
    ///
    /// Panics if the output is empty.
    #[must_use]
    pub fn at(&self, t: f64) -> Vec<f64> {
        Window { steps: &self.steps }.at(t)
    }

    /// Restricts evaluation to the steps that overlap the open interval
    /// between `a` and `b`.
    #[must_use]
    pub fn window(&self, a: f64, b: f64) -> Window<'_> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let first = self.steps.iter().position(|s| {
            let (s_lo, s_hi) = s.bounds();
            s_lo < hi && s_hi > lo
        });
        let steps = match first {
            Some(first) => {
                let len = self.steps[first..]
                    .iter()
                    .take_while(|s| {
                        let (s_lo, s_hi) = s.bounds();
                        s_lo < hi && s_hi > lo
                    })
                    .count();
                &self.steps[first..first + len]
            }
            None => &[],
        };
        Window { steps }
    }
}

/// A contiguous run of dense steps without internal jumps.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    steps: &'a [DenseStep<f64>],
}

impl Window<'_> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Interpolates the state at `t`, clamping to the window's ends.
    ///
    /// # Panics
    ///
    /// Panics if the window is empty.
    #[must_use]
    pub fn at(&self, t: f64) -> Vec<f64> {
        assert!(!self.steps.is_empty(), "cannot interpolate an empty window");
        let forward = self.steps[0].start() <= self.steps[0].end();
        // Number of steps that end strictly before `t` in integration order.
        let index = self.steps.partition_point(|s| {
            if forward { s.end() < t } else { s.end() > t }
        });
        let step = &self.steps[index.min(self.steps.len() - 1)];
        step.eval(&t)
    }
}
