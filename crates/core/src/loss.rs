use crate::Scalar;

/// A scalar loss summed over saved states.
///
/// ```text
/// L = Σ_i term(i, t_i, u(t_i))
/// ```
///
/// where `t_i` are the save points of the solve in integration order.
pub trait Loss {
    /// Evaluates the contribution of save point `index`.
    fn term<T: Scalar>(&self, index: usize, t: f64, u: &[T]) -> T;
}

/// The value of one state component, summed over save points.
///
/// With the default save points this is the component's final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component(pub usize);

impl Loss for Component {
    fn term<T: Scalar>(&self, _index: usize, _t: f64, u: &[T]) -> T {
        u[self.0].clone()
    }
}

/// The sum of every state component at every save point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumOfStates;

impl Loss for SumOfStates {
    fn term<T: Scalar>(&self, _index: usize, _t: f64, u: &[T]) -> T {
        u.iter().cloned().fold(T::zero(), |acc, x| acc + x)
    }
}

/// Half the squared distance to observed data, one row per save point.
#[derive(Debug, Clone, PartialEq)]
pub struct SquaredError {
    pub data: Vec<Vec<f64>>,
}

impl Loss for SquaredError {
    fn term<T: Scalar>(&self, index: usize, _t: f64, u: &[T]) -> T {
        u.iter()
            .zip(&self.data[index])
            .fold(T::zero(), |acc, (x, &d)| {
                let r = x.clone() - d;
                acc + r.clone() * r * 0.5
            })
    }
}
