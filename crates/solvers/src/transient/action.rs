/// Control actions supported by the integrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop the integrator early and return the solution so far.
    StopEarly,
}
