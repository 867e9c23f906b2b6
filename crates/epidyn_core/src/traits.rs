use crate::error::NumericError;

/// Represents a continuous-time dynamical system `dx/dt = f(t, x)`.
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    ///
    /// Numeric faults (division by zero, non-finite rates) are reported
    /// instead of being written into `out`.
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<(), NumericError>;
}

/// A trait for fixed-step solvers that can step a system forward.
pub trait Steppable {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    ///
    /// On error neither `t` nor `state` is guaranteed to be meaningful.
    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<(), NumericError>;
}
