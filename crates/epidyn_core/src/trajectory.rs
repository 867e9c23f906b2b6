use crate::error::NumericError;
use crate::solvers::IntegrationStats;
use nalgebra::DVector;
use std::io::{self, Write};

pub type State = DVector<f64>;

/// Sampled solution of a successful integration.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub variables: Vec<String>,
    pub times: Vec<f64>,
    pub states: Vec<State>,
    pub stats: IntegrationStats,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Values of one variable across all samples.
    pub fn series(&self, idx: usize) -> Vec<f64> {
        self.states.iter().map(|state| state[idx]).collect()
    }
}

/// Result of one integration request. Callers must check the outcome before
/// reading samples; a failed run carries only a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Trajectory {
    Success(Samples),
    Failure(NumericError),
}

impl Trajectory {
    pub fn is_success(&self) -> bool {
        matches!(self, Trajectory::Success(_))
    }

    pub fn samples(&self) -> Option<&Samples> {
        match self {
            Trajectory::Success(samples) => Some(samples),
            Trajectory::Failure(_) => None,
        }
    }

    /// The solver's diagnostic for a failed run.
    pub fn message(&self) -> Option<String> {
        match self {
            Trajectory::Success(_) => None,
            Trajectory::Failure(err) => Some(err.to_string()),
        }
    }

    /// Writes the trajectory as comma-separated rows with 4-decimal values,
    /// or only the diagnostic message when the run failed.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        match self {
            Trajectory::Success(samples) => {
                write!(out, "t")?;
                for name in &samples.variables {
                    write!(out, ",{name}")?;
                }
                writeln!(out)?;

                for (t, state) in samples.times.iter().zip(&samples.states) {
                    write!(out, "{t:.4}")?;
                    for value in state.iter() {
                        write!(out, ",{value:.4}")?;
                    }
                    writeln!(out)?;
                }
            }
            Trajectory::Failure(err) => writeln!(out, "{err}")?,
        }
        out.flush()
    }

    pub fn to_csv_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_csv(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}
