use crate::error::{InputError, NumericError};
use crate::model::{Declaration, ModelDefinition};
use crate::params::{OverrideMode, Overrides};
use crate::settings::{Method, SolverSettings};
use crate::solvers::{DormandPrince, IntegrationStats, Tsit5, RK4};
use crate::traits::{DynamicalSystem, Steppable};
use crate::trajectory::{Samples, State, Trajectory};
use nalgebra::DVector;
use tracing::{debug, error};

// Relative slack used when deciding whether (t1 - t0) / dt is a whole number.
const GRID_TOLERANCE: f64 = 1e-9;

/// Upper bound on grid points; one sample row per point is kept in memory.
pub const MAX_SAMPLES: usize = 10_000_000;

/// Regular sampling grid `t0, t0 + dt, ...` covering `t1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    t0: f64,
    t1: f64,
    dt: f64,
    points: Vec<f64>,
}

impl TimeGrid {
    /// Builds the grid. When `(t1 - t0) / dt` is not a whole number the grid
    /// is extended to the next multiple of `dt`, so the last point is never
    /// before `t1`.
    pub fn new(t0: f64, t1: f64, dt: f64) -> Result<Self, InputError> {
        if !t0.is_finite() || !t1.is_finite() {
            return Err(InputError::InvalidTimeSpan(
                "start and end time must be finite".into(),
            ));
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(InputError::InvalidTimeSpan(format!(
                "step must be positive, got {dt}"
            )));
        }
        if t1 < t0 {
            return Err(InputError::InvalidTimeSpan(format!(
                "end time {t1} is before start time {t0}"
            )));
        }

        let ratio = (t1 - t0) / dt;
        let rounded = ratio.round();
        let intervals = if (ratio - rounded).abs() <= GRID_TOLERANCE * rounded.max(1.0) {
            rounded
        } else {
            ratio.ceil()
        };
        if intervals >= MAX_SAMPLES as f64 {
            return Err(InputError::InvalidTimeSpan(format!(
                "{} samples requested, at most {MAX_SAMPLES} allowed; step is too small for the span",
                intervals + 1.0
            )));
        }
        let intervals = intervals as usize;

        let mut points: Vec<f64> = (0..=intervals).map(|i| t0 + i as f64 * dt).collect();
        if let Some(last) = points.last_mut() {
            if (*last - t1).abs() <= GRID_TOLERANCE * dt {
                *last = t1;
            }
        }

        Ok(Self { t0, t1, dt, points })
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> f64 {
        self.t0
    }

    pub fn step(&self) -> f64 {
        self.dt
    }

    /// Internal integration bound handed to the adaptive solver. It lies two
    /// steps past `t1` so the final sample is always inside the span.
    pub fn integration_bound(&self) -> f64 {
        self.t1 + 2.0 * self.dt
    }
}

/// Whether results go to a table or to a plot document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    Tabular,
    #[default]
    Plot,
}

/// One simulation invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    pub t0: f64,
    pub t1: f64,
    pub dt: f64,
    pub constants: Overrides,
    pub initial_state: Overrides,
    pub override_mode: OverrideMode,
    pub output: OutputMode,
    pub solver: SolverSettings,
}

impl Default for SimulationRequest {
    fn default() -> Self {
        Self {
            t0: 0.0,
            t1: 50.0,
            dt: 0.01,
            constants: Overrides::new(),
            initial_state: Overrides::new(),
            override_mode: OverrideMode::Permissive,
            output: OutputMode::Plot,
            solver: SolverSettings::default(),
        }
    }
}

/// Inputs resolved from a request before any integration happens.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub grid: TimeGrid,
    pub constants: Declaration,
    pub initial_state: Declaration,
}

impl SimulationRequest {
    /// Validates the request against `model`. Every input error surfaces
    /// here, so callers can fail before opening any output.
    pub fn prepare(&self, model: &ModelDefinition) -> Result<PreparedRun, InputError> {
        self.solver.validate()?;
        let grid = TimeGrid::new(self.t0, self.t1, self.dt)?;
        let constants = self.constants.apply(model.constants(), self.override_mode)?;
        let initial_state = self
            .initial_state
            .apply(model.variables(), self.override_mode)?;
        Ok(PreparedRun {
            grid,
            constants,
            initial_state,
        })
    }
}

/// Validates the request, then integrates `model` over the request's grid.
///
/// Input problems are returned as `Err`; numeric failures during
/// integration come back as [`Trajectory::Failure`].
pub fn simulate(
    model: &ModelDefinition,
    request: &SimulationRequest,
) -> Result<Trajectory, InputError> {
    let run = request.prepare(model)?;
    run_prepared(model, &run, &request.solver)
}

pub fn run_prepared(
    model: &ModelDefinition,
    run: &PreparedRun,
    settings: &SolverSettings,
) -> Result<Trajectory, InputError> {
    let system = model.bind(&run.constants)?;
    let y0 = run.initial_state.values();
    debug!(
        model = model.name(),
        samples = run.grid.len(),
        method = %settings.method,
        "integrating"
    );

    let outcome = integrate(&system, &y0, &run.grid, settings);
    let trajectory = match outcome {
        Ok((states, stats)) => {
            debug!(
                rhs_evaluations = stats.rhs_evaluations,
                accepted = stats.accepted_steps,
                rejected = stats.rejected_steps,
                "integration finished"
            );
            Trajectory::Success(Samples {
                variables: model.variable_names().into_iter().map(String::from).collect(),
                times: run.grid.points().to_vec(),
                states,
                stats,
            })
        }
        Err(err) => {
            error!(model = model.name(), %err, "integration failed");
            Trajectory::Failure(err)
        }
    };
    Ok(trajectory)
}

/// Integrates `system` from `y0` and samples it on `grid`.
pub fn integrate(
    system: &impl DynamicalSystem,
    y0: &[f64],
    grid: &TimeGrid,
    settings: &SolverSettings,
) -> Result<(Vec<State>, IntegrationStats), NumericError> {
    let dim = system.dimension();
    match settings.method {
        Method::Dopri5 => {
            let mut solver = DormandPrince::new(dim, *settings);
            let run = solver.integrate(
                system,
                grid.start(),
                y0,
                grid.integration_bound(),
                grid.points(),
            )?;
            if run.samples.len() != grid.len() {
                let t = grid.points()[run.samples.len().min(grid.len() - 1)];
                return Err(NumericError::StepSizeTooSmall { t });
            }
            Ok((run.samples, run.stats))
        }
        Method::Rk4 => fixed_step(&mut RK4::new(dim), system, y0, grid, settings),
        Method::Tsit5 => fixed_step(&mut Tsit5::new(dim), system, y0, grid, settings),
    }
}

fn fixed_step(
    stepper: &mut impl Steppable,
    system: &impl DynamicalSystem,
    y0: &[f64],
    grid: &TimeGrid,
    settings: &SolverSettings,
) -> Result<(Vec<State>, IntegrationStats), NumericError> {
    let points = grid.points();
    let mut stats = IntegrationStats::default();
    let mut states = Vec::with_capacity(points.len());
    let mut state = y0.to_vec();

    // Evaluate at t0 so a fault there is reported like any other.
    let mut initial_rates = vec![0.0; y0.len()];
    system.apply(grid.start(), &state, &mut initial_rates)?;
    stats.rhs_evaluations += 1;
    states.push(DVector::from_column_slice(&state));

    let evaluations_per_step = match settings.method {
        Method::Tsit5 => 6,
        _ => 4,
    };
    for window in points.windows(2) {
        if stats.accepted_steps >= settings.max_steps {
            return Err(NumericError::MaxStepsExceeded {
                max_steps: settings.max_steps,
                t: window[0],
            });
        }
        let mut t = window[0];
        stepper.step(system, &mut t, &mut state, window[1] - window[0])?;
        stats.rhs_evaluations += evaluations_per_step;
        stats.accepted_steps += 1;
        if state.iter().any(|v| !v.is_finite()) {
            return Err(NumericError::NonFiniteState { t: window[1] });
        }
        states.push(DVector::from_column_slice(&state));
    }

    Ok((states, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;

    #[test]
    fn grid_for_fifty_days_at_a_tenth_has_501_points() {
        let grid = TimeGrid::new(0.0, 50.0, 0.1).unwrap();
        let points = grid.points();
        assert_eq!(points.len(), 501);
        assert_eq!(points[0], 0.0);
        assert_eq!(*points.last().unwrap(), 50.0);
        assert!(points.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn grid_rounds_partial_last_interval_up() {
        let grid = TimeGrid::new(0.0, 1.0, 0.3).unwrap();
        assert_eq!(grid.len(), 5);
        assert!((grid.points()[4] - 1.2).abs() < 1e-12);
        assert!(grid.integration_bound() > grid.points()[4]);
    }

    #[test]
    fn grid_with_equal_endpoints_has_one_point() {
        let grid = TimeGrid::new(2.0, 2.0, 0.5).unwrap();
        assert_eq!(grid.points(), &[2.0]);
    }

    #[test]
    fn grid_rejects_invalid_spans() {
        assert!(TimeGrid::new(0.0, 1.0, 0.0).is_err());
        assert!(TimeGrid::new(0.0, 1.0, -0.1).is_err());
        assert!(TimeGrid::new(1.0, 0.0, 0.1).is_err());
        assert!(TimeGrid::new(f64::NAN, 1.0, 0.1).is_err());
        assert!(TimeGrid::new(0.0, 1e300, 1e-300).is_err());
    }

    #[test]
    fn grid_caps_sample_count() {
        let limit = MAX_SAMPLES as f64;
        // One point past the cap, and the 4e9-point grid that a u32 bound would allow.
        for t1 in [limit, 4.0e9] {
            let err = TimeGrid::new(0.0, t1, 1.0).unwrap_err();
            assert!(matches!(err, InputError::InvalidTimeSpan(_)));
            assert!(err.to_string().contains("at most 10000000"), "{err}");
        }
        assert_eq!(TimeGrid::new(0.0, 1000.0, 1e-3).unwrap().len(), 1_000_001);
    }

    #[test]
    fn simulate_sir_unit_step_reproduces_initial_row() {
        let model = models::sir();
        let request = SimulationRequest {
            t0: 0.0,
            t1: 1.0,
            dt: 1.0,
            output: OutputMode::Tabular,
            ..SimulationRequest::default()
        };
        let trajectory = simulate(&model, &request).unwrap();
        let samples = trajectory.samples().expect("integration should succeed");
        assert_eq!(samples.times, vec![0.0, 1.0]);
        assert_eq!(samples.states[0].as_slice(), &[0.0, 1.0, 0.0, 1000.0]);

        let csv = trajectory.to_csv_string();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "t,E,I,R,S");
        assert_eq!(lines[1], "0.0000,0.0000,1.0000,0.0000,1000.0000");
    }

    #[test]
    fn zero_inhibition_denominator_fails_the_run() {
        let model = models::immune_regulation();
        let request = SimulationRequest {
            t1: 5.0,
            dt: 0.5,
            constants: Overrides::parse("alpha=-0.5").unwrap(),
            initial_state: Overrides::parse("AC=2").unwrap(),
            ..SimulationRequest::default()
        };
        let trajectory = simulate(&model, &request).unwrap();
        assert!(!trajectory.is_success());
        assert_eq!(
            trajectory,
            Trajectory::Failure(NumericError::DivisionByZero { site: "inhibition" })
        );
    }

    #[test]
    fn input_errors_surface_before_integration() {
        let model = models::sir();
        let request = SimulationRequest {
            dt: 0.0,
            ..SimulationRequest::default()
        };
        assert!(matches!(
            simulate(&model, &request),
            Err(InputError::InvalidTimeSpan(_))
        ));

        let request = SimulationRequest {
            constants: Overrides::parse("gamma=1").unwrap(),
            override_mode: OverrideMode::Strict,
            ..SimulationRequest::default()
        };
        assert!(matches!(
            simulate(&model, &request),
            Err(InputError::UnknownName { .. })
        ));
    }

    #[test]
    fn fixed_step_methods_agree_with_adaptive_solution() {
        let model = models::competition();
        let mut results = Vec::new();
        for method in [Method::Dopri5, Method::Rk4, Method::Tsit5] {
            let request = SimulationRequest {
                t1: 10.0,
                dt: 0.05,
                solver: SolverSettings {
                    method,
                    rtol: 1e-8,
                    atol: 1e-10,
                    ..SolverSettings::default()
                },
                ..SimulationRequest::default()
            };
            let trajectory = simulate(&model, &request).unwrap();
            let samples = trajectory.samples().expect("competition model integrates").clone();
            assert_eq!(samples.len(), 201);
            results.push(samples);
        }
        // Populations near 70 at t = 10: 1e-5 absolute is about 1e-7 relative.
        let reference = results[0].states.last().unwrap();
        for other in &results[1..] {
            let last = other.states.last().unwrap();
            assert!((last - reference).amax() < 1e-5);
        }
        let rk4 = results[1].states.last().unwrap();
        let tsit5 = results[2].states.last().unwrap();
        assert!((rk4 - tsit5).amax() < 1e-6);
    }

    #[test]
    fn fixed_step_reports_fault_at_start() {
        let model = models::immune_regulation();
        let request = SimulationRequest {
            t1: 1.0,
            dt: 0.5,
            constants: Overrides::parse("alpha=-0.5").unwrap(),
            initial_state: Overrides::parse("AC=2").unwrap(),
            solver: SolverSettings {
                method: Method::Rk4,
                ..SolverSettings::default()
            },
            ..SimulationRequest::default()
        };
        let trajectory = simulate(&model, &request).unwrap();
        assert!(!trajectory.is_success());
    }
}
