//! Fitting model constants to observed data.
//!
//! A genetic search varies the bounded constants and scores each candidate
//! by the RMS error between its trajectory and the observations at matching
//! times. The estimation file lists the bounds and, optionally, the search
//! settings:
//!
//! ```toml
//! [genetic]
//! population = 40
//! generations = 60
//! seed = 7
//!
//! [[bound]]
//! name = "r1"
//! min = 0.1
//! max = 1.5
//! ```

use crate::error::InputError;
use crate::genetic::{Bound, GeneticAlgorithm, GeneticSettings};
use crate::integrate::{integrate, PreparedRun, SimulationRequest};
use crate::model::{Declaration, ModelDefinition};
use crate::observed::ObservedData;
use crate::settings::SolverSettings;
use crate::trajectory::State;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, trace};

/// Fitness of a candidate whose integration fails.
pub const FAILURE_PENALTY: f64 = f64::INFINITY;

// Observation times must sit this close to a grid point.
const TIME_MATCH_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimationConfig {
    #[serde(default)]
    pub genetic: GeneticSettings,
    #[serde(rename = "bound")]
    pub bounds: Vec<Bound>,
}

impl EstimationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EstimationConfig =
            toml::from_str(text).context("Failed to parse estimation settings.")?;
        config.genetic.validate()?;
        for bound in &config.bounds {
            bound.validate()?;
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read estimation settings from {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid estimation settings in {}", path.display()))
    }
}

/// A model, a grid and a data set, resolved into index tables so each
/// candidate costs one integration plus a table walk.
pub struct Estimation<'a> {
    model: &'a ModelDefinition,
    data: &'a ObservedData,
    run: PreparedRun,
    solver: SolverSettings,
    /// Constant index per bound.
    targets: Vec<usize>,
    /// Variable index per data column.
    columns: Vec<usize>,
    /// Grid index per data row.
    samples: Vec<usize>,
}

impl<'a> Estimation<'a> {
    pub fn new(
        model: &'a ModelDefinition,
        request: &SimulationRequest,
        data: &'a ObservedData,
        bounds: &[Bound],
    ) -> Result<Self, InputError> {
        let run = request.prepare(model)?;

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(bounds.len());
        for bound in bounds {
            if !seen.insert(bound.name.as_str()) {
                return Err(InputError::DuplicateName {
                    kind: "bound",
                    name: bound.name.clone(),
                });
            }
            let idx = run.constants.position(&bound.name).ok_or_else(|| {
                InputError::UnknownName {
                    kind: "constant",
                    name: bound.name.clone(),
                }
            })?;
            targets.push(idx);
        }

        let columns = data
            .columns
            .iter()
            .map(|name| {
                model
                    .variables()
                    .position(name)
                    .ok_or_else(|| InputError::UnknownName {
                        kind: "variable",
                        name: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let points = run.grid.points();
        let samples = data
            .times
            .iter()
            .map(|&t| {
                let idx = ((t - run.grid.start()) / run.grid.step()).round();
                let on_grid = idx >= 0.0
                    && (idx as usize) < points.len()
                    && (points[idx as usize] - t).abs() <= TIME_MATCH_TOLERANCE;
                if on_grid {
                    Ok(idx as usize)
                } else {
                    Err(InputError::InvalidEstimation(format!(
                        "observation at t = {t} is not a point of the simulation grid"
                    )))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            model,
            data,
            run,
            solver: request.solver,
            targets,
            columns,
            samples,
        })
    }

    /// The request's constants with `values` assigned to the bounded ones.
    pub fn constants_with(&self, values: &[f64]) -> Declaration {
        let mut constants = self.run.constants.clone();
        for (&idx, &value) in self.targets.iter().zip(values) {
            constants.set_at(idx, value);
        }
        constants
    }

    /// RMS error over every observed value, or [`FAILURE_PENALTY`] when the
    /// candidate cannot be integrated.
    pub fn fitness(&self, values: &[f64]) -> f64 {
        let constants = self.constants_with(values);
        let Ok(system) = self.model.bind(&constants) else {
            return FAILURE_PENALTY;
        };
        let y0 = self.run.initial_state.values();
        match integrate(&system, &y0, &self.run.grid, &self.solver) {
            Ok((states, _)) => self.rms(&states),
            Err(err) => {
                trace!(?values, %err, "candidate failed to integrate");
                FAILURE_PENALTY
            }
        }
    }

    fn rms(&self, states: &[State]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (row, &sample) in self.data.rows.iter().zip(&self.samples) {
            for (&observed, &var) in row.iter().zip(&self.columns) {
                let diff = states[sample][var] - observed;
                sum += diff * diff;
                count += 1;
            }
        }
        let rms = (sum / count as f64).sqrt();
        if rms.is_finite() {
            rms
        } else {
            FAILURE_PENALTY
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimationReport {
    /// Full constant set with the best candidate applied.
    pub constants: Declaration,
    /// Bounded constants and their fitted values, in bound order.
    pub fitted: Vec<(String, f64)>,
    pub rms: f64,
    /// Best RMS of the initial population, then after every generation.
    pub history: Vec<f64>,
    pub evaluations: usize,
}

impl EstimationReport {
    /// The fitted values as `name=value` tokens, usable as `--params`.
    pub fn overrides_line(&self) -> String {
        self.fitted
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Searches the bounded constants of `model` for the best fit to `data`.
pub fn estimate(
    model: &ModelDefinition,
    request: &SimulationRequest,
    data: &ObservedData,
    config: &EstimationConfig,
) -> Result<EstimationReport, InputError> {
    let problem = Estimation::new(model, request, data, &config.bounds)?;
    let mut ga = GeneticAlgorithm::new(config.bounds.clone(), config.genetic)?;
    info!(
        model = model.name(),
        parameters = config.bounds.len(),
        observations = data.len(),
        population = config.genetic.population,
        generations = config.genetic.generations,
        "estimating constants"
    );

    let outcome = ga.run(|values| problem.fitness(values));
    if !outcome.best.fitness.is_finite() {
        return Err(InputError::NoFeasibleCandidate);
    }
    info!(
        rms = outcome.best.fitness,
        evaluations = outcome.evaluations,
        "estimation finished"
    );

    Ok(EstimationReport {
        constants: problem.constants_with(&outcome.best.genes),
        fitted: config
            .bounds
            .iter()
            .zip(&outcome.best.genes)
            .map(|(bound, &value)| (bound.name.clone(), value))
            .collect(),
        rms: outcome.best.fitness,
        history: outcome.history,
        evaluations: outcome.evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::simulate;
    use crate::models;
    use crate::params::Overrides;

    /// Competition trajectories at t = 0..=20 for the given overrides.
    fn competition_data(overrides: &str) -> ObservedData {
        let request = SimulationRequest {
            t1: 20.0,
            dt: 1.0,
            constants: Overrides::parse(overrides).unwrap(),
            ..SimulationRequest::default()
        };
        let samples = simulate(&models::competition(), &request)
            .unwrap()
            .samples()
            .expect("competition integrates")
            .clone();
        ObservedData {
            columns: vec!["N1".into(), "N2".into()],
            times: samples.times.clone(),
            rows: samples.states.iter().map(|s| s.iter().copied().collect()).collect(),
        }
    }

    fn fit_request() -> SimulationRequest {
        SimulationRequest {
            t1: 20.0,
            dt: 1.0,
            ..SimulationRequest::default()
        }
    }

    #[test]
    fn recovers_growth_rates_from_synthetic_data() {
        let model = models::competition();
        let data = competition_data("r1=0.7 r2=0.3");
        let config = EstimationConfig {
            genetic: GeneticSettings::default(),
            bounds: vec![Bound::new("r1", 0.1, 1.5), Bound::new("r2", 0.1, 1.5)],
        };

        let report = estimate(&model, &fit_request(), &data, &config).unwrap();
        let r1 = report.constants.get("r1").unwrap();
        let r2 = report.constants.get("r2").unwrap();
        assert!((r1 - 0.7).abs() < 0.05, "r1 = {r1}");
        assert!((r2 - 0.3).abs() < 0.05, "r2 = {r2}");
        assert_eq!(report.constants.get("w11"), Some(0.01));
        assert_eq!(report.fitted[0].0, "r1");
        assert!(report.rms <= report.history[0]);
        assert!(report.overrides_line().starts_with("r1="));
    }

    #[test]
    fn fitness_is_zero_at_the_generating_constants() {
        let model = models::competition();
        let data = competition_data("r2=0.3");
        let problem =
            Estimation::new(&model, &fit_request(), &data, &[Bound::new("r2", 0.1, 1.0)]).unwrap();
        assert!(problem.fitness(&[0.3]) < 1e-12);
        assert!(problem.fitness(&[0.6]) > 1.0);
    }

    #[test]
    fn subset_of_columns_and_rows_is_scored() {
        let model = models::competition();
        let mut data = competition_data("r1=0.7");
        data.columns = vec!["N2".into()];
        data.times = vec![2.0, 5.0];
        data.rows = vec![vec![data.rows[2][1]], vec![data.rows[5][1]]];
        let problem =
            Estimation::new(&model, &fit_request(), &data, &[Bound::new("r1", 0.1, 1.0)]).unwrap();
        assert!(problem.fitness(&[0.7]) < 1e-12);
    }

    #[test]
    fn failed_integration_scores_the_penalty() {
        let model = models::immune_regulation();
        let request = SimulationRequest {
            t1: 1.0,
            dt: 0.5,
            initial_state: Overrides::parse("AC=2").unwrap(),
            ..SimulationRequest::default()
        };
        let data = ObservedData {
            columns: vec!["TD".into()],
            times: vec![0.0, 1.0],
            rows: vec![vec![10.0], vec![9.0]],
        };
        let bounds = [Bound::new("alpha", -0.5, -0.5)];
        let problem = Estimation::new(&model, &request, &data, &bounds).unwrap();
        assert_eq!(problem.fitness(&[-0.5]), FAILURE_PENALTY);

        let config = EstimationConfig {
            genetic: GeneticSettings {
                population: 4,
                generations: 1,
                elite: 1,
                ..GeneticSettings::default()
            },
            bounds: bounds.to_vec(),
        };
        assert_eq!(
            estimate(&model, &request, &data, &config),
            Err(InputError::NoFeasibleCandidate)
        );
    }

    #[test]
    fn setup_errors_are_reported_before_searching() {
        let model = models::competition();
        let data = competition_data("");
        let request = fit_request();

        let err = Estimation::new(&model, &request, &data, &[Bound::new("gamma", 0.0, 1.0)]).err();
        assert_eq!(
            err,
            Some(InputError::UnknownName {
                kind: "constant",
                name: "gamma".into()
            })
        );

        let twice = [Bound::new("r1", 0.0, 1.0), Bound::new("r1", 0.0, 2.0)];
        let err = Estimation::new(&model, &request, &data, &twice).err();
        assert!(matches!(err, Some(InputError::DuplicateName { kind: "bound", .. })));

        let mut renamed = data.clone();
        renamed.columns[1] = "N3".into();
        let err = Estimation::new(&model, &request, &renamed, &[Bound::new("r1", 0.0, 1.0)]).err();
        assert!(matches!(err, Some(InputError::UnknownName { kind: "variable", .. })));

        let mut shifted = data.clone();
        shifted.times[3] = 3.5;
        let err = Estimation::new(&model, &request, &shifted, &[Bound::new("r1", 0.0, 1.0)]).err();
        assert!(matches!(err, Some(InputError::InvalidEstimation(_))));

        let short = SimulationRequest {
            t1: 10.0,
            ..fit_request()
        };
        let err = Estimation::new(&model, &short, &data, &[Bound::new("r1", 0.0, 1.0)]).err();
        assert!(matches!(err, Some(InputError::InvalidEstimation(_))));
    }

    #[test]
    fn config_reads_bounds_and_keeps_genetic_defaults() {
        let config = EstimationConfig::from_toml_str(
            "[genetic]\nseed = 9\n\n[[bound]]\nname = \"g\"\nmin = 1.0\nmax = 10.0\n",
        )
        .unwrap();
        assert_eq!(config.bounds, vec![Bound::new("g", 1.0, 10.0)]);
        assert_eq!(config.genetic.seed, 9);
        assert_eq!(config.genetic.population, GeneticSettings::default().population);

        assert!(EstimationConfig::from_toml_str("[[bound]]\nname = \"g\"\nmin = 2\nmax = 1\n").is_err());
        assert!(EstimationConfig::from_toml_str("[genetic]\npopulation = 1\n[[bound]]\nname = \"g\"\nmin = 0\nmax = 1\n").is_err());
        assert!(EstimationConfig::load(Path::new("/nonexistent/fit.toml")).is_err());
    }
}
