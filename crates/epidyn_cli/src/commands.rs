use crate::cli::{EstimateArgs, ModelSource, OverrideArgs, RunArgs, SolverArgs};
use crate::error::CliExitCode;
use crate::render;
use anyhow::{bail, Context, Result};
use epidyn_core::integrate::run_prepared;
use epidyn_core::plot::{AxisLabels, PlotDocument};
use epidyn_core::{
    estimate as fit, model_file, models, EstimationConfig, InputError, ModelDefinition,
    ObservedData, OutputMode, OverrideMode, Overrides, SimulationRequest, SolverSettings,
    Trajectory,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{error, info};

pub fn load_model(source: &ModelSource) -> Result<ModelDefinition> {
    match (&source.model, &source.model_file) {
        (_, Some(path)) => model_file::load(path),
        (Some(name), None) => models::lookup(name).ok_or_else(|| {
            InputError::UnknownName {
                kind: "model",
                name: name.clone(),
            }
            .into()
        }),
        (None, None) => bail!("no model given; pass a model name or --model-file"),
    }
}

/// Solver settings from `--config`, then individual flags on top.
pub fn solver_settings(args: &SolverArgs) -> Result<SolverSettings> {
    let mut settings = match &args.config {
        Some(path) => SolverSettings::load(path)?,
        None => SolverSettings::default(),
    };
    if let Some(method) = args.method {
        settings.method = method;
    }
    if let Some(rtol) = args.rtol {
        settings.rtol = rtol;
    }
    if let Some(atol) = args.atol {
        settings.atol = atol;
    }
    Ok(settings)
}

/// Parsed `--params`, `--init` and the matching override mode.
fn overrides(args: &OverrideArgs) -> Result<(Overrides, Overrides, OverrideMode)> {
    let constants = Overrides::parse(&args.params).context("Invalid --params")?;
    let initial_state = Overrides::parse(&args.init).context("Invalid --init")?;
    let mode = if args.strict {
        OverrideMode::Strict
    } else {
        OverrideMode::Permissive
    };
    Ok((constants, initial_state, mode))
}

pub fn build_request(args: &RunArgs) -> Result<SimulationRequest> {
    let (constants, initial_state, override_mode) = overrides(&args.overrides)?;
    Ok(SimulationRequest {
        t0: args.st,
        t1: args.tf,
        dt: args.dt,
        constants,
        initial_state,
        override_mode,
        output: if args.csv {
            OutputMode::Tabular
        } else {
            OutputMode::Plot
        },
        solver: solver_settings(&args.solver)?,
    })
}

fn open_sink(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

/// Runs one simulation. Every input problem is reported before the output is
/// opened; a numeric failure is written in place of the data.
pub fn run(args: &RunArgs) -> Result<CliExitCode> {
    let model = load_model(&args.source)?;
    let request = build_request(args)?;
    if request.output == OutputMode::Plot {
        match &args.output {
            Some(path) => {
                render::format_for(path)?;
            }
            None => bail!("plot output requires --output <PATH> (or pass --csv)"),
        }
    }
    let prepared = request.prepare(&model)?;

    let trajectory = run_prepared(&model, &prepared, &request.solver)?;

    match request.output {
        OutputMode::Tabular => {
            let sink = open_sink(args.output.as_deref())?;
            trajectory
                .write_csv(sink)
                .context("Failed to write trajectory")?;
        }
        OutputMode::Plot => match (&trajectory, &args.output) {
            (Trajectory::Success(samples), Some(path)) => {
                let labels = AxisLabels {
                    x: args.xlabel.clone(),
                    y: args.ylabel.clone(),
                };
                render::render(path, &PlotDocument::from_samples(samples, &labels))?;
            }
            (Trajectory::Failure(err), _) => eprintln!("{err}"),
            (Trajectory::Success(_), None) => bail!("plot output requires --output <PATH>"),
        },
    }

    if trajectory.is_success() {
        info!(
            model = model.name(),
            samples = prepared.grid.len(),
            "simulation finished"
        );
        Ok(CliExitCode::Success)
    } else {
        Ok(CliExitCode::NumericFailure)
    }
}

/// Fits the bounded constants to the observed data and prints the result.
/// The first line holds the fitted values in `--params` form.
pub fn estimate(args: &EstimateArgs, out: &mut impl Write) -> Result<CliExitCode> {
    let model = load_model(&args.source)?;
    let data = ObservedData::load(&args.data)?;
    let mut config = EstimationConfig::load(&args.bounds)?;
    if let Some(seed) = args.seed {
        config.genetic.seed = seed;
    }
    let (constants, initial_state, override_mode) = overrides(&args.overrides)?;
    let t1 = match args.tf {
        Some(tf) => tf,
        None => data.last_time().context("observed data has no rows")?,
    };
    let request = SimulationRequest {
        t0: args.st,
        t1,
        dt: args.dt,
        constants,
        initial_state,
        override_mode,
        output: OutputMode::Tabular,
        solver: solver_settings(&args.solver)?,
    };

    let report = match fit(&model, &request, &data, &config) {
        Ok(report) => report,
        Err(InputError::NoFeasibleCandidate) => {
            error!(model = model.name(), "no candidate integrated");
            eprintln!("{}", InputError::NoFeasibleCandidate);
            return Ok(CliExitCode::NumericFailure);
        }
        Err(err) => return Err(err.into()),
    };

    writeln!(out, "{}", report.overrides_line())?;
    writeln!(out, "rms = {}", report.rms)?;
    writeln!(out, "evaluations = {}", report.evaluations)?;
    Ok(CliExitCode::Success)
}

pub fn list(out: &mut impl Write) -> Result<CliExitCode> {
    for name in models::names() {
        writeln!(out, "{name}")?;
    }
    Ok(CliExitCode::Success)
}

pub fn describe(source: &ModelSource, out: &mut impl Write) -> Result<CliExitCode> {
    let model = load_model(source)?;
    writeln!(out, "{}", model.name())?;
    writeln!(out, "variables:")?;
    for (name, value) in model.variables().entries() {
        writeln!(out, "  {name} = {value}")?;
    }
    writeln!(out, "constants:")?;
    for (name, value) in model.constants().entries() {
        writeln!(out, "  {name} = {value}")?;
    }
    Ok(CliExitCode::Success)
}
