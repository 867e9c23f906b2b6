use clap::{ArgAction, Args, Parser, Subcommand};
use epidyn_core::Method;
use std::path::PathBuf;

/// Population dynamics simulator for compartment models.
#[derive(Parser, Debug)]
#[command(name = "epidyn")]
#[command(version)]
#[command(about = "Integrate compartment models and write their trajectories")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Integrate a model and write its trajectory as CSV or a plot
    Run(RunArgs),
    /// List the built-in models
    List,
    /// Show a model's variables and constants in declared order
    Describe(ModelSource),
    /// Fit bounded constants of a model to observed data
    Estimate(EstimateArgs),
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct ModelSource {
    /// Built-in model name (see `epidyn list`)
    pub model: Option<String>,

    /// TOML equation file declaring the model
    #[arg(long, value_name = "PATH")]
    pub model_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: ModelSource,

    /// Start time
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub st: f64,

    /// End time
    #[arg(long, default_value_t = 50.0, allow_negative_numbers = true)]
    pub tf: f64,

    /// Sampling step
    #[arg(long, default_value_t = 0.01)]
    pub dt: f64,

    /// Output path (stdout when absent; required for plots)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write CSV instead of a plot
    #[arg(long, overrides_with = "no_csv")]
    pub csv: bool,

    /// Write a plot (the default)
    #[arg(long = "no-csv", overrides_with = "csv")]
    pub no_csv: bool,

    /// Label of the time axis
    #[arg(long, default_value = "time (days)")]
    pub xlabel: String,

    /// Label of the value axis
    #[arg(long, default_value = "conc/ml")]
    pub ylabel: String,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    #[command(flatten)]
    pub solver: SolverArgs,
}

#[derive(Args, Debug, Clone)]
pub struct OverrideArgs {
    /// Constant overrides, e.g. "g=3 bd=0.02"
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub params: String,

    /// Initial value overrides, e.g. "S=500 I=5"
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub init: String,

    /// Reject overrides naming undeclared constants or variables
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    /// Integration method: dopri5 (rk45), rk4 or tsit5
    #[arg(long)]
    pub method: Option<Method>,

    /// Relative tolerance of the adaptive method
    #[arg(long)]
    pub rtol: Option<f64>,

    /// Absolute tolerance of the adaptive method
    #[arg(long)]
    pub atol: Option<f64>,

    /// TOML file with solver settings; flags take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub source: ModelSource,

    /// CSV file with a time column followed by observed variables
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,

    /// TOML file with `[[bound]]` entries and optional `[genetic]` settings
    #[arg(long, value_name = "PATH")]
    pub bounds: PathBuf,

    /// Start time
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub st: f64,

    /// End time (defaults to the last observation)
    #[arg(long, allow_negative_numbers = true)]
    pub tf: Option<f64>,

    /// Sampling step; every observation time must lie on the grid
    #[arg(long, default_value_t = 0.01)]
    pub dt: f64,

    /// Override the seed of the genetic search
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    #[command(flatten)]
    pub solver: SolverArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).expect("arguments should parse");
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn run_defaults() {
        let args = run_args(&["epidyn", "run", "sir"]);
        assert_eq!(args.source.model.as_deref(), Some("sir"));
        assert_eq!((args.st, args.tf, args.dt), (0.0, 50.0, 0.01));
        assert!(!args.csv);
        assert_eq!(args.xlabel, "time (days)");
        assert_eq!(args.ylabel, "conc/ml");
        assert_eq!(args.overrides.params, "");
        assert!(args.output.is_none());
        assert!(args.solver.method.is_none());
    }

    #[test]
    fn run_reads_every_flag() {
        let args = run_args(&[
            "epidyn", "run", "sir", "--st", "-1", "--tf", "2", "--dt", "0.5", "-o", "out.csv",
            "--csv", "--params", "g=3 bd=0.02", "--init", "S=500", "--strict", "--method",
            "rk4", "--rtol", "1e-6",
        ]);
        assert_eq!((args.st, args.tf, args.dt), (-1.0, 2.0, 0.5));
        assert_eq!(args.output, Some(PathBuf::from("out.csv")));
        assert!(args.csv);
        assert_eq!(args.overrides.params, "g=3 bd=0.02");
        assert_eq!(args.overrides.init, "S=500");
        assert!(args.overrides.strict);
        assert_eq!(args.solver.method, Some(Method::Rk4));
        assert_eq!(args.solver.rtol, Some(1e-6));
    }

    #[test]
    fn last_csv_flag_wins() {
        assert!(!run_args(&["epidyn", "run", "sir", "--csv", "--no-csv"]).csv);
        assert!(run_args(&["epidyn", "run", "sir", "--no-csv", "--csv"]).csv);
    }

    #[test]
    fn model_name_and_file_are_exclusive() {
        assert!(Cli::try_parse_from(["epidyn", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["epidyn", "run", "sir", "--model-file", "m.toml"]).is_err()
        );
        let args = run_args(&["epidyn", "run", "--model-file", "m.toml"]);
        assert_eq!(args.source.model_file, Some(PathBuf::from("m.toml")));
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(Cli::try_parse_from(["epidyn", "run", "sir", "--method", "euler"]).is_err());
    }

    #[test]
    fn estimate_reads_data_and_bounds() {
        let cli = Cli::try_parse_from([
            "epidyn", "estimate", "competition", "--data", "obs.csv", "--bounds", "fit.toml",
            "--dt", "0.5", "--seed", "3", "--params", "w11=0.02", "--method", "tsit5",
        ])
        .unwrap();
        let Commands::Estimate(args) = cli.command else {
            panic!("expected estimate");
        };
        assert_eq!(args.source.model.as_deref(), Some("competition"));
        assert_eq!(args.data, PathBuf::from("obs.csv"));
        assert_eq!(args.bounds, PathBuf::from("fit.toml"));
        assert_eq!((args.st, args.tf, args.dt), (0.0, None, 0.5));
        assert_eq!(args.seed, Some(3));
        assert_eq!(args.overrides.params, "w11=0.02");
        assert_eq!(args.solver.method, Some(Method::Tsit5));

        assert!(Cli::try_parse_from(["epidyn", "estimate", "sir", "--data", "obs.csv"]).is_err());
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["epidyn", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::List));
    }
}
