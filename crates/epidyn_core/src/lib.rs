pub mod equation_engine;
pub mod error;
pub mod estimate;
pub mod functions;
pub mod genetic;
pub mod integrate;
pub mod model;
pub mod model_file;
pub mod models;
pub mod observed;
pub mod params;
pub mod plot;
pub mod settings;
pub mod solvers;
/// The `epidyn_core` crate is the simulation engine behind the `epidyn` CLI.
/// It integrates compartment models (named state variables, named constants,
/// a rate function) over a regular time grid and serializes the result.
///
/// Key components:
/// - **Model**: `ModelDefinition` and the `compartment_model!` macro, which derives names, initial values and rate order from one declaration.
/// - **Overrides**: sparse `name=value` replacement of constants and initial values.
/// - **Integration**: Dormand–Prince 5(4) with dense output, plus fixed-step RK4 and Tsit5.
/// - **Equation Engine**: bytecode VM for models loaded from TOML equation files.
/// - **Trajectory**: success/failure outcome, CSV serialization and plot layout.
/// - **Estimation**: genetic search for constants that fit observed CSV data.
pub mod traits;
pub mod trajectory;

pub use error::{InputError, NumericError, ParseError};
pub use estimate::{estimate, EstimationConfig, EstimationReport};
pub use integrate::{simulate, OutputMode, SimulationRequest, TimeGrid};
pub use model::{Declaration, ModelDefinition};
pub use observed::ObservedData;
pub use params::{OverrideMode, Overrides};
pub use settings::{Method, SolverSettings};
pub use trajectory::Trajectory;
