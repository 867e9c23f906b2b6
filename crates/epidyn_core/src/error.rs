use std::num::ParseFloatError;
use thiserror::Error;

/// Failures caused by the caller's request. These abort a run before any
/// integration happens or any output sink is opened.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("malformed override `{token}`: expected name=value")]
    MalformedOverride { token: String },
    #[error("invalid value in override `{token}`: {source}")]
    InvalidOverrideValue {
        token: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("unknown {kind} `{name}`")]
    UnknownName { kind: &'static str, name: String },
    #[error("duplicate {kind} `{name}`")]
    DuplicateName { kind: &'static str, name: String },
    #[error("invalid time span: {0}")]
    InvalidTimeSpan(String),
    #[error("invalid solver settings: {0}")]
    InvalidSettings(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid estimation setup: {0}")]
    InvalidEstimation(String),
    #[error("no candidate within the bounds integrated successfully")]
    NoFeasibleCandidate,
}

/// Failures detected at the integration boundary. They never escape as
/// panics; the integrator turns them into an unsuccessful trajectory.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NumericError {
    #[error("division by zero in `{site}`")]
    DivisionByZero { site: &'static str },
    #[error("derivative of `{variable}` is not finite at t = {t}")]
    NonFiniteDerivative { variable: String, t: f64 },
    #[error("state is not finite at t = {t}")]
    NonFiniteState { t: f64 },
    #[error("Required step size is less than spacing between numbers (t = {t}).")]
    StepSizeTooSmall { t: f64 },
    #[error("Step budget of {max_steps} steps exhausted at t = {t}.")]
    MaxStepsExceeded { max_steps: usize, t: f64 },
    #[error("compiled expression calls function #{index}, which is not registered")]
    UnknownFunction { index: usize },
}

/// Syntax and symbol errors raised while compiling rate expressions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),
    #[error("expected `{0}`")]
    Expected(&'static str),
    #[error("unexpected token")]
    UnexpectedToken,
    #[error("trailing input after expression")]
    TrailingInput,
    #[error("unknown variable or constant `{0}`")]
    UnknownSymbol(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("function `{name}` takes {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },
}
