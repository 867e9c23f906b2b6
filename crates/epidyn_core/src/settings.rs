use crate::error::InputError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Integration scheme used by the integrator adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Adaptive Dormand–Prince 5(4) with dense output.
    #[default]
    Dopri5,
    /// Classic fixed-step Runge–Kutta 4, one step per sample interval.
    Rk4,
    /// Fixed-step Tsitouras 5, one step per sample interval.
    Tsit5,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Dopri5 => "dopri5",
            Method::Rk4 => "rk4",
            Method::Tsit5 => "tsit5",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dopri5" | "rk45" => Ok(Method::Dopri5),
            "rk4" => Ok(Method::Rk4),
            "tsit5" => Ok(Method::Tsit5),
            _ => Err(InputError::UnknownName {
                kind: "integration method",
                name: s.to_string(),
            }),
        }
    }
}

/// Solver configuration. Defaults follow the usual RK45 conventions
/// (`rtol = 1e-3`, `atol = 1e-6`, unbounded step size).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub method: Method,
    pub rtol: f64,
    pub atol: f64,
    pub max_step: f64,
    /// Initial step for the adaptive method. Chosen automatically when absent.
    pub first_step: Option<f64>,
    /// Upper bound on solver steps (accepted and rejected) for one run.
    pub max_steps: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            method: Method::Dopri5,
            rtol: 1e-3,
            atol: 1e-6,
            max_step: f64::INFINITY,
            first_step: None,
            max_steps: 1_000_000,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), InputError> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(InputError::InvalidSettings(
                "rtol must be finite and positive".into(),
            ));
        }
        if !self.atol.is_finite() || self.atol < 0.0 {
            return Err(InputError::InvalidSettings(
                "atol must be finite and non-negative".into(),
            ));
        }
        if self.max_step.is_nan() || self.max_step <= 0.0 {
            return Err(InputError::InvalidSettings(
                "max_step must be positive".into(),
            ));
        }
        if let Some(h) = self.first_step {
            if !h.is_finite() || h <= 0.0 {
                return Err(InputError::InvalidSettings(
                    "first_step must be finite and positive".into(),
                ));
            }
        }
        if self.max_steps == 0 {
            return Err(InputError::InvalidSettings(
                "max_steps must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: SolverSettings =
            toml::from_str(text).context("Failed to parse solver settings.")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read solver settings from {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid solver settings in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = SolverSettings::from_toml_str("rtol = 1e-8\nmethod = \"tsit5\"\n")
            .expect("settings should parse");
        assert_eq!(settings.method, Method::Tsit5);
        assert_eq!(settings.rtol, 1e-8);
        assert_eq!(settings.atol, 1e-6);
        assert!(settings.max_step.is_infinite());
        assert_eq!(settings.first_step, None);
    }

    #[test]
    fn rejects_non_positive_tolerances() {
        let err = SolverSettings::from_toml_str("rtol = 0.0").expect_err("rtol = 0 is invalid");
        assert!(format!("{err:#}").contains("rtol"));

        let settings = SolverSettings {
            max_steps: 0,
            ..SolverSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn method_parses_aliases() {
        assert_eq!("RK45".parse::<Method>().unwrap(), Method::Dopri5);
        assert_eq!("rk4".parse::<Method>().unwrap(), Method::Rk4);
        assert!("euler".parse::<Method>().is_err());
    }
}
