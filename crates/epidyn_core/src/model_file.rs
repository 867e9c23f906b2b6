//! Models declared in TOML equation files.
//!
//! ```toml
//! name = "decay"
//!
//! [[variable]]
//! name = "x"
//! initial = 1.0
//! rate = "-k * x"
//!
//! [[constant]]
//! name = "k"
//! value = 0.5
//! ```

use crate::equation_engine::{compile_source, CompiledRates, Compiler};
use crate::functions::FunctionRegistry;
use crate::model::{Declaration, ModelDefinition};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::rc::Rc;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFile {
    pub name: String,
    #[serde(rename = "variable", default)]
    pub variables: Vec<VariableEntry>,
    #[serde(rename = "constant", default)]
    pub constants: Vec<ConstantEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableEntry {
    pub name: String,
    pub initial: f64,
    pub rate: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantEntry {
    pub name: String,
    pub value: f64,
}

impl ModelFile {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse model file.")
    }

    /// Compiles every rate expression against the declared names and builds
    /// the model definition.
    pub fn compile(&self, functions: FunctionRegistry) -> Result<ModelDefinition> {
        let variables = Declaration::new(
            "variable",
            self.variables
                .iter()
                .map(|v| (v.name.clone(), v.initial))
                .collect(),
        )?;
        let constants = Declaration::new(
            "constant",
            self.constants
                .iter()
                .map(|c| (c.name.clone(), c.value))
                .collect(),
        )?;

        let var_names: Vec<&str> = variables.names().collect();
        let param_names: Vec<&str> = constants.names().collect();
        let compiler = Compiler::new(&var_names, &param_names, &functions);
        let equations = self
            .variables
            .iter()
            .map(|entry| {
                compile_source(&compiler, &entry.rate)
                    .with_context(|| format!("Invalid rate for `{}`: {}", entry.name, entry.rate))
            })
            .collect::<Result<Vec<_>>>()?;
        let rates = CompiledRates::from_equations(equations, functions);

        Ok(ModelDefinition::new(
            self.name.clone(),
            variables,
            constants,
            Rc::new(rates),
        )?)
    }
}

/// Reads and compiles an equation file with the default function registry.
pub fn load(path: &Path) -> Result<ModelDefinition> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read model file {}", path.display()))?;
    let file = ModelFile::from_toml_str(&text)
        .with_context(|| format!("Invalid model file {}", path.display()))?;
    file.compile(FunctionRegistry::default())
        .with_context(|| format!("Failed to build model from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected `{needle}` in error, got: {message}"
        );
    }

    const SIR: &str = r#"
name = "sir_file"

[[variable]]
name = "E"
initial = 0.0
rate = "p*I - c*E"

[[variable]]
name = "I"
initial = 1.0
rate = "bd*S*I + be*S*E - g*I - n*I"

[[variable]]
name = "R"
initial = 0.0
rate = "g*I - n*R"

[[variable]]
name = "S"
initial = 1000.0
rate = "b - bd*S*I - be*S*E - n*S"

[[constant]]
name = "b"
value = 100.0
[[constant]]
name = "bd"
value = 0.01
[[constant]]
name = "be"
value = 0.01
[[constant]]
name = "c"
value = 1.0
[[constant]]
name = "g"
value = 6.0
[[constant]]
name = "n"
value = 0.1
[[constant]]
name = "p"
value = 0.1
"#;

    #[test]
    fn file_model_matches_builtin_rates() {
        let file_model = ModelFile::from_toml_str(SIR)
            .and_then(|f| f.compile(FunctionRegistry::default()))
            .expect("model compiles");
        let builtin = models::sir();

        assert_eq!(file_model.name(), "sir_file");
        assert_eq!(file_model.variable_names(), builtin.variable_names());
        assert_eq!(file_model.constants(), builtin.constants());

        let state = [3.0, 7.0, 2.0, 900.0];
        let constants = builtin.constants().values();
        let a = file_model.rates_at(0.0, &state, &constants).unwrap();
        let b = builtin.rates_at(0.0, &state, &constants).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-9, "{x} vs {y}");
        }
    }

    #[test]
    fn registry_functions_are_callable_by_name() {
        let text = r#"
name = "damped"
[[variable]]
name = "x"
initial = 2.0
rate = "inhibition(x, a, x) - sin(t)"
[[constant]]
name = "a"
value = 0.5
"#;
        let model = ModelFile::from_toml_str(text)
            .and_then(|f| f.compile(FunctionRegistry::default()))
            .unwrap();
        let rates = model.rates_at(0.0, &[2.0], &[0.5]).unwrap();
        assert!((rates[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_symbol_names_the_variable() {
        let text = r#"
name = "broken"
[[variable]]
name = "x"
initial = 1.0
rate = "-k * x"
"#;
        let result = ModelFile::from_toml_str(text).and_then(|f| f.compile(FunctionRegistry::default()));
        assert_err_contains(result, "Invalid rate for `x`");
        let result = ModelFile::from_toml_str(text).and_then(|f| f.compile(FunctionRegistry::default()));
        assert_err_contains(result, "unknown variable or constant `k`");
    }

    #[test]
    fn error_names_the_later_variable_and_keeps_order() {
        let text = r#"
name = "pair"
[[variable]]
name = "x"
initial = 1.0
rate = "y"
[[variable]]
name = "y"
initial = 2.0
rate = "x * (1 +"
"#;
        let result = ModelFile::from_toml_str(text).and_then(|f| f.compile(FunctionRegistry::default()));
        assert_err_contains(result, "Invalid rate for `y`: x * (1 +");

        let fixed = text.replace("x * (1 +", "-x");
        let model = ModelFile::from_toml_str(&fixed)
            .and_then(|f| f.compile(FunctionRegistry::default()))
            .unwrap();
        let rates = model.rates_at(0.0, &[1.0, 2.0], &[]).unwrap();
        assert_eq!(rates, vec![2.0, -1.0]);
    }

    #[test]
    fn rejects_duplicates_and_empty_models() {
        let duplicate = r#"
name = "dup"
[[variable]]
name = "x"
initial = 1.0
rate = "x"
[[constant]]
name = "x"
value = 2.0
"#;
        let result = ModelFile::from_toml_str(duplicate).and_then(|f| f.compile(FunctionRegistry::default()));
        assert_err_contains(result, "duplicate symbol `x`");

        let result = ModelFile::from_toml_str("name = \"empty\"")
            .and_then(|f| f.compile(FunctionRegistry::default()));
        assert_err_contains(result, "dimension mismatch");
    }

    #[test]
    fn load_reports_missing_file() {
        let result = load(Path::new("/nonexistent/model.toml"));
        assert_err_contains(result, "Failed to read model file");
    }
}
