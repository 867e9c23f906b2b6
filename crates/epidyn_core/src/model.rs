use crate::error::{InputError, NumericError};
use crate::traits::DynamicalSystem;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// An ordered list of named values with unique names.
///
/// Used both for state variables (initial values) and for constants (default
/// values). The entry order is the positional contract used by rate functions.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    kind: &'static str,
    entries: Vec<(String, f64)>,
}

impl Declaration {
    /// `kind` names the entries in error messages ("variable", "constant").
    pub fn new(kind: &'static str, entries: Vec<(String, f64)>) -> Result<Self, InputError> {
        let mut seen = HashSet::new();
        for (name, _) in &entries {
            if !seen.insert(name.as_str()) {
                return Err(InputError::DuplicateName {
                    kind,
                    name: name.clone(),
                });
            }
        }
        Ok(Self { kind, entries })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Values in declaration order, ready to be passed positionally.
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, value)| *value).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.position(name).map(|idx| self.entries[idx].1)
    }

    pub(crate) fn set_at(&mut self, idx: usize, value: f64) {
        self.entries[idx].1 = value;
    }

    fn same_names(&self, other: &Declaration) -> bool {
        self.len() == other.len() && self.names().zip(other.names()).all(|(a, b)| a == b)
    }
}

/// Right-hand side of a model: writes one rate per state variable into `out`.
///
/// `state` and `constants` arrive positionally, in declaration order.
pub trait RateFunction {
    fn evaluate(
        &self,
        t: f64,
        state: &[f64],
        constants: &[f64],
        out: &mut [f64],
    ) -> Result<(), NumericError>;
}

/// Rate function written directly in Rust.
pub type NativeRates = fn(f64, &[f64], &[f64], &mut [f64]) -> Result<(), NumericError>;

impl RateFunction for NativeRates {
    fn evaluate(
        &self,
        t: f64,
        state: &[f64],
        constants: &[f64],
        out: &mut [f64],
    ) -> Result<(), NumericError> {
        self(t, state, constants, out)
    }
}

/// A compartment model: state variables with initial values, constants with
/// defaults, and the rate function tying them together.
#[derive(Clone)]
pub struct ModelDefinition {
    name: String,
    variables: Declaration,
    constants: Declaration,
    rates: Rc<dyn RateFunction>,
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("constants", &self.constants)
            .finish_non_exhaustive()
    }
}

impl ModelDefinition {
    pub fn new(
        name: impl Into<String>,
        variables: Declaration,
        constants: Declaration,
        rates: Rc<dyn RateFunction>,
    ) -> Result<Self, InputError> {
        if variables.is_empty() {
            return Err(InputError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let mut seen: HashSet<&str> = variables.names().collect();
        for name in constants.names() {
            if !seen.insert(name) {
                return Err(InputError::DuplicateName {
                    kind: "symbol",
                    name: name.to_string(),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            variables,
            constants,
            rates,
        })
    }

    /// Constructor used by [`compartment_model!`]; uniqueness of the names is
    /// checked at compile time there.
    #[doc(hidden)]
    pub fn from_static(
        name: &str,
        variables: &[(&str, f64)],
        constants: &[(&str, f64)],
        rates: NativeRates,
    ) -> Self {
        let to_entries = |entries: &[(&str, f64)]| -> Vec<(String, f64)> {
            entries.iter().map(|(n, v)| (n.to_string(), *v)).collect()
        };
        Self {
            name: name.to_string(),
            variables: Declaration {
                kind: "variable",
                entries: to_entries(variables),
            },
            constants: Declaration {
                kind: "constant",
                entries: to_entries(constants),
            },
            rates: Rc::new(rates),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    /// State variables with their initial values.
    pub fn variables(&self) -> &Declaration {
        &self.variables
    }

    /// Constants with their default values.
    pub fn constants(&self) -> &Declaration {
        &self.constants
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.names().collect()
    }

    pub fn initial_values(&self) -> Vec<f64> {
        self.variables.values()
    }

    /// Binds the model to a constant set derived from its own defaults.
    pub fn bind(&self, constants: &Declaration) -> Result<BoundSystem<'_>, InputError> {
        if !self.constants.same_names(constants) {
            return Err(InputError::DimensionMismatch {
                expected: self.constants.len(),
                actual: constants.len(),
            });
        }
        Ok(BoundSystem {
            model: self,
            constants: constants.values(),
        })
    }

    /// Evaluates the rates once; mostly useful for inspection and tests.
    pub fn rates_at(
        &self,
        t: f64,
        state: &[f64],
        constants: &[f64],
    ) -> Result<Vec<f64>, NumericError> {
        let mut out = vec![0.0; self.dimension()];
        self.rates.evaluate(t, state, constants, &mut out)?;
        Ok(out)
    }
}

/// A model with a fixed constant vector, usable by the solvers.
pub struct BoundSystem<'a> {
    model: &'a ModelDefinition,
    constants: Vec<f64>,
}

impl BoundSystem<'_> {
    pub fn constants(&self) -> &[f64] {
        &self.constants
    }
}

impl DynamicalSystem for BoundSystem<'_> {
    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<(), NumericError> {
        debug_assert_eq!(x.len(), self.dimension());
        self.model.rates.evaluate(t, x, &self.constants, out)?;
        if let Some(idx) = out.iter().position(|v| !v.is_finite()) {
            return Err(NumericError::NonFiniteDerivative {
                variable: self.model.variables.entries[idx].0.clone(),
                t,
            });
        }
        Ok(())
    }
}

/// Declares a built-in compartment model from a single declaration.
///
/// Each variable carries its initial value and its rate expression, so names,
/// initial values and rate outputs cannot drift out of order. Rate
/// expressions may use `?` on fallible helpers such as
/// [`inhibition`](crate::functions::inhibition). A name used twice is a
/// compile error.
///
/// ```ignore
/// compartment_model! {
///     pub fn decay() -> "decay" (t) {
///         constants { k = 0.5 }
///         variables { x = 1.0 => -k * x }
///     }
/// }
/// ```
#[macro_export]
macro_rules! compartment_model {
    (
        $(#[$meta:meta])*
        $vis:vis fn $ctor:ident() -> $name:literal ($t:ident) {
            constants { $($k:ident = $kv:expr),* $(,)? }
            variables { $($var:ident = $init:expr => $rhs:expr),+ $(,)? }
        }
    ) => {
        $(#[$meta])*
        $vis fn $ctor() -> $crate::model::ModelDefinition {
            #[allow(non_camel_case_types, dead_code, clippy::upper_case_acronyms)]
            enum DeclaredNames {
                $($var,)+
                $($k,)*
            }

            #[allow(non_snake_case, unused_variables, unused_assignments)]
            fn rates(
                $t: f64,
                state: &[f64],
                constants: &[f64],
                out: &mut [f64],
            ) -> ::std::result::Result<(), $crate::error::NumericError> {
                let mut idx = 0usize;
                $(
                    let $var = state[idx];
                    idx += 1;
                )+
                idx = 0;
                $(
                    let $k = constants[idx];
                    idx += 1;
                )*
                let rates = [$($rhs),+];
                out.copy_from_slice(&rates);
                Ok(())
            }

            $crate::model::ModelDefinition::from_static(
                $name,
                &[$((stringify!($var), $init)),+],
                &[$((stringify!($k), $kv)),*],
                rates,
            )
        }
    };
}
