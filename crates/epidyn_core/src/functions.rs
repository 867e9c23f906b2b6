//! Reusable rate sub-expressions.
//!
//! Built-in models call these as plain Rust functions. Equation-file models
//! reach them by name through [`FunctionRegistry`].

use crate::error::NumericError;
use std::collections::HashMap;

/// Division that treats a zero denominator as a fatal numeric condition
/// instead of producing `inf` or `NaN`.
#[inline]
pub fn checked_div(numerator: f64, denominator: f64, site: &'static str) -> Result<f64, NumericError> {
    if denominator == 0.0 {
        return Err(NumericError::DivisionByZero { site });
    }
    Ok(numerator / denominator)
}

/// Saturating inhibition `v / (1 + alpha * acc)`.
pub fn inhibition(v: f64, alpha: f64, acc: f64) -> Result<f64, NumericError> {
    checked_div(v, 1.0 + alpha * acc, "inhibition")
}

/// Remaining capacity under two-species competition, `1 - w1*n1 - w2*n2`.
pub fn limited_growth(n1: f64, n2: f64, w1: f64, w2: f64) -> f64 {
    1.0 - w1 * n1 - w2 * n2
}

/// A pure function of a fixed number of arguments.
#[derive(Clone, Copy)]
pub struct NamedFunction {
    pub name: &'static str,
    pub arity: usize,
    pub eval: fn(&[f64]) -> Result<f64, NumericError>,
}

impl std::fmt::Debug for NamedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Lookup table of named functions, addressed by index once compiled.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: Vec<NamedFunction>,
    index: HashMap<&'static str, usize>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registers `function`, replacing any previous entry with the same name.
    pub fn register(&mut self, function: NamedFunction) {
        match self.index.get(function.name) {
            Some(&idx) => self.functions[idx] = function,
            None => {
                self.index.insert(function.name, self.functions.len());
                self.functions.push(function);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<(usize, &NamedFunction)> {
        self.index.get(name).map(|&idx| (idx, &self.functions[idx]))
    }

    pub fn get(&self, idx: usize) -> Option<&NamedFunction> {
        self.functions.get(idx)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.iter().map(|f| f.name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(NamedFunction {
            name: "inhibition",
            arity: 3,
            eval: |args| inhibition(args[0], args[1], args[2]),
        });
        registry.register(NamedFunction {
            name: "limited_growth",
            arity: 4,
            eval: |args| Ok(limited_growth(args[0], args[1], args[2], args[3])),
        });
        registry.register(NamedFunction {
            name: "sin",
            arity: 1,
            eval: |args| Ok(args[0].sin()),
        });
        registry.register(NamedFunction {
            name: "cos",
            arity: 1,
            eval: |args| Ok(args[0].cos()),
        });
        registry.register(NamedFunction {
            name: "exp",
            arity: 1,
            eval: |args| Ok(args[0].exp()),
        });
        registry.register(NamedFunction {
            name: "ln",
            arity: 1,
            eval: |args| Ok(args[0].ln()),
        });
        registry.register(NamedFunction {
            name: "sqrt",
            arity: 1,
            eval: |args| Ok(args[0].sqrt()),
        });
        registry.register(NamedFunction {
            name: "power",
            arity: 2,
            eval: |args| Ok(args[0].powf(args[1])),
        });
        registry
    }
}
