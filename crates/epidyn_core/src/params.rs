use crate::error::InputError;
use crate::model::Declaration;
use std::str::FromStr;
use tracing::warn;

/// How override names that match no declared entry are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideMode {
    /// Unknown names are ignored (logged at `warn`).
    #[default]
    Permissive,
    /// Unknown names are an input error.
    Strict,
}

/// A sparse, ordered mapping of name -> value parsed from `name=value` tokens.
///
/// When a name appears more than once the last value wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    entries: Vec<(String, f64)>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Parses whitespace-separated `name=value` tokens. An empty string is an
    /// empty mapping.
    pub fn parse(input: &str) -> Result<Self, InputError> {
        let mut overrides = Self::new();
        for token in input.split_whitespace() {
            let (name, value) = parse_token(token)?;
            overrides.insert(name, value);
        }
        Ok(overrides)
    }

    /// Returns a copy of `defaults` with matching entries replaced. Length and
    /// order of `defaults` are preserved.
    pub fn apply(&self, defaults: &Declaration, mode: OverrideMode) -> Result<Declaration, InputError> {
        let mut updated = defaults.clone();
        for (name, value) in self.iter() {
            match defaults.position(name) {
                Some(idx) => updated.set_at(idx, value),
                None if mode == OverrideMode::Strict => {
                    return Err(InputError::UnknownName {
                        kind: defaults.kind(),
                        name: name.to_string(),
                    });
                }
                None => {
                    warn!(kind = defaults.kind(), name, "ignoring override for undeclared name");
                }
            }
        }
        Ok(updated)
    }
}

impl FromStr for Overrides {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut overrides = Self::new();
        for (name, value) in iter {
            overrides.insert(name, value);
        }
        overrides
    }
}

fn parse_token(token: &str) -> Result<(&str, f64), InputError> {
    let malformed = || InputError::MalformedOverride {
        token: token.to_string(),
    };
    let (name, raw) = token.split_once('=').ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(malformed());
    }
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|source| InputError::InvalidOverrideValue {
            token: token.to_string(),
            source,
        })?;
    Ok((name, value))
}
