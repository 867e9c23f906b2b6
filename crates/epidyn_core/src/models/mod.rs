//! Built-in compartment models.

mod competition;
mod immune_regulation;
mod sir;

use crate::model::ModelDefinition;

pub use competition::competition;
pub use immune_regulation::immune_regulation;
pub use sir::sir;

type Constructor = fn() -> ModelDefinition;

const CATALOG: &[(&str, Constructor)] = &[
    ("competition", competition),
    ("immune_regulation", immune_regulation),
    ("sir", sir),
];

/// Names of the built-in models, in catalog order.
pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|(name, _)| *name)
}

/// Builds the built-in model called `name`.
pub fn lookup(name: &str) -> Option<ModelDefinition> {
    CATALOG
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, build)| build())
}
