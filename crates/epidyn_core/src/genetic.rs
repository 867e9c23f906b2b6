//! Real-valued genetic algorithm over box-bounded genes.
//!
//! Each gene lives in its own `[min, max]` interval. Lower fitness is better.
//! Runs are reproducible: the random stream is seeded from
//! [`GeneticSettings::seed`].

use crate::error::InputError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Search interval for one named gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bound {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(InputError::InvalidEstimation(format!(
                "bound for `{}` must be finite with min <= max, got [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }

    fn span(&self) -> f64 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneticSettings {
    /// Individuals per generation.
    pub population: usize,
    pub generations: usize,
    /// Probability that a child takes a gene from its second parent.
    pub crossover_rate: f64,
    /// Per-gene mutation probability.
    pub mutation_rate: f64,
    /// Largest mutation step as a fraction of the gene's bound width.
    pub mutation_scale: f64,
    /// Best individuals copied unchanged into the next generation.
    pub elite: usize,
    /// Contestants drawn per parent selection.
    pub tournament: usize,
    pub seed: u64,
}

impl Default for GeneticSettings {
    fn default() -> Self {
        Self {
            population: 40,
            generations: 60,
            crossover_rate: 0.5,
            mutation_rate: 0.2,
            mutation_scale: 0.1,
            elite: 2,
            tournament: 3,
            seed: 42,
        }
    }
}

impl GeneticSettings {
    pub fn validate(&self) -> Result<(), InputError> {
        let invalid = |msg: &str| Err(InputError::InvalidEstimation(msg.to_string()));
        if self.population < 2 {
            return invalid("population must hold at least 2 individuals");
        }
        if self.elite >= self.population {
            return invalid("elite must be smaller than the population");
        }
        if self.tournament == 0 {
            return invalid("tournament size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) {
            return invalid("crossover_rate must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid("mutation_rate must lie in [0, 1]");
        }
        if !self.mutation_scale.is_finite() || self.mutation_scale <= 0.0 {
            return invalid("mutation_scale must be finite and positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chromosome {
    pub genes: Vec<f64>,
    pub fitness: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneticOutcome {
    pub best: Chromosome,
    /// Best fitness of the initial population, then after every generation.
    pub history: Vec<f64>,
    pub evaluations: usize,
}

pub struct GeneticAlgorithm {
    bounds: Vec<Bound>,
    settings: GeneticSettings,
    rng: ChaCha8Rng,
}

impl GeneticAlgorithm {
    pub fn new(bounds: Vec<Bound>, settings: GeneticSettings) -> Result<Self, InputError> {
        settings.validate()?;
        if bounds.is_empty() {
            return Err(InputError::InvalidEstimation(
                "at least one bound is required".into(),
            ));
        }
        for bound in &bounds {
            bound.validate()?;
        }
        Ok(Self {
            bounds,
            settings,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
        })
    }

    /// Minimises `fitness`. NaN scores rank below every finite score.
    pub fn run<F>(&mut self, mut fitness: F) -> GeneticOutcome
    where
        F: FnMut(&[f64]) -> f64,
    {
        let size = self.settings.population;
        let mut population: Vec<Chromosome> = (0..size)
            .map(|_| {
                let genes = self.random_genes();
                score(&mut fitness, genes)
            })
            .collect();
        let mut evaluations = size;
        sort_by_fitness(&mut population);
        let mut history = vec![population[0].fitness];

        for generation in 0..self.settings.generations {
            let mut next: Vec<Chromosome> = population[..self.settings.elite].to_vec();
            while next.len() < size {
                let first = self.select(&population);
                let second = self.select(&population);
                let mut genes = self.crossover(&population[first].genes, &population[second].genes);
                self.mutate(&mut genes);
                next.push(score(&mut fitness, genes));
                evaluations += 1;
            }
            sort_by_fitness(&mut next);
            population = next;
            history.push(population[0].fitness);
            debug!(generation, best = population[0].fitness, "generation finished");
        }

        GeneticOutcome {
            best: population.swap_remove(0),
            history,
            evaluations,
        }
    }

    fn random_genes(&mut self) -> Vec<f64> {
        self.bounds
            .iter()
            .map(|bound| self.rng.gen_range(bound.min..=bound.max))
            .collect()
    }

    /// Tournament selection; returns an index into `population`.
    fn select(&mut self, population: &[Chromosome]) -> usize {
        (0..self.settings.tournament)
            .map(|_| self.rng.gen_range(0..population.len()))
            .min_by(|&a, &b| population[a].fitness.total_cmp(&population[b].fitness))
            .unwrap_or(0)
    }

    fn crossover(&mut self, first: &[f64], second: &[f64]) -> Vec<f64> {
        first
            .iter()
            .zip(second)
            .map(|(&a, &b)| {
                if self.rng.gen_bool(self.settings.crossover_rate) {
                    b
                } else {
                    a
                }
            })
            .collect()
    }

    fn mutate(&mut self, genes: &mut [f64]) {
        for (gene, bound) in genes.iter_mut().zip(&self.bounds) {
            if self.rng.gen_bool(self.settings.mutation_rate) {
                let step = self.rng.gen_range(-1.0_f64..=1.0) * self.settings.mutation_scale * bound.span();
                *gene = (*gene + step).clamp(bound.min, bound.max);
            }
        }
    }
}

fn score<F: FnMut(&[f64]) -> f64>(fitness: &mut F, genes: Vec<f64>) -> Chromosome {
    let value = fitness(&genes);
    Chromosome {
        genes,
        fitness: if value.is_nan() { f64::INFINITY } else { value },
    }
}

fn sort_by_fitness(population: &mut [Chromosome]) {
    population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bowl(genes: &[f64]) -> f64 {
        (genes[0] - 3.0).powi(2) + (genes[1] + 1.0).powi(2)
    }

    fn bounds() -> Vec<Bound> {
        vec![Bound::new("a", 0.0, 10.0), Bound::new("b", -5.0, 5.0)]
    }

    #[test]
    fn finds_minimum_of_a_bowl() {
        let mut ga = GeneticAlgorithm::new(bounds(), GeneticSettings::default()).unwrap();
        let outcome = ga.run(bowl);
        assert!(outcome.best.fitness < 5e-3, "best = {:?}", outcome.best);
        assert!((outcome.best.genes[0] - 3.0).abs() < 0.1);
        assert!((outcome.best.genes[1] + 1.0).abs() < 0.1);
        assert_eq!(outcome.history.len(), 61);
        assert_eq!(outcome.evaluations, 40 + 60 * 38);
    }

    #[test]
    fn best_fitness_never_gets_worse() {
        let mut ga = GeneticAlgorithm::new(bounds(), GeneticSettings::default()).unwrap();
        let outcome = ga.run(bowl);
        assert!(outcome.history.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let settings = GeneticSettings {
            generations: 5,
            ..GeneticSettings::default()
        };
        let first = GeneticAlgorithm::new(bounds(), settings).unwrap().run(bowl);
        let second = GeneticAlgorithm::new(bounds(), settings).unwrap().run(bowl);
        assert_eq!(first, second);

        let other = GeneticSettings { seed: 7, ..settings };
        let third = GeneticAlgorithm::new(bounds(), other).unwrap().run(bowl);
        assert_ne!(first.best.genes, third.best.genes);
    }

    #[test]
    fn genes_stay_within_bounds() {
        let settings = GeneticSettings {
            mutation_rate: 1.0,
            mutation_scale: 5.0,
            generations: 20,
            ..GeneticSettings::default()
        };
        let mut ga = GeneticAlgorithm::new(bounds(), settings).unwrap();
        let bounds = bounds();
        ga.run(|genes| {
            for (g, b) in genes.iter().zip(&bounds) {
                assert!((b.min..=b.max).contains(g), "{g} outside {b:?}");
            }
            // Push the search toward the corners.
            -genes[0].abs() - genes[1].abs()
        });
    }

    #[test]
    fn nan_scores_rank_last() {
        let mut ga = GeneticAlgorithm::new(bounds(), GeneticSettings::default()).unwrap();
        let outcome = ga.run(|genes| if genes[0] < 5.0 { f64::NAN } else { genes[0] });
        assert!(outcome.best.fitness.is_finite());
        assert!(outcome.best.genes[0] >= 5.0);
    }

    #[test]
    fn fixed_bound_pins_the_gene() {
        let bounds = vec![Bound::new("a", 2.0, 2.0), Bound::new("b", -5.0, 5.0)];
        let outcome = GeneticAlgorithm::new(bounds, GeneticSettings::default())
            .unwrap()
            .run(bowl);
        assert_eq!(outcome.best.genes[0], 2.0);
    }

    #[test]
    fn rejects_invalid_setup() {
        assert!(GeneticAlgorithm::new(vec![], GeneticSettings::default()).is_err());
        let inverted = vec![Bound::new("a", 1.0, 0.0)];
        assert!(GeneticAlgorithm::new(inverted, GeneticSettings::default()).is_err());
        let infinite = vec![Bound::new("a", 0.0, f64::INFINITY)];
        assert!(GeneticAlgorithm::new(infinite, GeneticSettings::default()).is_err());

        for settings in [
            GeneticSettings { population: 1, elite: 0, ..GeneticSettings::default() },
            GeneticSettings { elite: 40, ..GeneticSettings::default() },
            GeneticSettings { tournament: 0, ..GeneticSettings::default() },
            GeneticSettings { mutation_rate: 1.5, ..GeneticSettings::default() },
            GeneticSettings { crossover_rate: -0.1, ..GeneticSettings::default() },
            GeneticSettings { mutation_scale: 0.0, ..GeneticSettings::default() },
        ] {
            let err = GeneticAlgorithm::new(bounds(), settings).err().expect("rejected");
            assert!(matches!(err, InputError::InvalidEstimation(_)));
        }
    }
}
