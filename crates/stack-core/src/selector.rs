//! Next-variant selection.
//!
//! Three interchangeable policies draw from the catalog using a seeded
//! `ChaCha8Rng`, so two selectors with the same seed and the same score
//! history produce the same sequence.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::variant::{BlockVariant, VariantCatalog};

/// Error returned when no block can be selected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no block variants available")]
    NoVariantsAvailable,
}

/// How the next variant is chosen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Base variant early, base/secondary mix mid-game, full weighted draw late.
    DifficultyTiered {
        tier1: u32,
        tier2: u32,
        base: String,
        secondary: String,
        /// Probability of drawing `base` between `tier1` and `tier2`.
        #[serde(default = "default_base_chance")]
        base_chance: f32,
    },
    WeightedRandom,
    UniformRandom,
}

fn default_base_chance() -> f32 {
    0.7
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::DifficultyTiered {
            tier1: 50,
            tier2: 150,
            base: "Normal".to_string(),
            secondary: "Wide".to_string(),
            base_chance: default_base_chance(),
        }
    }
}

/// Picks the next block variant for the drop scheduler.
///
/// Only the RNG is serialized. The catalog and policy come from the
/// configuration and must be rebound with [`VariantSelector::rebind`] after
/// decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSelector {
    #[serde(skip)]
    catalog: VariantCatalog,
    #[serde(skip)]
    policy: SelectionPolicy,
    rng: ChaCha8Rng,
}

impl VariantSelector {
    pub fn new(catalog: VariantCatalog, policy: SelectionPolicy, seed: u64) -> Self {
        Self {
            catalog,
            policy,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn catalog(&self) -> &VariantCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Replaces the catalog and policy, keeping the RNG position.
    pub fn rebind(&mut self, catalog: VariantCatalog, policy: SelectionPolicy) {
        self.catalog = catalog;
        self.policy = policy;
    }

    /// Selects the next variant for the given score.
    pub fn select(&mut self, current_score: u32) -> Result<BlockVariant, SelectError> {
        let eligible = self.catalog.eligible(current_score);
        if eligible.is_empty() {
            return Err(SelectError::NoVariantsAvailable);
        }

        let chosen = match &self.policy {
            SelectionPolicy::DifficultyTiered {
                tier1,
                tier2,
                base,
                secondary,
                base_chance,
            } => {
                if current_score < *tier1 {
                    named_or_first(&eligible, base)
                } else if current_score < *tier2 {
                    let roll: f32 = self.rng.random();
                    if roll < *base_chance {
                        named_or_first(&eligible, base)
                    } else {
                        named_or_first(&eligible, secondary)
                    }
                } else {
                    weighted_pick(&mut self.rng, &eligible)
                }
            }
            SelectionPolicy::WeightedRandom => weighted_pick(&mut self.rng, &eligible),
            SelectionPolicy::UniformRandom => {
                let index = self.rng.random_range(0..eligible.len());
                eligible[index]
            }
        };

        Ok(chosen.clone())
    }
}

/// Returns the variant called `name`, or the first eligible one.
fn named_or_first<'a>(eligible: &[&'a BlockVariant], name: &str) -> &'a BlockVariant {
    eligible
        .iter()
        .find(|v| v.name == name)
        .copied()
        .unwrap_or(eligible[0])
}

/// Walks the cumulative weight bands until the draw falls inside one.
fn weighted_pick<'a>(rng: &mut ChaCha8Rng, eligible: &[&'a BlockVariant]) -> &'a BlockVariant {
    let total: f32 = eligible.iter().map(|v| v.spawn_weight.max(0.0)).sum();
    if total <= 0.0 || !total.is_finite() {
        return eligible[0];
    }

    let draw = rng.random_range(0.0..total);
    let mut accumulated = 0.0;
    for variant in eligible {
        accumulated += variant.spawn_weight.max(0.0);
        if draw < accumulated {
            return variant;
        }
    }

    // Float drift can leave the draw just past the last band.
    eligible[0]
}
