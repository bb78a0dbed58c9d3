//! NFT rarity distribution.
//!
//! Rarity is drawn once at mint time from a uniform `[0, 1)` sample against
//! cumulative thresholds.

use omni_core::Rarity;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RarityError {
    #[error("Cumulative bound {bound} for {tier} is outside [0, 1]")]
    OutOfRange { tier: Rarity, bound: f64 },

    #[error("Cumulative bound {bound} for {tier} is below the previous tier's {previous}")]
    NotMonotonic { tier: Rarity, bound: f64, previous: f64 },

    #[error("Rarity thresholds end at {0}, expected 1.0")]
    DoesNotEndAtOne(f64),
}

/// Cumulative rarity thresholds, in `Rarity::ALL` order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RarityTable {
    /// Upper cumulative bound of each tier; the last entry is 1.0
    pub cumulative: [f64; 5],
}

impl Default for RarityTable {
    fn default() -> Self {
        Self {
            cumulative: [0.60, 0.85, 0.95, 0.99, 1.00],
        }
    }
}

impl RarityTable {
    /// Thresholds must be non-decreasing and end at exactly 1.0
    pub fn validate(&self) -> Result<(), RarityError> {
        let mut previous = 0.0;
        for (&tier, &bound) in Rarity::ALL.iter().zip(self.cumulative.iter()) {
            if !(0.0..=1.0).contains(&bound) {
                return Err(RarityError::OutOfRange { tier, bound });
            }
            if bound < previous {
                return Err(RarityError::NotMonotonic { tier, bound, previous });
            }
            previous = bound;
        }
        if (previous - 1.0).abs() > f64::EPSILON {
            return Err(RarityError::DoesNotEndAtOne(previous));
        }
        Ok(())
    }

    /// First tier whose cumulative bound exceeds `draw`
    pub fn tier_for(&self, draw: f64) -> Rarity {
        Rarity::ALL
            .iter()
            .zip(self.cumulative.iter())
            .find(|(_, bound)| draw < **bound)
            .map(|(tier, _)| *tier)
            .unwrap_or(Rarity::Legendary)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Rarity {
        self.tier_for(rng.gen::<f64>())
    }

    /// Probability of each tier (differences of the cumulative bounds)
    pub fn probability(&self, rarity: Rarity) -> f64 {
        let index = Rarity::ALL.iter().position(|r| *r == rarity).unwrap_or(0);
        let lower = if index == 0 { 0.0 } else { self.cumulative[index - 1] };
        self.cumulative[index] - lower
    }
}
