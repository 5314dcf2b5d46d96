//! Tiered purchase bonus.
//!
//! A bonus rate is a percentage multiplier where [`PERCENT`] means no bonus.
//! The tier is picked from the single contribution amount, never from a
//! holder's running total.

use serde::{Deserialize, Serialize};

use crate::{error::SaleError, Balance};

/// Neutral bonus rate (100%).
pub const PERCENT: u32 = 100;

/// Amounts `>= threshold` earn `rate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusTier {
    pub threshold: Balance,
    pub rate: u32,
}

/// Validated tier table, kept sorted by descending threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BonusTier>", into = "Vec<BonusTier>")]
pub struct BonusSchedule {
    tiers: Vec<BonusTier>,
}

impl BonusSchedule {
    /// Sorts `tiers` and checks that a lower threshold never pays a higher or equal rate.
    pub fn new(mut tiers: Vec<BonusTier>) -> Result<Self, SaleError> {
        tiers.sort_by(|a, b| b.threshold.cmp(&a.threshold));
        for t in &tiers {
            if t.threshold == 0 {
                return Err(SaleError::config("bonus threshold must be > 0"));
            }
            if t.rate < PERCENT {
                return Err(SaleError::config(format!("bonus rate {} below {}", t.rate, PERCENT)));
            }
        }
        for pair in tiers.windows(2) {
            if pair[0].threshold == pair[1].threshold {
                return Err(SaleError::config("duplicate bonus threshold"));
            }
            if pair[0].rate <= pair[1].rate {
                return Err(SaleError::config(
                    "bonus rates must decrease as thresholds decrease",
                ));
            }
        }
        Ok(Self { tiers })
    }

    /// No tiers: every contribution gets [`PERCENT`].
    pub fn flat() -> Self {
        Self { tiers: Vec::new() }
    }

    /// 15u -> 125, 10u -> 115, 5u -> 105.
    pub fn reference(unit: Balance) -> Self {
        Self {
            tiers: vec![
                BonusTier { threshold: 15 * unit, rate: 125 },
                BonusTier { threshold: 10 * unit, rate: 115 },
                BonusTier { threshold: 5 * unit, rate: 105 },
            ],
        }
    }

    pub fn tiers(&self) -> &[BonusTier] {
        &self.tiers
    }

    /// Highest qualifying tier wins.
    pub fn rate_for(&self, amount: Balance) -> u32 {
        self.tiers
            .iter()
            .find(|t| amount >= t.threshold)
            .map(|t| t.rate)
            .unwrap_or(PERCENT)
    }

    pub fn max_rate(&self) -> u32 {
        self.tiers.first().map(|t| t.rate).unwrap_or(PERCENT)
    }
}

impl TryFrom<Vec<BonusTier>> for BonusSchedule {
    type Error = SaleError;

    fn try_from(tiers: Vec<BonusTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<BonusSchedule> for Vec<BonusTier> {
    fn from(s: BonusSchedule) -> Self {
        s.tiers
    }
}

/// `value * bonus_rate / 100 * token_rate`, truncating at the `/100` step.
pub fn tokens_for(value: Balance, bonus_rate: u32, token_rate: Balance) -> Option<Balance> {
    value
        .checked_mul(bonus_rate as Balance)?
        .checked_div(PERCENT as Balance)?
        .checked_mul(token_rate)
}
