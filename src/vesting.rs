//! Tranche lockups for issued balances.
//!
//! Features:
//! - Per-class tranche tables (team, public sale, presale), declarative and serde-loadable.
//! - Each tranche releases a basis-point share of the holder's base award and of the
//!   bonus award at `anchor + offset`; unlock is inclusive.
//! - Cumulative computation: per column `floor(amount * cum_bps / 10_000)`, so rounding
//!   never strands dust and a full table always releases everything.
//! - Checked u128 math, explicit invariants (`released <= total_awarded`).
//!
//! Time model: seconds since Unix epoch (u64), supplied by the caller.

#![deny(rust_2018_idioms)]

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

use crate::{mul_div_u128, Balance, Timestamp};

/// Basis points denominator (100% == 10_000 bps).
pub const BPS_DENOM: u32 = 10_000;

/// Spacing of the default schedules.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(150 * 86_400);

/// Number of team tranches in the default policy.
pub const TEAM_TRANCHES: u32 = 5;

/// Errors returned by tranche table operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VestingError {
    /// Table violates an invariant.
    #[error("invalid tranche schedule: {0}")]
    Invalid(&'static str),
    /// Overflow detected in arithmetic.
    #[error("arithmetic overflow")]
    Overflow,
}

/// Which tranche table governs a holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VestingClass {
    /// Operator / team allocation granted at construction.
    Team,
    /// Bought with native value during the crowdsale.
    PublicSale,
    /// Operator-attested fiat purchase during the presale.
    Presale,
}

impl fmt::Display for VestingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VestingClass::Team => "team",
            VestingClass::PublicSale => "public-sale",
            VestingClass::Presale => "presale",
        })
    }
}

impl FromStr for VestingClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "team" => Ok(VestingClass::Team),
            "public-sale" | "public" => Ok(VestingClass::PublicSale),
            "presale" | "fiat" => Ok(VestingClass::Presale),
            other => Err(format!("unknown vesting class `{other}`")),
        }
    }
}

/// One release step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tranche {
    /// Delay after the anchor.
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
    /// Share of the base (non-bonus) award released here.
    #[serde(default)]
    pub base_bps: u16,
    /// Share of the bonus award released here.
    #[serde(default)]
    pub bonus_bps: u16,
}

/// Ordered tranche table. Each bps column sums to exactly [`BPS_DENOM`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tranche>", into = "Vec<Tranche>")]
pub struct TrancheSchedule {
    tranches: Vec<Tranche>,
}

impl TrancheSchedule {
    /// Build a schedule validating invariants.
    pub fn new(tranches: Vec<Tranche>) -> Result<Self, VestingError> {
        if tranches.is_empty() {
            return Err(VestingError::Invalid("at least one tranche required"));
        }
        if tranches.windows(2).any(|w| w[1].offset < w[0].offset) {
            return Err(VestingError::Invalid("offsets must be non-decreasing"));
        }
        let base: u32 = tranches.iter().map(|t| t.base_bps as u32).sum();
        let bonus: u32 = tranches.iter().map(|t| t.bonus_bps as u32).sum();
        if base != BPS_DENOM {
            return Err(VestingError::Invalid("base_bps must sum to 10000"));
        }
        if bonus != BPS_DENOM {
            return Err(VestingError::Invalid("bonus_bps must sum to 10000"));
        }
        Ok(Self { tranches })
    }

    /// Equal fifths of everything at `anchor + k * 150 days`, `k = 1..=5`.
    pub fn team_default() -> Self {
        let share = (BPS_DENOM / TEAM_TRANCHES) as u16;
        let tranches = (1..=TEAM_TRANCHES)
            .map(|k| Tranche { offset: DEFAULT_PERIOD * k, base_bps: share, bonus_bps: share })
            .collect();
        Self { tranches }
    }

    /// Base at the anchor, bonus one period later.
    pub fn sale_default() -> Self {
        Self {
            tranches: vec![
                Tranche { offset: Duration::ZERO, base_bps: BPS_DENOM as u16, bonus_bps: 0 },
                Tranche { offset: DEFAULT_PERIOD, base_bps: 0, bonus_bps: BPS_DENOM as u16 },
            ],
        }
    }

    pub fn tranches(&self) -> &[Tranche] {
        &self.tranches
    }

    /// Number of tranches that wait past the anchor.
    pub fn lockup_period(&self) -> u32 {
        self.tranches.iter().filter(|t| !t.offset.is_zero()).count() as u32
    }

    pub fn unlock_times(&self, anchor: Timestamp) -> Vec<Timestamp> {
        self.tranches
            .iter()
            .map(|t| anchor.saturating_add(t.offset.as_secs()))
            .collect()
    }

    /// Cumulative released amount after each tranche.
    pub fn cumulative(&self, base: Balance, bonus: Balance) -> Result<Vec<Balance>, VestingError> {
        let mut out = Vec::with_capacity(self.tranches.len());
        let (mut base_bps, mut bonus_bps) = (0u128, 0u128);
        for t in &self.tranches {
            base_bps += t.base_bps as u128;
            bonus_bps += t.bonus_bps as u128;
            let from_base = mul_bps(base, base_bps)?;
            let from_bonus = mul_bps(bonus, bonus_bps)?;
            out.push(from_base.checked_add(from_bonus).ok_or(VestingError::Overflow)?);
        }
        Ok(out)
    }

    /// Amount released by each individual tranche.
    pub fn tranche_amounts(&self, base: Balance, bonus: Balance) -> Result<Vec<Balance>, VestingError> {
        let cumulative = self.cumulative(base, bonus)?;
        let mut prev = 0;
        Ok(cumulative
            .into_iter()
            .map(|c| {
                let step = c - prev;
                prev = c;
                step
            })
            .collect())
    }

    /// Cumulative amount of every tranche whose unlock time is `<= now`.
    pub fn released_at(
        &self,
        anchor: Timestamp,
        base: Balance,
        bonus: Balance,
        now: Timestamp,
    ) -> Result<Balance, VestingError> {
        let unlocked = self
            .unlock_times(anchor)
            .into_iter()
            .take_while(|at| *at <= now)
            .count();
        if unlocked == 0 {
            return Ok(0);
        }
        let cumulative = self.cumulative(base, bonus)?;
        Ok(cumulative[unlocked - 1])
    }
}

impl TryFrom<Vec<Tranche>> for TrancheSchedule {
    type Error = VestingError;

    fn try_from(tranches: Vec<Tranche>) -> Result<Self, Self::Error> {
        Self::new(tranches)
    }
}

impl From<TrancheSchedule> for Vec<Tranche> {
    fn from(s: TrancheSchedule) -> Self {
        s.tranches
    }
}

/// Tranche table per vesting class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingPolicy {
    pub team: TrancheSchedule,
    pub public_sale: TrancheSchedule,
    pub presale: TrancheSchedule,
}

impl Default for VestingPolicy {
    fn default() -> Self {
        Self {
            team: TrancheSchedule::team_default(),
            public_sale: TrancheSchedule::sale_default(),
            presale: TrancheSchedule::sale_default(),
        }
    }
}

impl VestingPolicy {
    pub fn schedule_for(&self, class: VestingClass) -> &TrancheSchedule {
        match class {
            VestingClass::Team => &self.team,
            VestingClass::PublicSale => &self.public_sale,
            VestingClass::Presale => &self.presale,
        }
    }
}

/// Per-holder lockup record. Created on first credit, never removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub class: VestingClass,
    /// Everything ever credited by issuance or grant.
    pub total_awarded: Balance,
    /// Non-bonus part of `total_awarded`.
    pub base_awarded: Balance,
    /// Bonus part of `total_awarded`.
    pub bonus_awarded: Balance,
    /// Releasable amount observed at the last outbound transfer.
    pub released: Balance,
}

impl HolderRecord {
    pub fn new(class: VestingClass) -> Self {
        Self { class, total_awarded: 0, base_awarded: 0, bonus_awarded: 0, released: 0 }
    }

    /// Add an award. Either everything is applied or nothing.
    pub fn credit(&mut self, base: Balance, bonus: Balance) -> Result<(), VestingError> {
        let new_base = self.base_awarded.checked_add(base).ok_or(VestingError::Overflow)?;
        let new_bonus = self.bonus_awarded.checked_add(bonus).ok_or(VestingError::Overflow)?;
        let new_total = new_base.checked_add(new_bonus).ok_or(VestingError::Overflow)?;
        self.base_awarded = new_base;
        self.bonus_awarded = new_bonus;
        self.total_awarded = new_total;
        Ok(())
    }

    /// Unlocked portion of `total_awarded` at `now`.
    pub fn releasable_at(
        &self,
        schedule: &TrancheSchedule,
        anchor: Timestamp,
        now: Timestamp,
    ) -> Result<Balance, VestingError> {
        let released = schedule.released_at(anchor, self.base_awarded, self.bonus_awarded, now)?;
        Ok(released.min(self.total_awarded))
    }

    /// Portion the holder must keep at `now`.
    pub fn locked_at(
        &self,
        schedule: &TrancheSchedule,
        anchor: Timestamp,
        now: Timestamp,
    ) -> Result<Balance, VestingError> {
        Ok(self.total_awarded - self.releasable_at(schedule, anchor, now)?)
    }

    /// Refresh the `released` cache after an outbound transfer.
    pub fn note_transfer(
        &mut self,
        schedule: &TrancheSchedule,
        anchor: Timestamp,
        now: Timestamp,
    ) -> Result<(), VestingError> {
        let releasable = self.releasable_at(schedule, anchor, now)?;
        self.released = self.released.max(releasable).min(self.total_awarded);
        Ok(())
    }
}

/// Multiply amount by basis points (bps / 10_000).
#[inline]
fn mul_bps(amount: Balance, bps: u128) -> Result<Balance, VestingError> {
    mul_div_u128(amount, bps, BPS_DENOM as u128).ok_or(VestingError::Overflow)
}

/* ---------------------------------- TESTS ---------------------------------- */
