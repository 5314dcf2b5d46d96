use serde::{Deserialize, Serialize};

use crate::{
    bonus::BonusSchedule,
    error::SaleError,
    ledger::CapPolicy,
    phase::SaleWindows,
    vesting::{VestingClass, VestingPolicy},
    Address, Balance, Timestamp,
};

/// Allocation credited at construction, outside the sale counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub beneficiary: Address,
    pub amount: Balance,
    pub class: VestingClass,
}

/// Core campaign parameters (immutable post-construction).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Identity allowed to mint an operator capability.
    pub operator: Address,
    /// Destination of raised funds; reported, never debited by the ledger.
    pub wallet: Address,
    pub soft_cap: Balance,
    pub hard_cap: Balance,
    pub windows: SaleWindows,
    /// Tokens per contributed unit.
    pub rate: Balance,
    pub min_contribution: Balance,
    pub min_presale_contribution: Balance,
    pub bonus: BonusSchedule,
    /// Explicit token ceiling for sales; defaults to `hard_cap * rate`.
    #[serde(default)]
    pub token_sale_cap: Option<Balance>,
    #[serde(default)]
    pub vesting: VestingPolicy,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<(), SaleError> {
        if self.operator.is_zero() {
            return Err(SaleError::config("operator must not be the zero address"));
        }
        if self.wallet.is_zero() {
            return Err(SaleError::config("wallet must not be the zero address"));
        }
        if self.soft_cap >= self.hard_cap {
            return Err(SaleError::config("soft cap must be below hard cap"));
        }
        self.windows.validate()?;
        if self.rate == 0 {
            return Err(SaleError::config("rate must be > 0"));
        }
        if self.token_ceiling()? == 0 {
            return Err(SaleError::config("token sale cap must be > 0"));
        }
        let mut granted: Balance = 0;
        for g in &self.grants {
            if g.beneficiary.is_zero() {
                return Err(SaleError::config("grant to the zero address"));
            }
            if g.amount == 0 {
                return Err(SaleError::config("grant amount must be > 0"));
            }
            granted = granted
                .checked_add(g.amount)
                .ok_or_else(|| SaleError::config("grants overflow total supply"))?;
        }
        Ok(())
    }

    /// Upper bound on tokens sold through both channels.
    pub fn token_ceiling(&self) -> Result<Balance, SaleError> {
        match self.token_sale_cap {
            Some(cap) => Ok(cap),
            None => self
                .hard_cap
                .checked_mul(self.rate)
                .ok_or_else(|| SaleError::config("hard_cap * rate overflows")),
        }
    }

    pub fn cap_policy(&self) -> Result<CapPolicy, SaleError> {
        Ok(CapPolicy {
            soft_cap: self.soft_cap,
            hard_cap: self.hard_cap,
            token_ceiling: self.token_ceiling()?,
        })
    }

    /// Every tranche table is anchored at the end of the crowdsale.
    pub fn lockup_anchor(&self) -> Timestamp {
        self.windows.crowdsale_end
    }
}
