use thiserror::Error;

use crate::{phase::Phase, vesting::VestingError, Balance};

/// Rejections surfaced by ledger operations. Every error leaves state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaleError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("sale phase {phase:?} does not admit this contribution")]
    PhaseNotOpen { phase: Phase },
    #[error("sale is halted")]
    Halted,
    #[error("address not whitelisted")]
    NotWhitelisted,
    #[error("contribution {amount} below minimum {minimum}")]
    BelowMinimumContribution { amount: Balance, minimum: Balance },
    #[error("bonus rate {0} must be greater than 100")]
    InvalidBonusRate(u32),
    #[error("hard cap would be exceeded")]
    CapExceeded,
    #[error("transfer of {requested} exceeds releasable balance {available}")]
    InsufficientReleasableBalance { requested: Balance, available: Balance },
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("insufficient allowance")]
    InsufficientAllowance,
    #[error("invalid recipient")]
    InvalidRecipient,
    #[error("not authorized")]
    Unauthorized,
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
}

impl SaleError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SaleError::InvalidConfiguration(msg.into())
    }

    /// Short machine-readable kind, used in logs and replay reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SaleError::InvalidConfiguration(_) => "invalid_configuration",
            SaleError::PhaseNotOpen { .. } => "phase_not_open",
            SaleError::Halted => "halted",
            SaleError::NotWhitelisted => "not_whitelisted",
            SaleError::BelowMinimumContribution { .. } => "below_minimum_contribution",
            SaleError::InvalidBonusRate(_) => "invalid_bonus_rate",
            SaleError::CapExceeded => "cap_exceeded",
            SaleError::InsufficientReleasableBalance { .. } => "insufficient_releasable_balance",
            SaleError::InsufficientBalance => "insufficient_balance",
            SaleError::InsufficientAllowance => "insufficient_allowance",
            SaleError::InvalidRecipient => "invalid_recipient",
            SaleError::Unauthorized => "unauthorized",
            SaleError::ArithmeticOverflow => "arithmetic_overflow",
        }
    }
}

impl From<VestingError> for SaleError {
    fn from(e: VestingError) -> Self {
        match e {
            VestingError::Overflow => SaleError::ArithmeticOverflow,
            other => SaleError::InvalidConfiguration(other.to_string()),
        }
    }
}
