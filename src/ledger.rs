//! Sale totals and cap enforcement.
//!
//! Both contribution channels book through [`SaleTotals::record_sale`], which is the
//! only writer of the counters. Counters never decrease.

use serde::{Deserialize, Serialize};

use crate::{error::SaleError, Balance};

/// Where a contribution's value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Value transferred with the call.
    Native,
    /// Value reported by the operator, settled off-ledger.
    Fiat,
}

/// Campaign caps in value units, plus the token ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapPolicy {
    pub soft_cap: Balance,
    pub hard_cap: Balance,
    pub token_ceiling: Balance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    native_raised: Balance,
    fiat_raised: Balance,
    tokens_sold: Balance,
}

impl SaleTotals {
    pub fn native_raised(&self) -> Balance {
        self.native_raised
    }

    pub fn fiat_raised(&self) -> Balance {
        self.fiat_raised
    }

    /// Native plus fiat-attested value.
    pub fn value_raised(&self) -> Balance {
        self.native_raised.saturating_add(self.fiat_raised)
    }

    pub fn tokens_sold(&self) -> Balance {
        self.tokens_sold
    }

    /// Book a sale, or reject it without touching any counter.
    ///
    /// Native value is bounded by the hard cap. Both channels are bounded by
    /// the token ceiling; operator-attested value is not capped by amount.
    pub fn record_sale(
        &mut self,
        caps: &CapPolicy,
        channel: Channel,
        value: Balance,
        tokens: Balance,
    ) -> Result<(), SaleError> {
        let raised = match channel {
            Channel::Native => self.native_raised,
            Channel::Fiat => self.fiat_raised,
        }
        .checked_add(value)
        .ok_or(SaleError::ArithmeticOverflow)?;
        if channel == Channel::Native && raised > caps.hard_cap {
            return Err(SaleError::CapExceeded);
        }
        let sold = self.tokens_sold.checked_add(tokens).ok_or(SaleError::ArithmeticOverflow)?;
        if sold > caps.token_ceiling {
            return Err(SaleError::CapExceeded);
        }

        match channel {
            Channel::Native => self.native_raised = raised,
            Channel::Fiat => self.fiat_raised = raised,
        }
        self.tokens_sold = sold;
        Ok(())
    }

    pub fn soft_cap_reached(&self, caps: &CapPolicy) -> bool {
        self.value_raised() >= caps.soft_cap
    }

    pub fn hard_cap_reached(&self, caps: &CapPolicy) -> bool {
        self.native_raised >= caps.hard_cap || self.tokens_sold >= caps.token_ceiling
    }

    pub fn tokens_remaining(&self, caps: &CapPolicy) -> Balance {
        caps.token_ceiling.saturating_sub(self.tokens_sold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapPolicy {
        CapPolicy { soft_cap: 20, hard_cap: 70, token_ceiling: 350 }
    }

    #[test]
    fn channels_book_separately() {
        let mut t = SaleTotals::default();
        t.record_sale(&caps(), Channel::Native, 10, 50).unwrap();
        t.record_sale(&caps(), Channel::Fiat, 15, 90).unwrap();
        assert_eq!(t.native_raised(), 10);
        assert_eq!(t.fiat_raised(), 15);
        assert_eq!(t.value_raised(), 25);
        assert_eq!(t.tokens_sold(), 140);
        assert!(t.soft_cap_reached(&caps()));
        assert!(!t.hard_cap_reached(&caps()));
        assert_eq!(t.tokens_remaining(&caps()), 210);
    }

    #[test]
    fn value_cap_bounds_native_only() {
        let mut t = SaleTotals::default();
        t.record_sale(&caps(), Channel::Fiat, 60, 60).unwrap();
        t.record_sale(&caps(), Channel::Native, 65, 65).unwrap();
        assert_eq!(t.record_sale(&caps(), Channel::Native, 6, 6), Err(SaleError::CapExceeded));
        assert_eq!(t.native_raised(), 65);
        t.record_sale(&caps(), Channel::Native, 5, 5).unwrap();
        assert!(t.hard_cap_reached(&caps()));
    }

    #[test]
    fn fiat_is_bounded_by_the_token_ceiling() {
        let mut t = SaleTotals::default();
        t.record_sale(&caps(), Channel::Fiat, 100, 300).unwrap();
        assert_eq!(t.value_raised(), 100);
        let before = t;
        assert_eq!(t.record_sale(&caps(), Channel::Fiat, 1, 51), Err(SaleError::CapExceeded));
        assert_eq!(t, before);
        t.record_sale(&caps(), Channel::Fiat, 1, 50).unwrap();
        assert_eq!(t.tokens_remaining(&caps()), 0);
    }

    #[test]
    fn token_ceiling_rejects_without_side_effects() {
        let mut t = SaleTotals::default();
        t.record_sale(&caps(), Channel::Native, 1, 300).unwrap();
        let before = t;
        assert_eq!(t.record_sale(&caps(), Channel::Native, 1, 51), Err(SaleError::CapExceeded));
        assert_eq!(t, before);
        t.record_sale(&caps(), Channel::Native, 1, 50).unwrap();
        assert!(t.hard_cap_reached(&caps()));
    }
}
