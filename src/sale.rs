//! Token sale aggregate.
//!
//! Flow of a contribution: halt switch -> phase -> whitelist -> channel minimum ->
//! bonus rate -> token computation -> cap check -> credit (balance + lockup record).
//! Flow of a transfer: balance -> releasable portion at `now` -> debit/credit.
//!
//! Every mutating method either applies all of its effects or returns an error
//! having changed nothing. Time is always an explicit argument.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    bonus::{tokens_for, PERCENT},
    campaign::CampaignConfig,
    error::SaleError,
    ledger::{CapPolicy, Channel, SaleTotals},
    phase::Phase,
    vesting::{HolderRecord, TrancheSchedule, VestingClass},
    whitelist::Whitelist,
    Address, Balance, Timestamp,
};

/// Proof that the holder acted as the operator when it was minted.
/// Only [`TokenSale::new`] and [`TokenSale::authorize`] hand these out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorCap {
    operator: Address,
}

impl OperatorCap {
    pub fn operator(&self) -> Address {
        self.operator
    }
}

/// A contribution, tagged by channel. Each arm has its own admission rules;
/// both share token computation, the cap check and crediting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Contribution {
    /// Value sent by `payer` during the crowdsale; bonus from the tier table.
    Native { payer: Address, value: Balance },
    /// Operator-attested value during the presale with an explicit bonus rate.
    Fiat { reported_value: Balance, bonus_rate: u32 },
}

impl Contribution {
    pub fn channel(&self) -> Channel {
        match self {
            Contribution::Native { .. } => Channel::Native,
            Contribution::Fiat { .. } => Channel::Fiat,
        }
    }

    pub fn value(&self) -> Balance {
        match *self {
            Contribution::Native { value, .. } => value,
            Contribution::Fiat { reported_value, .. } => reported_value,
        }
    }

    /// Lockup class given to a holder whose first credit is this contribution.
    pub fn vesting_class(&self) -> VestingClass {
        match self {
            Contribution::Native { .. } => VestingClass::PublicSale,
            Contribution::Fiat { .. } => VestingClass::Presale,
        }
    }

    fn open_phase(&self) -> Phase {
        match self {
            Contribution::Native { .. } => Phase::Crowdsale,
            Contribution::Fiat { .. } => Phase::PreSale,
        }
    }
}

/// Receipt of an accepted contribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub beneficiary: Address,
    pub contribution: Contribution,
    pub bonus_rate: u32,
    /// `value * rate`
    pub base_tokens: Balance,
    /// `tokens - base_tokens`
    pub bonus_tokens: Balance,
    pub tokens: Balance,
    /// Funds destination recorded for native value.
    pub wallet: Address,
}

/// Credit computed against current state, applied only after every check passed.
struct PendingCredit {
    who: Address,
    record: HolderRecord,
    balance: Balance,
    total_supply: Balance,
}

/// Whole ledger state: configuration, halt flag, whitelist, sale totals,
/// balances, allowances and lockup records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSale {
    config: CampaignConfig,
    caps: CapPolicy,
    operator: Address,
    halted: bool,
    whitelist: Whitelist,
    totals: SaleTotals,
    total_supply: Balance,
    balances: BTreeMap<Address, Balance>,
    allowances: BTreeMap<Address, BTreeMap<Address, Balance>>,
    holders: BTreeMap<Address, HolderRecord>,
}

impl TokenSale {
    /// Validate the configuration, credit construction grants and hand the
    /// deployer its operator capability.
    pub fn new(config: CampaignConfig) -> Result<(Self, OperatorCap), SaleError> {
        config.validate()?;
        let caps = config.cap_policy()?;
        let grants = config.grants.clone();
        let mut sale = Self {
            operator: config.operator,
            config,
            caps,
            halted: false,
            whitelist: Whitelist::new(),
            totals: SaleTotals::default(),
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            holders: BTreeMap::new(),
        };
        for g in grants {
            let pending = sale.prepare_credit(g.beneficiary, g.class, g.amount, 0)?;
            sale.commit_credit(pending);
        }
        let cap = OperatorCap { operator: sale.operator };
        Ok((sale, cap))
    }

    /// Restore a ledger persisted with [`TokenSale::to_json`].
    ///
    /// Caps are re-derived from the configuration; a snapshot whose supply
    /// disagrees with its balances or awards is rejected.
    pub fn from_json(s: &str) -> Result<Self, SaleError> {
        let mut sale: Self = serde_json::from_str(s)
            .map_err(|e| SaleError::config(format!("snapshot: {e}")))?;
        sale.config.validate()?;
        sale.caps = sale.config.cap_policy()?;

        let held = sale
            .balances
            .values()
            .try_fold(0 as Balance, |acc, b| acc.checked_add(*b))
            .ok_or_else(|| SaleError::config("snapshot: balances overflow"))?;
        if held != sale.total_supply {
            return Err(SaleError::config("snapshot: total supply does not match balances"));
        }
        let awarded = sale
            .holders
            .values()
            .try_fold(0 as Balance, |acc, r| acc.checked_add(r.total_awarded))
            .ok_or_else(|| SaleError::config("snapshot: awards overflow"))?;
        if awarded != sale.total_supply {
            return Err(SaleError::config("snapshot: total supply does not match awards"));
        }
        Ok(sale)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    // ---------- Operator ----------

    /// Mint a capability for `caller` if it is the current operator.
    pub fn authorize(&self, caller: Address) -> Result<OperatorCap, SaleError> {
        if caller != self.operator {
            return Err(SaleError::Unauthorized);
        }
        Ok(OperatorCap { operator: caller })
    }

    fn check_operator(&self, cap: &OperatorCap) -> Result<(), SaleError> {
        if cap.operator != self.operator {
            return Err(SaleError::Unauthorized);
        }
        Ok(())
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Hand the operator role over. Capabilities of the previous operator stop working.
    pub fn transfer_operator(&mut self, cap: &OperatorCap, new_operator: Address) -> Result<(), SaleError> {
        self.check_operator(cap)?;
        if new_operator.is_zero() {
            return Err(SaleError::InvalidRecipient);
        }
        self.operator = new_operator;
        Ok(())
    }

    /// Idempotent.
    pub fn halt(&mut self, cap: &OperatorCap) -> Result<(), SaleError> {
        self.check_operator(cap)?;
        self.halted = true;
        Ok(())
    }

    /// Idempotent.
    pub fn unhalt(&mut self, cap: &OperatorCap) -> Result<(), SaleError> {
        self.check_operator(cap)?;
        self.halted = false;
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Admit `add`, then revoke `remove` (removal wins). Returns the final flag
    /// of every touched address.
    pub fn set_whitelist(
        &mut self,
        cap: &OperatorCap,
        add: &[Address],
        remove: &[Address],
    ) -> Result<Vec<(Address, bool)>, SaleError> {
        self.check_operator(cap)?;
        Ok(self.whitelist.apply(add, remove))
    }

    pub fn is_whitelisted(&self, who: &Address) -> bool {
        self.whitelist.contains(who)
    }

    // ---------- Admission ----------

    /// Native purchase for the caller.
    pub fn buy(&mut self, contributor: Address, value: Balance, now: Timestamp) -> Result<Purchase, SaleError> {
        self.buy_tokens(contributor, contributor, value, now)
    }

    /// Native purchase paid by `payer` and credited to `beneficiary`.
    pub fn buy_tokens(
        &mut self,
        payer: Address,
        beneficiary: Address,
        value: Balance,
        now: Timestamp,
    ) -> Result<Purchase, SaleError> {
        self.issue(beneficiary, Contribution::Native { payer, value }, now)
    }

    /// Operator-attested presale purchase.
    pub fn buy_tokens_with_fiat(
        &mut self,
        cap: &OperatorCap,
        contributor: Address,
        reported_value: Balance,
        bonus_rate: u32,
        now: Timestamp,
    ) -> Result<Purchase, SaleError> {
        self.check_operator(cap)?;
        self.issue(contributor, Contribution::Fiat { reported_value, bonus_rate }, now)
    }

    /// Check every admission rule for `contribution`; returns the bonus rate to apply.
    fn admit(&self, beneficiary: &Address, contribution: &Contribution, now: Timestamp) -> Result<u32, SaleError> {
        if self.halted {
            return Err(SaleError::Halted);
        }
        let phase = self.phase(now);
        if phase != contribution.open_phase() {
            return Err(SaleError::PhaseNotOpen { phase });
        }
        if !self.whitelist.contains(beneficiary) {
            return Err(SaleError::NotWhitelisted);
        }
        let minimum = match contribution {
            Contribution::Native { .. } => self.config.min_contribution,
            Contribution::Fiat { .. } => self.config.min_presale_contribution,
        };
        let amount = contribution.value();
        if amount < minimum {
            return Err(SaleError::BelowMinimumContribution { amount, minimum });
        }
        match *contribution {
            Contribution::Native { value, .. } => Ok(self.config.bonus.rate_for(value)),
            Contribution::Fiat { bonus_rate, .. } if bonus_rate <= PERCENT => {
                Err(SaleError::InvalidBonusRate(bonus_rate))
            }
            Contribution::Fiat { bonus_rate, .. } => Ok(bonus_rate),
        }
    }

    /// Shared issuance routine for both channels.
    fn issue(&mut self, beneficiary: Address, contribution: Contribution, now: Timestamp) -> Result<Purchase, SaleError> {
        let bonus_rate = self.admit(&beneficiary, &contribution, now)?;
        let value = contribution.value();
        let tokens = tokens_for(value, bonus_rate, self.config.rate).ok_or(SaleError::ArithmeticOverflow)?;
        let base_tokens = value.checked_mul(self.config.rate).ok_or(SaleError::ArithmeticOverflow)?;
        let bonus_tokens = tokens.checked_sub(base_tokens).ok_or(SaleError::ArithmeticOverflow)?;

        let pending = self.prepare_credit(beneficiary, contribution.vesting_class(), base_tokens, bonus_tokens)?;
        self.totals.record_sale(&self.caps, contribution.channel(), value, tokens)?;
        self.commit_credit(pending);

        Ok(Purchase {
            beneficiary,
            contribution,
            bonus_rate,
            base_tokens,
            bonus_tokens,
            tokens,
            wallet: self.config.wallet,
        })
    }

    fn prepare_credit(
        &self,
        who: Address,
        class: VestingClass,
        base: Balance,
        bonus: Balance,
    ) -> Result<PendingCredit, SaleError> {
        let amount = base.checked_add(bonus).ok_or(SaleError::ArithmeticOverflow)?;
        let mut record = self.holders.get(&who).cloned().unwrap_or_else(|| HolderRecord::new(class));
        record.credit(base, bonus)?;
        let balance = self.balance_of(&who).checked_add(amount).ok_or(SaleError::ArithmeticOverflow)?;
        let total_supply = self.total_supply.checked_add(amount).ok_or(SaleError::ArithmeticOverflow)?;
        Ok(PendingCredit { who, record, balance, total_supply })
    }

    fn commit_credit(&mut self, p: PendingCredit) {
        self.holders.insert(p.who, p.record);
        self.balances.insert(p.who, p.balance);
        self.total_supply = p.total_supply;
    }

    // ---------- Token surface ----------

    pub fn balance_of(&self, who: &Address) -> Balance {
        self.balances.get(who).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Balance {
        self.total_supply
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Balance {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: Balance) -> Result<(), SaleError> {
        if spender.is_zero() {
            return Err(SaleError::InvalidRecipient);
        }
        self.allowances.entry(owner).or_default().insert(spender, amount);
        Ok(())
    }

    /// Move `amount` from `from`, keeping at least the still-locked part of its award.
    pub fn transfer(&mut self, from: Address, to: Address, amount: Balance, now: Timestamp) -> Result<(), SaleError> {
        self.move_tokens(from, to, amount, now)
    }

    /// Spend an allowance. The lockup gate applies to `from`.
    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Balance,
        now: Timestamp,
    ) -> Result<(), SaleError> {
        let allowed = self.allowance(&from, &spender);
        if amount > allowed {
            return Err(SaleError::InsufficientAllowance);
        }
        self.move_tokens(from, to, amount, now)?;
        self.allowances.entry(from).or_default().insert(spender, allowed - amount);
        Ok(())
    }

    fn move_tokens(&mut self, from: Address, to: Address, amount: Balance, now: Timestamp) -> Result<(), SaleError> {
        if to.is_zero() {
            return Err(SaleError::InvalidRecipient);
        }
        let from_balance = self.balance_of(&from);
        if amount > from_balance {
            return Err(SaleError::InsufficientBalance);
        }
        let available = from_balance.saturating_sub(self.locked_amount(&from, now)?);
        if amount > available {
            return Err(SaleError::InsufficientReleasableBalance { requested: amount, available });
        }

        let updated = match self.holders.get(&from) {
            Some(rec) => {
                let mut rec = rec.clone();
                rec.note_transfer(self.schedule(rec.class), self.config.lockup_anchor(), now)?;
                Some(rec)
            }
            None => None,
        };
        let to_balance = if from == to {
            from_balance
        } else {
            self.balance_of(&to).checked_add(amount).ok_or(SaleError::ArithmeticOverflow)?
        };

        if from != to {
            self.balances.insert(from, from_balance - amount);
            self.balances.insert(to, to_balance);
        }
        if let Some(rec) = updated {
            self.holders.insert(from, rec);
        }
        Ok(())
    }

    // ---------- Sale ledger queries ----------

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn caps(&self) -> &CapPolicy {
        &self.caps
    }

    pub fn totals(&self) -> &SaleTotals {
        &self.totals
    }

    pub fn phase(&self, now: Timestamp) -> Phase {
        self.config.windows.phase_at(now)
    }

    /// Native plus fiat-attested value.
    pub fn ether_raised(&self) -> Balance {
        self.totals.value_raised()
    }

    pub fn native_raised(&self) -> Balance {
        self.totals.native_raised()
    }

    pub fn token_sold(&self) -> Balance {
        self.totals.tokens_sold()
    }

    pub fn soft_cap_reached(&self) -> bool {
        self.totals.soft_cap_reached(&self.caps)
    }

    pub fn hard_cap_reached(&self) -> bool {
        self.totals.hard_cap_reached(&self.caps)
    }

    pub fn calculate_bonus_rate(&self, value: Balance) -> u32 {
        self.config.bonus.rate_for(value)
    }

    pub fn calculate_tokens(&self, value: Balance) -> Result<Balance, SaleError> {
        tokens_for(value, self.calculate_bonus_rate(value), self.config.rate).ok_or(SaleError::ArithmeticOverflow)
    }

    // ---------- Lockup queries ----------

    fn schedule(&self, class: VestingClass) -> &TrancheSchedule {
        self.config.vesting.schedule_for(class)
    }

    pub fn holder(&self, who: &Address) -> Option<&HolderRecord> {
        self.holders.get(who)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&Address, &HolderRecord)> {
        self.holders.iter()
    }

    pub fn lockup_period(&self, who: &Address) -> u32 {
        self.holders
            .get(who)
            .map(|r| self.schedule(r.class).lockup_period())
            .unwrap_or(0)
    }

    pub fn lockup_released_token_amount(&self, who: &Address) -> Balance {
        self.holders.get(who).map(|r| r.released).unwrap_or(0)
    }

    pub fn lockup_total_token_amount(&self, who: &Address) -> Balance {
        self.holders.get(who).map(|r| r.total_awarded).unwrap_or(0)
    }

    /// Amount released by each tranche of the holder's table.
    pub fn lockup_releasable_tokens(&self, who: &Address) -> Result<Vec<Balance>, SaleError> {
        match self.holders.get(who) {
            Some(r) => Ok(self.schedule(r.class).tranche_amounts(r.base_awarded, r.bonus_awarded)?),
            None => Ok(Vec::new()),
        }
    }

    /// `(unlock time, cumulative released)` for each tranche.
    pub fn lockup_schedule(&self, who: &Address) -> Result<Vec<(Timestamp, Balance)>, SaleError> {
        let Some(r) = self.holders.get(who) else {
            return Ok(Vec::new());
        };
        let s = self.schedule(r.class);
        let times = s.unlock_times(self.config.lockup_anchor());
        let cumulative = s.cumulative(r.base_awarded, r.bonus_awarded)?;
        Ok(times.into_iter().zip(cumulative).collect())
    }

    /// Unlocked part of the holder's award at `now`.
    pub fn releasable_amount(&self, who: &Address, now: Timestamp) -> Result<Balance, SaleError> {
        match self.holders.get(who) {
            Some(r) => Ok(r.releasable_at(self.schedule(r.class), self.config.lockup_anchor(), now)?),
            None => Ok(0),
        }
    }

    /// Part of the holder's award that must stay put at `now`.
    pub fn locked_amount(&self, who: &Address, now: Timestamp) -> Result<Balance, SaleError> {
        match self.holders.get(who) {
            Some(r) => Ok(r.locked_at(self.schedule(r.class), self.config.lockup_anchor(), now)?),
            None => Ok(0),
        }
    }

    pub fn lockup_is_locked(&self, who: &Address, now: Timestamp) -> Result<bool, SaleError> {
        Ok(self.locked_amount(who, now)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{addr, ether, reference_config, DAY};
    use crate::UNIT;

    const RATE: Balance = 5000;
    const PERIOD: u64 = 150 * DAY;

    fn sale() -> (TokenSale, OperatorCap) {
        TokenSale::new(reference_config()).unwrap()
    }

    fn crowdsale(s: &TokenSale) -> Timestamp {
        s.config().windows.crowdsale_start
    }

    fn presale(s: &TokenSale) -> Timestamp {
        s.config().windows.pre_sale_start
    }

    fn end(s: &TokenSale) -> Timestamp {
        s.config().windows.crowdsale_end
    }

    #[test]
    fn construction_credits_team_grant_outside_sale_counters() {
        let (s, cap) = sale();
        let op = addr(0x01);
        assert_eq!(cap.operator(), op);
        assert_eq!(s.balance_of(&op), 245_000_000 * UNIT);
        assert_eq!(s.total_supply(), 245_000_000 * UNIT);
        assert_eq!(s.token_sold(), 0);
        assert_eq!(s.ether_raised(), 0);
        assert_eq!(s.lockup_period(&op), 5);
        assert_eq!(s.lockup_released_token_amount(&op), 0);
        assert_eq!(s.lockup_total_token_amount(&op), s.balance_of(&op));
        assert!(s.lockup_is_locked(&op, end(&s)).unwrap());
        assert_eq!(s.lockup_releasable_tokens(&op).unwrap(), vec![49_000_000 * UNIT; 5]);
    }

    #[test]
    fn construction_rejects_invalid_configs() {
        let mut cfg = reference_config();
        std::mem::swap(&mut cfg.soft_cap, &mut cfg.hard_cap);
        assert!(matches!(TokenSale::new(cfg), Err(SaleError::InvalidConfiguration(_))));
    }

    #[test]
    fn whitelist_is_operator_only() {
        let (mut s, cap) = sale();
        let stranger = addr(0x77);
        assert_eq!(s.authorize(stranger), Err(SaleError::Unauthorized));
        s.set_whitelist(&cap, &[addr(3)], &[]).unwrap();
        assert!(s.is_whitelisted(&addr(3)));
        s.set_whitelist(&cap, &[], &[addr(3)]).unwrap();
        assert!(!s.is_whitelisted(&addr(3)));
    }

    #[test]
    fn native_buy_during_crowdsale() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let min = UNIT / 10;
        let p = s.buy(inv, min, crowdsale(&s)).unwrap();
        assert_eq!(p.tokens, min * RATE);
        assert_eq!(p.bonus_rate, 100);
        assert_eq!(p.bonus_tokens, 0);
        assert_eq!(p.wallet, addr(0x02));
        assert_eq!(s.balance_of(&inv), min * RATE);
        assert_eq!(s.ether_raised(), min);
        assert_eq!(s.native_raised(), min);
        assert_eq!(s.token_sold(), min * RATE);
        assert_eq!(s.holder(&inv).unwrap().class, VestingClass::PublicSale);
    }

    #[test]
    fn native_buy_applies_bonus_tier() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let p = s.buy(inv, ether(15), crowdsale(&s)).unwrap();
        assert_eq!(p.bonus_rate, 125);
        assert_eq!(p.tokens, ether(15) * 125 / 100 * RATE);
        assert_eq!(p.base_tokens, ether(15) * RATE);
        assert_eq!(p.bonus_tokens, p.tokens - p.base_tokens);
        assert_eq!(s.calculate_tokens(ether(15)).unwrap(), p.tokens);
    }

    #[test]
    fn buy_tokens_credits_beneficiary() {
        let (mut s, cap) = sale();
        let (payer, inv) = (addr(0x30), addr(0x31));
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let p = s.buy_tokens(payer, inv, UNIT, crowdsale(&s)).unwrap();
        assert_eq!(p.contribution, Contribution::Native { payer, value: UNIT });
        assert_eq!(s.balance_of(&inv), UNIT * RATE);
        assert_eq!(s.balance_of(&payer), 0);
        assert_eq!(s.buy_tokens(inv, payer, UNIT, crowdsale(&s)), Err(SaleError::NotWhitelisted));
    }

    #[test]
    fn admission_rejections_leave_state_unchanged() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        let min = UNIT / 10;
        let before = s.clone();

        assert_eq!(s.buy(inv, min, presale(&s) - 1), Err(SaleError::PhaseNotOpen { phase: Phase::NotStarted }));
        assert_eq!(s.buy(inv, min, presale(&s)), Err(SaleError::PhaseNotOpen { phase: Phase::PreSale }));
        assert_eq!(s.buy(inv, min, crowdsale(&s)), Err(SaleError::NotWhitelisted));
        assert_eq!(s, before);

        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let before = s.clone();
        assert_eq!(
            s.buy(inv, min - 1, crowdsale(&s)),
            Err(SaleError::BelowMinimumContribution { amount: min - 1, minimum: min })
        );
        assert_eq!(s.buy(inv, min, end(&s)), Err(SaleError::PhaseNotOpen { phase: Phase::Ended }));
        assert_eq!(s, before);
    }

    #[test]
    fn halt_blocks_every_admission_until_unhalted() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        s.halt(&cap).unwrap();
        s.halt(&cap).unwrap();
        assert!(s.is_halted());
        assert_eq!(s.buy(inv, UNIT, crowdsale(&s)), Err(SaleError::Halted));
        assert_eq!(s.buy(inv, UNIT, 0), Err(SaleError::Halted));
        assert_eq!(
            s.buy_tokens_with_fiat(&cap, inv, ether(20), 120, presale(&s)),
            Err(SaleError::Halted)
        );
        s.unhalt(&cap).unwrap();
        assert!(s.buy(inv, UNIT, crowdsale(&s)).is_ok());
    }

    #[test]
    fn fiat_purchase_during_presale() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let supply_before = s.total_supply();
        let p = s.buy_tokens_with_fiat(&cap, inv, ether(20), 120, presale(&s)).unwrap();
        let expected = ether(20) * 120 / 100 * RATE;
        assert_eq!(p.tokens, expected);
        assert_eq!(s.balance_of(&inv), expected);
        assert_eq!(s.ether_raised(), ether(20));
        assert_eq!(s.native_raised(), 0);
        assert_eq!(s.token_sold(), expected);
        assert_eq!(s.total_supply(), supply_before + expected);

        assert_eq!(s.lockup_period(&inv), 1);
        assert_eq!(s.lockup_released_token_amount(&inv), 0);
        assert_eq!(s.lockup_total_token_amount(&inv), expected);
        assert!(s.lockup_is_locked(&inv, presale(&s)).unwrap());
        assert_eq!(
            s.lockup_releasable_tokens(&inv).unwrap(),
            vec![ether(20 * 5000), ether(20 * 5000) / 5]
        );
    }

    #[test]
    fn fiat_rejections() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        let t = presale(&s);

        assert_eq!(
            s.buy_tokens_with_fiat(&cap, inv, ether(20), 110, t - 3 * DAY),
            Err(SaleError::PhaseNotOpen { phase: Phase::NotStarted })
        );
        assert_eq!(s.buy_tokens_with_fiat(&cap, inv, ether(20), 110, t), Err(SaleError::NotWhitelisted));
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        assert!(matches!(
            s.buy_tokens_with_fiat(&cap, inv, UNIT / 10, 110, t),
            Err(SaleError::BelowMinimumContribution { .. })
        ));
        assert_eq!(s.buy_tokens_with_fiat(&cap, inv, ether(20), 100, t), Err(SaleError::InvalidBonusRate(100)));
        assert_eq!(
            s.buy_tokens_with_fiat(&cap, inv, ether(20), 120, crowdsale(&s)),
            Err(SaleError::PhaseNotOpen { phase: Phase::Crowdsale })
        );
        assert_eq!(s.token_sold(), 0);
        assert_eq!(s.balance_of(&inv), 0);
        assert!(s.holder(&inv).is_none());
    }

    #[test]
    fn fiat_is_bounded_by_token_sale_amount_not_value_cap() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let t = presale(&s);

        let over = ether(25_500) + UNIT / 100;
        assert_eq!(s.buy_tokens_with_fiat(&cap, inv, over, 200, t), Err(SaleError::CapExceeded));
        assert_eq!(s.token_sold(), 0);

        let p = s.buy_tokens_with_fiat(&cap, inv, ether(25_500), 200, t).unwrap();
        assert_eq!(p.tokens, 255_000_000 * UNIT);
        assert_eq!(s.token_sold(), s.caps().token_ceiling);
        assert_eq!(s.native_raised(), 0);
        assert!(s.hard_cap_reached());

        let cs = crowdsale(&s);
        assert_eq!(s.buy(inv, UNIT / 10, cs), Err(SaleError::CapExceeded));
    }

    #[test]
    fn stale_capability_is_rejected_after_operator_change() {
        let (mut s, cap) = sale();
        let next = addr(0x09);
        s.transfer_operator(&cap, next).unwrap();
        assert_eq!(s.operator(), next);
        assert_eq!(s.halt(&cap), Err(SaleError::Unauthorized));
        let new_cap = s.authorize(next).unwrap();
        s.halt(&new_cap).unwrap();
        assert_eq!(s.transfer_operator(&new_cap, Address::ZERO), Err(SaleError::InvalidRecipient));
    }

    #[test]
    fn stale_capability_cannot_report_fiat() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let next = addr(0x09);
        s.transfer_operator(&cap, next).unwrap();
        let before = s.clone();

        let t = presale(&s);
        assert_eq!(s.buy_tokens_with_fiat(&cap, inv, ether(20), 120, t), Err(SaleError::Unauthorized));
        assert_eq!(s, before);

        let new_cap = s.authorize(next).unwrap();
        s.buy_tokens_with_fiat(&new_cap, inv, ether(20), 120, t).unwrap();
        assert_eq!(s.balance_of(&inv), ether(20) * 120 / 100 * RATE);
    }

    #[test]
    fn hard_cap_blocks_native_overflow() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let t = crowdsale(&s);
        s.buy(inv, ether(4), t).unwrap();
        let before = s.clone();
        assert_eq!(s.buy(inv, ether(67), t), Err(SaleError::CapExceeded));
        assert_eq!(s, before);
        assert!(!s.hard_cap_reached());
        assert!(!s.soft_cap_reached());

        s.buy(inv, ether(66), t).unwrap();
        assert_eq!(s.native_raised(), ether(70));
        assert!(s.hard_cap_reached());
        assert_eq!(s.buy(inv, UNIT / 10, t), Err(SaleError::CapExceeded));
    }

    #[test]
    fn derived_token_ceiling_applies_to_native_bonus() {
        let mut cfg = reference_config();
        cfg.token_sale_cap = None;
        let (mut s, cap) = TokenSale::new(cfg).unwrap();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let t = crowdsale(&s);
        s.buy(inv, ether(4), t).unwrap();
        // fits the value cap exactly, but the 125% bonus overshoots hard_cap * rate
        assert_eq!(s.buy(inv, ether(66), t), Err(SaleError::CapExceeded));
        assert_eq!(s.native_raised(), ether(4));
    }

    #[test]
    fn team_tranches_gate_transfers() {
        let (mut s, _) = sale();
        let (op, to) = (addr(0x01), addr(0x20));
        let tranche = 49_000_000 * UNIT;
        let anchor = end(&s);

        assert!(matches!(
            s.transfer(op, to, 1, anchor + 1),
            Err(SaleError::InsufficientReleasableBalance { requested: 1, available: 0 })
        ));
        for k in 1..=5u64 {
            let t = anchor + k * PERIOD;
            assert!(s.transfer(op, to, tranche + 1, t).is_err());
            s.transfer(op, to, tranche, t).unwrap();
            assert!(matches!(
                s.transfer(op, to, UNIT, t),
                Err(SaleError::InsufficientReleasableBalance { .. })
            ));
            assert_eq!(s.lockup_released_token_amount(&op), tranche * k as u128);
        }
        assert_eq!(s.balance_of(&to), 245_000_000 * UNIT);
        assert!(!s.lockup_is_locked(&op, anchor + 5 * PERIOD).unwrap());
    }

    #[test]
    fn bonus_stays_locked_one_period_after_end() {
        let (mut s, cap) = sale();
        let (inv, other) = (addr(0x10), addr(0x11));
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        let p = s.buy_tokens_with_fiat(&cap, inv, ether(20), 120, presale(&s)).unwrap();
        let anchor = end(&s);

        assert!(s.transfer(inv, other, 1, anchor - 1).is_err());
        assert!(s.transfer(inv, other, p.tokens, anchor + 60 * DAY + 1).is_err());
        assert_eq!(s.balance_of(&other), 0);
        assert!(s.lockup_is_locked(&inv, anchor + 60 * DAY + 1).unwrap());

        s.transfer(inv, other, p.base_tokens, anchor + 60 * DAY + 1).unwrap();
        assert!(s.transfer(inv, other, 1, anchor + 60 * DAY + 1).is_err());

        let later = anchor + PERIOD + 1;
        s.transfer(inv, other, p.bonus_tokens, later).unwrap();
        assert_eq!(s.balance_of(&other), p.tokens);
        assert!(!s.lockup_is_locked(&inv, later).unwrap());
        assert_eq!(s.lockup_released_token_amount(&inv), p.tokens);
    }

    #[test]
    fn received_tokens_are_freely_transferable() {
        let (mut s, _) = sale();
        let (op, a, b) = (addr(0x01), addr(0x40), addr(0x41));
        let t = end(&s) + PERIOD;
        s.transfer(op, a, 1_000, t).unwrap();
        // `a` has no award, so nothing is locked for it
        s.transfer(a, b, 1_000, end(&s)).unwrap();
        assert_eq!(s.balance_of(&b), 1_000);
        assert!(s.holder(&a).is_none());
        assert_eq!(s.transfer(a, b, 1, t), Err(SaleError::InsufficientBalance));
    }

    #[test]
    fn transfer_to_zero_or_self() {
        let (mut s, _) = sale();
        let op = addr(0x01);
        let t = end(&s) + PERIOD;
        assert_eq!(s.transfer(op, Address::ZERO, 1, t), Err(SaleError::InvalidRecipient));
        let before = s.balance_of(&op);
        s.transfer(op, op, 10, t).unwrap();
        assert_eq!(s.balance_of(&op), before);
    }

    #[test]
    fn allowance_flow_respects_lockup() {
        let (mut s, _) = sale();
        let (op, spender, to) = (addr(0x01), addr(0x50), addr(0x51));
        let tranche = 49_000_000 * UNIT;
        let t = end(&s) + PERIOD;

        s.approve(op, spender, 2 * tranche).unwrap();
        assert_eq!(s.allowance(&op, &spender), 2 * tranche);
        assert!(matches!(
            s.transfer_from(spender, op, to, 2 * tranche, t),
            Err(SaleError::InsufficientReleasableBalance { .. })
        ));
        assert_eq!(s.allowance(&op, &spender), 2 * tranche);
        s.transfer_from(spender, op, to, tranche, t).unwrap();
        assert_eq!(s.allowance(&op, &spender), tranche);
        assert_eq!(
            s.transfer_from(spender, op, to, tranche + 1, t + PERIOD),
            Err(SaleError::InsufficientAllowance)
        );
        assert_eq!(s.approve(op, Address::ZERO, 1), Err(SaleError::InvalidRecipient));
    }

    #[test]
    fn issued_supply_matches_awards() {
        let (mut s, cap) = sale();
        let (a, b) = (addr(0x10), addr(0x11));
        s.set_whitelist(&cap, &[a, b], &[]).unwrap();
        s.buy_tokens_with_fiat(&cap, a, ether(20), 130, presale(&s)).unwrap();
        s.buy(b, ether(7), crowdsale(&s)).unwrap();
        s.buy(a, ether(11), crowdsale(&s)).unwrap();

        let awarded: Balance = s.holders().map(|(_, r)| r.total_awarded).sum();
        assert_eq!(awarded, s.total_supply());
        let granted = 245_000_000 * UNIT;
        assert_eq!(s.token_sold(), s.total_supply() - granted);
        let rec = s.holder(&a).unwrap();
        assert_eq!(rec.class, VestingClass::Presale);
        assert_eq!(rec.base_awarded + rec.bonus_awarded, rec.total_awarded);
    }

    #[test]
    fn cumulative_schedule_view() {
        let (s, _) = sale();
        let op = addr(0x01);
        let view = s.lockup_schedule(&op).unwrap();
        assert_eq!(view.len(), 5);
        assert_eq!(view[0], (end(&s) + PERIOD, 49_000_000 * UNIT));
        assert_eq!(view[4], (end(&s) + 5 * PERIOD, 245_000_000 * UNIT));
        assert!(s.lockup_schedule(&addr(0x99)).unwrap().is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        s.buy(inv, ether(5), crowdsale(&s)).unwrap();
        let json = s.to_json().unwrap();
        let restored = TokenSale::from_json(&json).unwrap();
        assert_eq!(restored, s);
        assert!(TokenSale::from_json("{}").is_err());
    }

    #[test]
    fn restore_rederives_caps_and_checks_supply() {
        let (mut s, cap) = sale();
        let inv = addr(0x10);
        s.set_whitelist(&cap, &[inv], &[]).unwrap();
        s.buy(inv, ether(5), crowdsale(&s)).unwrap();

        let mut tampered = s.clone();
        tampered.caps.hard_cap = Balance::MAX;
        let restored = TokenSale::from_json(&tampered.to_json().unwrap()).unwrap();
        assert_eq!(restored.caps(), s.caps());
        assert_eq!(restored, s);

        let mut tampered = s.clone();
        tampered.total_supply += 1;
        assert!(matches!(
            TokenSale::from_json(&tampered.to_json().unwrap()),
            Err(SaleError::InvalidConfiguration(_))
        ));

        let mut tampered = s.clone();
        *tampered.balances.get_mut(&inv).unwrap() += 1;
        tampered.total_supply += 1;
        assert!(TokenSale::from_json(&tampered.to_json().unwrap()).is_err());
    }
}
