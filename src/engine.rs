//! Clock-bound, shareable front of [`TokenSale`].
//!
//! All mutations go through one `parking_lot::RwLock` write guard, so every
//! operation observes and leaves a consistent ledger. Time-dependent
//! mutations read the clock after taking the guard, so commit order never
//! runs against timestamp order. Events are sent while the guard is held and
//! therefore arrive in commit order.

use parking_lot::RwLock;
use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    campaign::CampaignConfig,
    error::SaleError,
    phase::Phase,
    sale::{OperatorCap, Purchase, TokenSale},
    Address, Balance, Clock, Timestamp,
};

// ---------- Events ----------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SaleEvent {
    Purchased(Purchase),
    Transferred { from: Address, to: Address, amount: Balance },
    Approved { owner: Address, spender: Address, amount: Balance },
    WhitelistUpdated { addr: Address, admitted: bool },
    Halted,
    Unhalted,
    OperatorChanged { from: Address, to: Address },
}

// ---------- Engine ----------

pub struct SaleEngine<C: Clock> {
    clock: Arc<C>,
    state: RwLock<TokenSale>,
    events_tx: broadcast::Sender<SaleEvent>,
}

impl<C: Clock> fmt::Debug for SaleEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.read();
        f.debug_struct("SaleEngine")
            .field("operator", &s.operator())
            .field("halted", &s.is_halted())
            .field("tokens_sold", &s.token_sold())
            .finish()
    }
}

impl<C: Clock> SaleEngine<C> {
    pub fn new(
        config: CampaignConfig,
        clock: Arc<C>,
        event_capacity: usize,
    ) -> Result<(Arc<Self>, OperatorCap), SaleError> {
        let (sale, cap) = TokenSale::new(config)?;
        info!(
            operator = %cap.operator(),
            supply = %sale.total_supply(),
            "token sale constructed"
        );
        Ok((Self::from_sale(sale, clock, event_capacity), cap))
    }

    /// Wrap an existing ledger, e.g. one restored from a snapshot.
    pub fn from_sale(sale: TokenSale, clock: Arc<C>, event_capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(event_capacity.max(1));
        Arc::new(Self { clock, state: RwLock::new(sale), events_tx: tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaleEvent> {
        self.events_tx.subscribe()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_unix()
    }

    /// Run a read-only query against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&TokenSale) -> R) -> R {
        f(&self.state.read())
    }

    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        self.state.read().to_json()
    }

    fn emit(&self, ev: SaleEvent) {
        let _ = self.events_tx.send(ev);
    }

    // ---------- Operator ----------

    pub fn authorize(&self, caller: Address) -> Result<OperatorCap, SaleError> {
        self.state.read().authorize(caller).map_err(|e| rejected("authorize", e))
    }

    pub fn halt(&self, cap: &OperatorCap) -> Result<(), SaleError> {
        let mut s = self.state.write();
        s.halt(cap).map_err(|e| rejected("halt", e))?;
        info!(operator = %cap.operator(), "sale halted");
        self.emit(SaleEvent::Halted);
        Ok(())
    }

    pub fn unhalt(&self, cap: &OperatorCap) -> Result<(), SaleError> {
        let mut s = self.state.write();
        s.unhalt(cap).map_err(|e| rejected("unhalt", e))?;
        info!(operator = %cap.operator(), "sale resumed");
        self.emit(SaleEvent::Unhalted);
        Ok(())
    }

    pub fn set_whitelist(&self, cap: &OperatorCap, add: &[Address], remove: &[Address]) -> Result<(), SaleError> {
        let mut s = self.state.write();
        let touched = s.set_whitelist(cap, add, remove).map_err(|e| rejected("set_whitelist", e))?;
        info!(added = add.len(), removed = remove.len(), "whitelist updated");
        for (addr, admitted) in touched {
            self.emit(SaleEvent::WhitelistUpdated { addr, admitted });
        }
        Ok(())
    }

    pub fn transfer_operator(&self, cap: &OperatorCap, new_operator: Address) -> Result<(), SaleError> {
        let mut s = self.state.write();
        let from = s.operator();
        s.transfer_operator(cap, new_operator).map_err(|e| rejected("transfer_operator", e))?;
        info!(%from, to = %new_operator, "operator changed");
        self.emit(SaleEvent::OperatorChanged { from, to: new_operator });
        Ok(())
    }

    // ---------- Admission ----------

    pub fn buy(&self, contributor: Address, value: Balance) -> Result<Purchase, SaleError> {
        self.buy_tokens(contributor, contributor, value)
    }

    pub fn buy_tokens(&self, payer: Address, beneficiary: Address, value: Balance) -> Result<Purchase, SaleError> {
        let mut s = self.state.write();
        let now = self.now();
        let p = s
            .buy_tokens(payer, beneficiary, value, now)
            .map_err(|e| rejected("buy_tokens", e))?;
        self.purchased(p)
    }

    pub fn buy_tokens_with_fiat(
        &self,
        cap: &OperatorCap,
        contributor: Address,
        reported_value: Balance,
        bonus_rate: u32,
    ) -> Result<Purchase, SaleError> {
        let mut s = self.state.write();
        let now = self.now();
        let p = s
            .buy_tokens_with_fiat(cap, contributor, reported_value, bonus_rate, now)
            .map_err(|e| rejected("buy_tokens_with_fiat", e))?;
        self.purchased(p)
    }

    fn purchased(&self, p: Purchase) -> Result<Purchase, SaleError> {
        info!(
            beneficiary = %p.beneficiary,
            channel = ?p.contribution.channel(),
            value = %p.contribution.value(),
            bonus_rate = p.bonus_rate,
            tokens = %p.tokens,
            "tokens purchased"
        );
        self.emit(SaleEvent::Purchased(p.clone()));
        Ok(p)
    }

    // ---------- Token surface ----------

    pub fn transfer(&self, from: Address, to: Address, amount: Balance) -> Result<(), SaleError> {
        let mut s = self.state.write();
        let now = self.now();
        s.transfer(from, to, amount, now).map_err(|e| rejected("transfer", e))?;
        debug!(%from, %to, %amount, "transfer");
        self.emit(SaleEvent::Transferred { from, to, amount });
        Ok(())
    }

    pub fn approve(&self, owner: Address, spender: Address, amount: Balance) -> Result<(), SaleError> {
        let mut s = self.state.write();
        s.approve(owner, spender, amount).map_err(|e| rejected("approve", e))?;
        self.emit(SaleEvent::Approved { owner, spender, amount });
        Ok(())
    }

    pub fn transfer_from(&self, spender: Address, from: Address, to: Address, amount: Balance) -> Result<(), SaleError> {
        let mut s = self.state.write();
        let now = self.now();
        s.transfer_from(spender, from, to, amount, now)
            .map_err(|e| rejected("transfer_from", e))?;
        debug!(%spender, %from, %to, %amount, "transfer_from");
        self.emit(SaleEvent::Transferred { from, to, amount });
        Ok(())
    }

    // ---------- Queries at the clock's time ----------

    pub fn phase(&self) -> Phase {
        let now = self.now();
        self.state.read().phase(now)
    }

    pub fn balance_of(&self, who: &Address) -> Balance {
        self.state.read().balance_of(who)
    }

    pub fn releasable_amount(&self, who: &Address) -> Result<Balance, SaleError> {
        let now = self.now();
        self.state.read().releasable_amount(who, now)
    }

    pub fn lockup_is_locked(&self, who: &Address) -> Result<bool, SaleError> {
        let now = self.now();
        self.state.read().lockup_is_locked(who, now)
    }
}

fn rejected(op: &'static str, err: SaleError) -> SaleError {
    debug!(op, kind = err.kind(), error = %err, "rejected");
    err
}
