//! Journal replay and status reports.
//!
//! A journal is a JSON array of timestamped operations applied in order to a
//! fresh ledger under a [`ManualClock`]. Operator operations name a `caller`,
//! which must hold the operator role at that point of the journal.
//!
//! ```json
//! [
//!   {"at": 1700432000, "op": "whitelist", "caller": "0x01..", "add": ["0x10.."]},
//!   {"at": 1702937600, "op": "buy", "from": "0x10..", "value": "1e18"}
//! ]
//! ```
//!
//! Amounts above `u64::MAX` must be given as strings.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    campaign::CampaignConfig,
    engine::SaleEngine,
    error::SaleError,
    phase::Phase,
    sale::{Purchase, TokenSale},
    settings::amount,
    Address, Balance, ManualClock, Timestamp,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: Timestamp,
    #[serde(flatten)]
    pub op: JournalOp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    Whitelist {
        caller: Address,
        #[serde(default)]
        add: Vec<Address>,
        #[serde(default)]
        remove: Vec<Address>,
    },
    Buy {
        from: Address,
        #[serde(with = "amount")]
        value: Balance,
    },
    BuyTokens {
        payer: Address,
        beneficiary: Address,
        #[serde(with = "amount")]
        value: Balance,
    },
    Fiat {
        caller: Address,
        beneficiary: Address,
        #[serde(with = "amount")]
        value: Balance,
        bonus_rate: u32,
    },
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "amount")]
        amount: Balance,
    },
    Approve {
        owner: Address,
        spender: Address,
        #[serde(with = "amount")]
        amount: Balance,
    },
    TransferFrom {
        spender: Address,
        from: Address,
        to: Address,
        #[serde(with = "amount")]
        amount: Balance,
    },
    Halt {
        caller: Address,
    },
    Unhalt {
        caller: Address,
    },
    TransferOperator {
        caller: Address,
        to: Address,
    },
}

impl JournalOp {
    pub fn name(&self) -> &'static str {
        match self {
            JournalOp::Whitelist { .. } => "whitelist",
            JournalOp::Buy { .. } => "buy",
            JournalOp::BuyTokens { .. } => "buy_tokens",
            JournalOp::Fiat { .. } => "fiat",
            JournalOp::Transfer { .. } => "transfer",
            JournalOp::Approve { .. } => "approve",
            JournalOp::TransferFrom { .. } => "transfer_from",
            JournalOp::Halt { .. } => "halt",
            JournalOp::Unhalt { .. } => "unhalt",
            JournalOp::TransferOperator { .. } => "transfer_operator",
        }
    }
}

/// Result of one journal entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub index: usize,
    pub at: Timestamp,
    pub op: &'static str,
    /// `None` when accepted.
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<Purchase>,
}

impl Outcome {
    pub fn accepted(&self) -> bool {
        self.error.is_none()
    }
}

/// Point-in-time summary of the sale ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SaleStatus {
    pub at: Timestamp,
    pub phase: Phase,
    pub halted: bool,
    pub operator: Address,
    #[serde(with = "amount")]
    pub soft_cap: Balance,
    #[serde(with = "amount")]
    pub hard_cap: Balance,
    #[serde(with = "amount")]
    pub token_ceiling: Balance,
    #[serde(with = "amount")]
    pub value_raised: Balance,
    #[serde(with = "amount")]
    pub native_raised: Balance,
    #[serde(with = "amount")]
    pub fiat_raised: Balance,
    #[serde(with = "amount")]
    pub tokens_sold: Balance,
    #[serde(with = "amount")]
    pub total_supply: Balance,
    pub soft_cap_reached: bool,
    pub hard_cap_reached: bool,
}

impl SaleStatus {
    pub fn capture(sale: &TokenSale, at: Timestamp) -> Self {
        let caps = sale.caps();
        Self {
            at,
            phase: sale.phase(at),
            halted: sale.is_halted(),
            operator: sale.operator(),
            soft_cap: caps.soft_cap,
            hard_cap: caps.hard_cap,
            token_ceiling: caps.token_ceiling,
            value_raised: sale.ether_raised(),
            native_raised: sale.native_raised(),
            fiat_raised: sale.totals().fiat_raised(),
            tokens_sold: sale.token_sold(),
            total_supply: sale.total_supply(),
            soft_cap_reached: sale.soft_cap_reached(),
            hard_cap_reached: sale.hard_cap_reached(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplayReport {
    pub outcomes: Vec<Outcome>,
    pub status: SaleStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("journal entry {index} at {at} is earlier than {previous}")]
    OutOfOrder { index: usize, at: Timestamp, previous: Timestamp },
    #[error(transparent)]
    Sale(#[from] SaleError),
}

pub fn parse_journal(json: &str) -> serde_json::Result<Vec<JournalEntry>> {
    serde_json::from_str(json)
}

/// Apply `entries` to a fresh ledger built from `config`. Rejected operations
/// are reported and skipped; only a malformed timeline aborts the replay.
pub fn replay(
    config: CampaignConfig,
    entries: &[JournalEntry],
) -> Result<(ReplayReport, Arc<SaleEngine<ManualClock>>), ReplayError> {
    let start = entries.first().map(|e| e.at).unwrap_or(0);
    let clock = Arc::new(ManualClock::new(start));
    let (engine, _) = SaleEngine::new(config, clock.clone(), entries.len().max(1))?;

    let mut outcomes = Vec::with_capacity(entries.len());
    let mut previous = start;
    for (index, entry) in entries.iter().enumerate() {
        if entry.at < previous {
            return Err(ReplayError::OutOfOrder { index, at: entry.at, previous });
        }
        previous = entry.at;
        clock.set(entry.at);

        let result = apply(&engine, &entry.op);
        outcomes.push(match result {
            Ok(purchase) => Outcome { index, at: entry.at, op: entry.op.name(), error: None, purchase },
            Err(e) => Outcome { index, at: entry.at, op: entry.op.name(), error: Some(e.kind()), purchase: None },
        });
    }

    let status = engine.read(|s| SaleStatus::capture(s, previous));
    Ok((ReplayReport { outcomes, status }, engine))
}

fn apply(engine: &SaleEngine<ManualClock>, op: &JournalOp) -> Result<Option<Purchase>, SaleError> {
    match op {
        JournalOp::Whitelist { caller, add, remove } => {
            let cap = engine.authorize(*caller)?;
            engine.set_whitelist(&cap, add, remove)?;
        }
        JournalOp::Buy { from, value } => return engine.buy(*from, *value).map(Some),
        JournalOp::BuyTokens { payer, beneficiary, value } => {
            return engine.buy_tokens(*payer, *beneficiary, *value).map(Some)
        }
        JournalOp::Fiat { caller, beneficiary, value, bonus_rate } => {
            let cap = engine.authorize(*caller)?;
            return engine.buy_tokens_with_fiat(&cap, *beneficiary, *value, *bonus_rate).map(Some);
        }
        JournalOp::Transfer { from, to, amount } => engine.transfer(*from, *to, *amount)?,
        JournalOp::Approve { owner, spender, amount } => engine.approve(*owner, *spender, *amount)?,
        JournalOp::TransferFrom { spender, from, to, amount } => {
            engine.transfer_from(*spender, *from, *to, *amount)?
        }
        JournalOp::Halt { caller } => {
            let cap = engine.authorize(*caller)?;
            engine.halt(&cap)?;
        }
        JournalOp::Unhalt { caller } => {
            let cap = engine.authorize(*caller)?;
            engine.unhalt(&cap)?;
        }
        JournalOp::TransferOperator { caller, to } => {
            let cap = engine.authorize(*caller)?;
            engine.transfer_operator(&cap, *to)?;
        }
    }
    Ok(None)
}
