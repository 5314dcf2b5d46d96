//! Token sale ledger core
//! Features:
//! - Sale timeline: presale -> pause -> crowdsale -> ended, resolved from four timestamps
//! - Admission: whitelist-only, per-channel minimums, operator halt switch
//! - Pricing: tiered bonus table (percent multipliers), fixed token rate
//! - Two contribution channels (native value, operator-attested fiat) sharing one cap check
//! - Lockups: per-class tranche tables anchored at crowdsale end, transfer gating
//! - Concurrency: parking_lot RwLock single-writer engine, events over tokio::broadcast
//!
//! Notes:
//! - The pure aggregate is [`TokenSale`]; every time-dependent call takes `now` explicitly.
//! - [`SaleEngine`] binds it to a [`Clock`] and serialises mutations.

#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

pub mod bonus;
pub mod campaign;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod phase;
pub mod replay;
pub mod sale;
pub mod settings;
pub mod telemetry;
pub mod vesting;
pub mod whitelist;

pub use bonus::{BonusSchedule, BonusTier, PERCENT};
pub use campaign::{CampaignConfig, Grant};
pub use engine::{SaleEngine, SaleEvent};
pub use error::SaleError;
pub use ledger::{CapPolicy, Channel, SaleTotals};
pub use phase::{Phase, SaleWindows};
pub use sale::{Contribution, OperatorCap, Purchase, TokenSale};
pub use vesting::{HolderRecord, Tranche, TrancheSchedule, VestingClass, VestingPolicy};
pub use whitelist::Whitelist;

// ---------- Primitives ----------

/// Smallest unit balance.
pub type Balance = u128;

/// Seconds since Unix epoch.
pub type Timestamp = u64;

/// 10^18, one whole unit of an 18-decimal amount.
pub const UNIT: Balance = 1_000_000_000_000_000_000;

/// 20-byte participant identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid address `{0}`")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out).map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------- Clock ----------

/// Read-only time source. The ledger never advances it.
pub trait Clock: Send + Sync + 'static {
    /// Current UNIX time (seconds).
    fn now_unix(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Settable clock for replays and tests. Refuses to move backwards.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    /// Move the clock to `t`; earlier values are ignored.
    pub fn set(&self, t: Timestamp) {
        self.now.fetch_max(t, Ordering::SeqCst);
    }

    /// Move forward by `secs`, stopping at `u64::MAX`.
    pub fn advance(&self, secs: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(secs)));
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

// ---------- Math helpers ----------

/// Compute (a * b) / d with checked u128 arithmetic; returns None on overflow or d == 0.
pub(crate) fn mul_div_u128(a: u128, b: u128, d: u128) -> Option<u128> {
    if d == 0 {
        return None;
    }
    a.checked_mul(b)?.checked_div(d)
}
