//! Sale timeline.
//!
//! The phase is a pure function of the observed time and the four configured
//! boundaries. The halt switch is not part of it; lockup anchors
//! depend on the boundaries only.

use serde::{Deserialize, Serialize};

use crate::{error::SaleError, Timestamp};

/// Sale phase derived from current time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    PreSale,
    InterSalePause,
    Crowdsale,
    Ended,
}

/// Presale and crowdsale windows, half-open `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindows {
    pub pre_sale_start: Timestamp,
    pub pre_sale_end: Timestamp,
    pub crowdsale_start: Timestamp,
    pub crowdsale_end: Timestamp,
}

impl SaleWindows {
    /// Requires `pre_sale_start < pre_sale_end <= crowdsale_start < crowdsale_end`.
    pub fn validate(&self) -> Result<(), SaleError> {
        if self.pre_sale_start >= self.pre_sale_end {
            return Err(SaleError::config("pre_sale_start >= pre_sale_end"));
        }
        if self.pre_sale_end > self.crowdsale_start {
            return Err(SaleError::config("pre_sale_end > crowdsale_start"));
        }
        if self.crowdsale_start >= self.crowdsale_end {
            return Err(SaleError::config("crowdsale_start >= crowdsale_end"));
        }
        Ok(())
    }

    pub fn phase_at(&self, now: Timestamp) -> Phase {
        if now < self.pre_sale_start {
            return Phase::NotStarted;
        }
        if now < self.pre_sale_end {
            return Phase::PreSale;
        }
        if now < self.crowdsale_start {
            return Phase::InterSalePause;
        }
        if now < self.crowdsale_end {
            return Phase::Crowdsale;
        }
        Phase::Ended
    }
}
