#![allow(dead_code)]

use tokensale_ledger::{
    Address, Balance, BonusSchedule, CampaignConfig, Grant, SaleWindows, Timestamp, VestingClass, VestingPolicy, UNIT,
};

pub const DAY: u64 = 86_400;
pub const PERIOD: u64 = 150 * DAY;
pub const RATE: Balance = 5000;
pub const T0: Timestamp = 1_700_000_000;

pub fn addr(x: u8) -> Address {
    let mut a = [0u8; 20];
    a[0] = x;
    Address(a)
}

pub fn units(whole: u128) -> Balance {
    whole * UNIT
}

pub fn operator() -> Address {
    addr(0x01)
}

pub fn team_grant() -> Balance {
    245_000_000 * UNIT
}

/// Half a billion tokens minus the team grant.
pub fn token_sale_amount() -> Balance {
    255_000_000 * UNIT
}

/// Presale opens 5 days after T0 and runs 4 weeks; crowdsale starts a day
/// later and runs 4 weeks.
pub fn campaign() -> CampaignConfig {
    let pre_sale_start = T0 + 5 * DAY;
    let pre_sale_end = pre_sale_start + 28 * DAY;
    let crowdsale_start = pre_sale_end + DAY;
    CampaignConfig {
        operator: operator(),
        wallet: addr(0x02),
        soft_cap: units(20),
        hard_cap: units(70),
        windows: SaleWindows {
            pre_sale_start,
            pre_sale_end,
            crowdsale_start,
            crowdsale_end: crowdsale_start + 28 * DAY,
        },
        rate: RATE,
        min_contribution: UNIT / 10,
        min_presale_contribution: units(20),
        bonus: BonusSchedule::reference(UNIT),
        token_sale_cap: Some(token_sale_amount()),
        vesting: VestingPolicy::default(),
        grants: vec![Grant { beneficiary: operator(), amount: team_grant(), class: VestingClass::Team }],
    }
}
