//! Layered settings loader.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults (reference campaign parameters, text logging)
//!   2) Settings file (explicit path or auto-discovered)
//!   3) Environment variables, optionally via `.env`
//!
//! Env prefix: `TOKENSALE__...`, nested fields separated by `__`:
//!   TOKENSALE__LOGGING__JSON=true
//!   TOKENSALE__CAMPAIGN__HARD_CAP=70e18
//!
//! Amounts are u128 and do not fit TOML integers, so they are accepted as
//! integers or strings (`"245000000"`, `"245_000_000e18"`, `"0.1e18"`).
//! Window boundaries accept unix seconds or RFC 3339 strings.

use std::path::{Path, PathBuf};

use config as cfg;
use directories::ProjectDirs;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bonus::{BonusSchedule, BonusTier},
    campaign::{CampaignConfig, Grant},
    error::SaleError,
    phase::SaleWindows,
    telemetry::LoggingConfig,
    vesting::{VestingClass, VestingPolicy},
    Address, Balance, Timestamp, UNIT,
};

/// Application settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub engine: EngineSettings,
    pub campaign: CampaignSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Buffered events per subscriber before lagging.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { event_capacity: 1024 }
    }
}

/// Raw campaign section; see [`Settings::campaign_config`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignSettings {
    pub operator: Option<Address>,
    pub wallet: Option<Address>,
    #[serde(with = "amount")]
    pub soft_cap: Balance,
    #[serde(with = "amount")]
    pub hard_cap: Balance,
    pub windows: Option<WindowSettings>,
    #[serde(with = "amount")]
    pub rate: Balance,
    #[serde(with = "amount")]
    pub min_contribution: Balance,
    #[serde(with = "amount")]
    pub min_presale_contribution: Balance,
    pub bonus: Vec<BonusTierSettings>,
    #[serde(with = "amount::option")]
    pub token_sale_cap: Option<Balance>,
    pub vesting: VestingPolicy,
    pub grants: Vec<GrantSettings>,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            operator: None,
            wallet: None,
            soft_cap: 20 * UNIT,
            hard_cap: 70 * UNIT,
            windows: None,
            rate: 5000,
            min_contribution: UNIT / 10,
            min_presale_contribution: 20 * UNIT,
            bonus: BonusSchedule::reference(UNIT)
                .tiers()
                .iter()
                .map(|t| BonusTierSettings { threshold: t.threshold, rate: t.rate })
                .collect(),
            token_sale_cap: None,
            vesting: VestingPolicy::default(),
            grants: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(with = "timestamp")]
    pub pre_sale_start: Timestamp,
    #[serde(with = "timestamp")]
    pub pre_sale_end: Timestamp,
    #[serde(with = "timestamp")]
    pub crowdsale_start: Timestamp,
    #[serde(with = "timestamp")]
    pub crowdsale_end: Timestamp,
}

impl From<WindowSettings> for SaleWindows {
    fn from(w: WindowSettings) -> Self {
        SaleWindows {
            pre_sale_start: w.pre_sale_start,
            pre_sale_end: w.pre_sale_end,
            crowdsale_start: w.crowdsale_start,
            crowdsale_end: w.crowdsale_end,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusTierSettings {
    #[serde(with = "amount")]
    pub threshold: Balance,
    pub rate: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSettings {
    pub beneficiary: Address,
    #[serde(with = "amount")]
    pub amount: Balance,
    #[serde(default = "team_class")]
    pub class: VestingClass,
}

fn team_class() -> VestingClass {
    VestingClass::Team
}

/// Errors during settings loading/validation.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("path not found `{0}`")]
    PathNotFound(String),
    #[error("missing setting `{0}`")]
    Missing(&'static str),
    #[error(transparent)]
    Campaign(#[from] SaleError),
}

impl Settings {
    /// Validated campaign parameters.
    pub fn campaign_config(&self) -> Result<CampaignConfig, SettingsError> {
        let c = &self.campaign;
        let bonus = BonusSchedule::new(
            c.bonus
                .iter()
                .map(|t| BonusTier { threshold: t.threshold, rate: t.rate })
                .collect(),
        )?;
        let config = CampaignConfig {
            operator: c.operator.ok_or(SettingsError::Missing("campaign.operator"))?,
            wallet: c.wallet.ok_or(SettingsError::Missing("campaign.wallet"))?,
            soft_cap: c.soft_cap,
            hard_cap: c.hard_cap,
            windows: c.windows.ok_or(SettingsError::Missing("campaign.windows"))?.into(),
            rate: c.rate,
            min_contribution: c.min_contribution,
            min_presale_contribution: c.min_presale_contribution,
            bonus,
            token_sale_cap: c.token_sale_cap,
            vesting: c.vesting.clone(),
            grants: c
                .grants
                .iter()
                .map(|g| Grant { beneficiary: g.beneficiary, amount: g.amount, class: g.class })
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Load settings: defaults → file → environment (`TOKENSALE__...`).
pub fn load(explicit_file: Option<&Path>) -> Result<Settings, SettingsError> {
    let _ = dotenv();
    load_with_env(explicit_file, None)
}

/// Same as [`load`] with an optional replacement for the process environment.
pub fn load_with_env(
    explicit_file: Option<&Path>,
    env: Option<cfg::Map<String, String>>,
) -> Result<Settings, SettingsError> {
    let defaults = Settings::default();
    let mut builder = cfg::Config::builder()
        .set_default("logging.json", defaults.logging.json)?
        .set_default("logging.ansi", defaults.logging.ansi)?
        .set_default("engine.event_capacity", defaults.engine.event_capacity as i64)?;

    for path in discover_config_files(explicit_file)? {
        builder = builder.add_source(cfg::File::from(path));
    }

    // Values stay strings here; numeric fields are parsed on deserialisation
    // so that u128 amounts do not degrade to floats.
    builder = builder.add_source(
        cfg::Environment::with_prefix("TOKENSALE")
            .prefix_separator("__")
            .separator("__")
            .source(env),
    );

    Ok(builder.build()?.try_deserialize()?)
}

/// Discover settings files in precedence order:
/// - explicit path if provided
/// - `<config dir>/tokensale/tokensale.{toml,yaml,yml,json}`
/// - `./tokensale.{toml,yaml,yml,json}`
fn discover_config_files(explicit: Option<&Path>) -> Result<Vec<PathBuf>, SettingsError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(vec![p.to_path_buf()]);
        }
        return Err(SettingsError::PathNotFound(p.display().to_string()));
    }

    let mut dirs = Vec::new();
    if let Some(pd) = ProjectDirs::from("io", "tokensale", "tokensale") {
        dirs.push(pd.config_dir().to_path_buf());
    }
    dirs.push(PathBuf::from("."));

    Ok(dirs
        .iter()
        .flat_map(|d| ["toml", "yaml", "yml", "json"].map(|ext| d.join(format!("tokensale.{ext}"))))
        .filter(|c| c.exists())
        .collect())
}

/// Parse an amount: digits with optional `_` separators, optional fraction
/// and optional decimal exponent. The result must be integral.
pub fn parse_amount(s: &str) -> Result<Balance, String> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    let (mantissa, exp) = match cleaned.split_once(|c| c == 'e' || c == 'E') {
        Some((m, e)) => (m, e.parse::<u32>().map_err(|_| format!("bad exponent in `{s}`"))?),
        None => (cleaned.as_str(), 0),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let frac = frac.trim_end_matches('0');
    if int.is_empty() && frac.is_empty() {
        return Err(format!("empty amount `{s}`"));
    }
    if !int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(format!("amount `{s}` is not a non-negative number"));
    }
    let shift = exp
        .checked_sub(frac.len() as u32)
        .ok_or_else(|| format!("amount `{s}` is not an integer"))?;
    let digits = format!("{int}{frac}");
    let digits = if digits.is_empty() { "0" } else { digits.as_str() };
    digits
        .parse::<Balance>()
        .ok()
        .and_then(|v| 10u128.checked_pow(shift).and_then(|p| v.checked_mul(p)))
        .ok_or_else(|| format!("amount `{s}` overflows"))
}

/// Serde adapter for u128 amounts: integer or string in, string out.
pub(crate) mod amount {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    use crate::Balance;

    pub fn serialize<S: Serializer>(v: &Balance, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Balance, D::Error> {
        d.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> de::Visitor<'de> for AmountVisitor {
        type Value = Balance;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or an amount string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Balance, E> {
            Ok(v as Balance)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Balance, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Balance, E> {
            Balance::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<Balance, E> {
            Balance::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Balance, E> {
            super::parse_amount(v).map_err(E::custom)
        }
    }

    pub mod option {
        use super::*;
        use serde::{Deserialize, Serialize};

        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super")] Balance);

        pub fn serialize<S: Serializer>(v: &Option<Balance>, s: S) -> Result<S::Ok, S::Error> {
            v.map(|x| x.to_string()).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Balance>, D::Error> {
            Ok(Option::<Wrapped>::deserialize(d)?.map(|w| w.0))
        }
    }
}

/// Serde adapter for timestamps: unix seconds or RFC 3339.
mod timestamp {
    use humantime_serde::re::humantime;
    use serde::{de, Deserializer, Serializer};
    use std::{fmt, time::UNIX_EPOCH};

    use crate::Timestamp;

    pub fn serialize<S: Serializer>(v: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(*v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        d.deserialize_any(TimestampVisitor)
    }

    struct TimestampVisitor;

    impl<'de> de::Visitor<'de> for TimestampVisitor {
        type Value = Timestamp;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("unix seconds or an RFC 3339 timestamp")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
            Timestamp::try_from(v).map_err(|_| E::custom(format!("negative timestamp {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
            if let Ok(secs) = v.trim().parse::<Timestamp>() {
                return Ok(secs);
            }
            let t = humantime::parse_rfc3339_weak(v.trim()).map_err(E::custom)?;
            t.duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .map_err(|_| E::custom(format!("timestamp `{v}` before 1970")))
        }
    }
}
