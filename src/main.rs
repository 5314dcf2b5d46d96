//! `tokensale` command line: inspect a configured campaign, print lockup
//! tables and replay operation journals.

use std::{fs, path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use tokensale_ledger::{
    replay::{self, SaleStatus},
    settings::{self, parse_amount},
    telemetry, Balance, SystemClock, Clock, Timestamp, TokenSale, VestingClass,
};

#[derive(Debug, Parser)]
#[command(name = "tokensale", version, about = "Token sale ledger tooling")]
struct Cli {
    /// Settings file (toml, yaml or json). Auto-discovered when omitted.
    #[arg(long, global = true, env = "TOKENSALE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directives, e.g. "info,tokensale_ledger=debug".
    #[arg(long, global = true, env = "TOKENSALE_LOG")]
    log_filter: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Phase, halt flag, caps and totals as JSON.
    Status {
        /// Observation time (unix seconds); defaults to now.
        #[arg(long)]
        at: Option<Timestamp>,
        /// Read state from a snapshot instead of a fresh ledger.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Per-tranche unlock table for an award.
    Schedule {
        #[arg(long, value_parser = VestingClass::from_str)]
        class: VestingClass,
        #[arg(long, value_parser = parse_amount)]
        base: Balance,
        #[arg(long, value_parser = parse_amount, default_value = "0")]
        bonus: Balance,
    },
    /// Apply a JSON journal of operations to a fresh ledger.
    Replay {
        journal: PathBuf,
        /// Write the final ledger snapshot here.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct TrancheRow {
    unlock_at: Timestamp,
    offset: String,
    amount: String,
    cumulative: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = settings::load(cli.config.as_deref()).context("load settings")?;
    if cli.log_filter.is_some() {
        settings.logging.filter = cli.log_filter.clone();
    }
    if cli.log_json {
        settings.logging.json = true;
    }
    telemetry::init(&settings.logging)?;

    match cli.command {
        Command::Status { at, snapshot } => {
            let sale = match snapshot {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("read snapshot {}", path.display()))?;
                    TokenSale::from_json(&raw).context("restore snapshot")?
                }
                None => TokenSale::new(settings.campaign_config()?)?.0,
            };
            let at = at.unwrap_or_else(|| SystemClock.now_unix());
            print_json(&SaleStatus::capture(&sale, at))?;
        }
        Command::Schedule { class, base, bonus } => {
            let campaign = settings.campaign_config()?;
            let schedule = campaign.vesting.schedule_for(class);
            let anchor = campaign.lockup_anchor();
            let amounts = schedule.tranche_amounts(base, bonus)?;
            let cumulative = schedule.cumulative(base, bonus)?;
            let rows: Vec<TrancheRow> = schedule
                .tranches()
                .iter()
                .zip(schedule.unlock_times(anchor))
                .zip(amounts.into_iter().zip(cumulative))
                .map(|((t, unlock_at), (amount, cumulative))| TrancheRow {
                    unlock_at,
                    offset: humantime_serde::re::humantime::format_duration(t.offset).to_string(),
                    amount: amount.to_string(),
                    cumulative: cumulative.to_string(),
                })
                .collect();
            info!(%class, tranches = rows.len(), lockup_period = schedule.lockup_period(), "schedule");
            print_json(&rows)?;
        }
        Command::Replay { journal, snapshot } => {
            let raw = fs::read_to_string(&journal)
                .with_context(|| format!("read journal {}", journal.display()))?;
            let entries = replay::parse_journal(&raw).context("parse journal")?;
            if entries.is_empty() {
                bail!("journal {} is empty", journal.display());
            }
            let (report, engine) = replay::replay(settings.campaign_config()?, &entries)?;
            let rejected = report.outcomes.iter().filter(|o| !o.accepted()).count();
            info!(entries = entries.len(), rejected, "journal replayed");
            if let Some(path) = snapshot {
                fs::write(&path, engine.snapshot_json()?)
                    .with_context(|| format!("write snapshot {}", path.display()))?;
            }
            print_json(&report)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
