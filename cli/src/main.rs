use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use smartrewards_ledger::{
    dispatch, Address, ChainEvent, EventOutcome, Hash256, LedgerConfig, Round, RoundNumber,
    SmartRewards,
};
use smartrewards_storage::RocksStore;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// SmartRewards ledger tool
#[derive(Parser)]
#[command(name = "smartrewards", version, about = "SmartRewards eligibility ledger")]
struct Cli {
    /// Ledger data directory
    #[arg(long, global = true, default_value = "smartrewards-data")]
    data_dir: PathBuf,

    /// Ledger configuration (TOML). Defaults to mainnet settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON-lines block feed to the ledger
    Replay {
        /// Feed file, one chain event per line
        #[arg(long)]
        feed: PathBuf,

        /// Compact the database afterwards
        #[arg(long)]
        compact: bool,
    },

    /// Show tip, current round and sync state
    Status,

    /// Show the entry of an address
    Entry { address: String },

    /// Show the current round, or a stored one
    Round {
        #[arg(long)]
        number: Option<RoundNumber>,
    },

    /// List finished rounds
    Rounds,

    /// List non-zero payouts of a finished round
    Payouts { round: RoundNumber },

    /// List every eligible entry of a finished round
    Snapshots { round: RoundNumber },

    /// Check the stored ledger for consistency
    Verify,

    /// Recompute the payouts of a finished round from the current entries
    RestoreSnapshot { round: RoundNumber },

    /// Revert the tip block
    Disconnect {
        #[arg(long)]
        height: u64,

        /// Block hash (hex)
        #[arg(long)]
        hash: String,
    },

    /// Clear the ledger so it can be rebuilt
    Resync,
}

#[derive(Serialize)]
struct RoundView<'a> {
    #[serde(flatten)]
    round: &'a Round,
    start: String,
    end: String,
}

impl<'a> RoundView<'a> {
    fn new(round: &'a Round) -> Self {
        Self {
            round,
            start: format_time(round.start_time),
            end: format_time(round.end_time),
        }
    }
}

#[derive(Serialize)]
struct ReplaySummary {
    connected: u64,
    disconnected: u64,
    finalized_rounds: Vec<RoundNumber>,
    disqualified_entries: u64,
    disqualified_amount: u64,
    tip: Option<u64>,
}

fn format_time(unix: i64) -> String {
    match Utc.timestamp_opt(unix, 0).single() {
        Some(t) => t.to_rfc3339(),
        None => unix.to_string(),
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> CliResult<LedgerConfig> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading ledger config");
            Ok(LedgerConfig::from_file(path)?)
        }
        None => Ok(LedgerConfig::default()),
    }
}

fn open_ledger(cli: &Cli) -> CliResult<SmartRewards<RocksStore>> {
    let config = load_config(cli.config.as_deref())?;
    let store = RocksStore::open(&cli.data_dir)?;
    let params = config.chain_params();
    Ok(SmartRewards::open(store, params, config)?)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let ledger = open_ledger(cli)?;

    match &cli.command {
        Commands::Replay { feed, compact } => cmd_replay(&ledger, feed, *compact),
        Commands::Status => cmd_status(&ledger),
        Commands::Entry { address } => {
            let (entry, found) = ledger.get_entry(&Address::new(address.as_str()))?;
            if !found {
                tracing::warn!(%address, "address not in ledger");
            }
            print_json(&entry)
        }
        Commands::Round { number } => cmd_round(&ledger, *number),
        Commands::Rounds => {
            let rounds = ledger.get_reward_rounds();
            let views: Vec<RoundView<'_>> = rounds.iter().map(RoundView::new).collect();
            print_json(&views)
        }
        Commands::Payouts { round } => print_json(&ledger.get_reward_payouts(*round)?),
        Commands::Snapshots { round } => print_json(&ledger.get_reward_snapshots(*round)?),
        Commands::Verify => {
            ledger.verify()?;
            println!("ledger verified");
            Ok(())
        }
        Commands::RestoreSnapshot { round } => print_json(&ledger.restore_snapshot(*round)?),
        Commands::Disconnect { height, hash } => {
            let hash = Hash256::from_hex(hash)?;
            print_json(&ledger.disconnect_block(*height, hash)?)
        }
        Commands::Resync => {
            ledger.resync()?;
            println!("ledger cleared");
            Ok(())
        }
    }
}

fn cmd_replay(ledger: &SmartRewards<RocksStore>, feed: &Path, compact: bool) -> CliResult<()> {
    let reader = BufReader::new(File::open(feed)?);
    let mut summary = ReplaySummary {
        connected: 0,
        disconnected: 0,
        finalized_rounds: Vec::new(),
        disqualified_entries: 0,
        disqualified_amount: 0,
        tip: None,
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ChainEvent = serde_json::from_str(&line)
            .map_err(|e| format!("feed line {}: {e}", index + 1))?;

        match dispatch(ledger, &event)? {
            EventOutcome::Connected(result) => {
                summary.connected += 1;
                summary.disqualified_entries += result.disqualified_entries;
                summary.disqualified_amount = summary
                    .disqualified_amount
                    .saturating_add(result.disqualified_amount);
                summary.finalized_rounds.extend(result.finalized_round);
            }
            EventOutcome::Disconnected(_) => summary.disconnected += 1,
            EventOutcome::Tip => {}
        }
    }

    ledger.flush()?;
    if compact {
        ledger.store().compact()?;
    }
    summary.tip = ledger.get_last_block()?.map(|b| b.height);

    tracing::info!(
        connected = summary.connected,
        disconnected = summary.disconnected,
        tip = summary.tip,
        "feed replayed"
    );
    print_json(&summary)
}

fn cmd_status(ledger: &SmartRewards<RocksStore>) -> CliResult<()> {
    let stats = ledger.stats()?;
    let current = ledger.get_current_round();
    let status = serde_json::json!({
        "network": ledger.params().network,
        "sync_state": ledger.sync_state().to_string(),
        "progress": ledger.get_progress(),
        "stats": stats,
        "current_round": current.as_ref().map(RoundView::new),
    });
    print_json(&status)
}

fn cmd_round(ledger: &SmartRewards<RocksStore>, number: Option<RoundNumber>) -> CliResult<()> {
    let round = match number {
        None => ledger.get_current_round(),
        Some(n) => ledger
            .get_reward_rounds()
            .into_iter()
            .find(|r| r.number == n)
            .or_else(|| ledger.get_current_round().filter(|r| r.number == n)),
    };
    match round {
        Some(round) => print_json(&RoundView::new(&round)),
        None => Err("no such round".into()),
    }
}
