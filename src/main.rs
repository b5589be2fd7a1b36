use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fasset_ledger::{
    token::MutationBlock, AccountId, LedgerConfig, SequenceIndex, TokenLedger,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fasset")]
#[command(about = "Replay and inspect a checkpointed FAsset ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Ledger config (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every block of a JSONL script and print the final snapshot
    Replay {
        /// One `{"index": .., "mutations": [..]}` object per line
        script: PathBuf,

        /// Write the snapshot here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Replay a script, then show one account at a past or present index
    Query {
        script: PathBuf,

        #[arg(short, long)]
        account: AccountId,

        /// Defaults to the index of the last applied block
        #[arg(long)]
        at: Option<SequenceIndex>,
    },
}

#[derive(Debug, Serialize)]
struct AccountReport {
    account: AccountId,
    index: SequenceIndex,
    balance: u64,
    vote_power: u64,
    own_vote_power: u64,
    received_vote_power: u64,
    delegations: fasset_ledger::delegation::DelegationList,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<LedgerConfig> {
    match path {
        Some(path) => LedgerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(LedgerConfig::default()),
    }
}

fn replay(config: LedgerConfig, script: &Path) -> Result<TokenLedger> {
    let mut ledger = TokenLedger::new(config).context("building ledger")?;
    let file = fs::File::open(script).with_context(|| format!("opening {}", script.display()))?;
    let mut blocks = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", script.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let block: MutationBlock = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed block", script.display(), line_no + 1))?;
        ledger
            .apply_block(&block)
            .with_context(|| format!("{}:{}: block rejected", script.display(), line_no + 1))?;
        blocks += 1;
    }
    info!(blocks, index = ledger.current_index(), "replay finished");
    Ok(ledger)
}

fn query_account(
    ledger: &TokenLedger,
    account: AccountId,
    at: Option<SequenceIndex>,
) -> Result<AccountReport> {
    let index = at.unwrap_or_else(|| ledger.current_index());
    if index > ledger.current_index() {
        bail!(
            "index {index} is ahead of the ledger (latest {})",
            ledger.current_index()
        );
    }
    let view = ledger.account_view_at(&account, index);
    Ok(AccountReport {
        vote_power: view.vote_power(),
        balance: view.balance,
        own_vote_power: view.own_vote_power,
        received_vote_power: view.received_vote_power,
        delegations: view.delegations,
        account,
        index,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { script, out } => {
            let ledger = replay(config, &script)?;
            let json = serde_json::to_vec_pretty(&ledger.snapshot())?;
            match out {
                Some(path) => {
                    fs::write(&path, &json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("snapshot → {}", path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&json)),
            }
        }
        Commands::Query {
            script,
            account,
            at,
        } => {
            let ledger = replay(config, &script)?;
            let report = query_account(&ledger, account, at)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
    }

    fn replay_walkthrough() -> TokenLedger {
        let config = load_config(Some(&demo("config.json"))).unwrap();
        replay(config, &demo("walkthrough.jsonl")).unwrap()
    }

    #[test]
    fn walkthrough_script_replays() {
        let ledger = replay_walkthrough();
        assert_eq!(ledger.current_index(), 6);
        assert_eq!(ledger.total_supply(), 1_000);

        let lucy = query_account(&ledger, "lucy".into(), Some(5)).unwrap();
        assert_eq!(lucy.vote_power, 28);
        assert_eq!(lucy.received_vote_power, 18);

        let ed = query_account(&ledger, "ed".into(), None).unwrap();
        assert_eq!(ed.index, 6);
        assert_eq!(ed.vote_power, 19);
    }

    #[test]
    fn query_ahead_of_ledger_fails() {
        let ledger = replay_walkthrough();
        let err = query_account(&ledger, "bob".into(), Some(99)).unwrap_err();
        assert!(err.to_string().contains("ahead of the ledger"));
        assert!(query_account(&ledger, "bob".into(), Some(6)).is_ok());
    }

    #[test]
    fn malformed_line_names_its_position() {
        let script = std::env::temp_dir().join(format!("fasset-malformed-{}.jsonl", std::process::id()));
        fs::write(
            &script,
            "{\"index\": 1, \"mutations\": []}\n\n{\"index\": 2, \"mutations\": [{\"type\": \"mint\"}]}\n",
        )
        .unwrap();
        let err = replay(LedgerConfig::default(), &script).unwrap_err();
        fs::remove_file(&script).ok();
        assert!(format!("{err:#}").contains(":3: malformed block"));
    }
}
