use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memo_ledger::config::Settings;
use memo_ledger::filter::FilterLoadOutcome;
use memo_ledger::ledger::LoadOutcome;
use memo_ledger::registry::{MemoRegistry, OpenReport, Registration};
use memo_ledger::tx::{content_key, is_content_key, Transaction};

#[derive(Parser, Debug)]
#[clap(name = "memo-ledger", version, about = "Register and verify memos on a hash-linked ledger")]
struct Cli {
    /// Settings file (defaults to ./memo-ledger.toml if present)
    #[clap(long, value_parser)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hash a document and record it unless it is already on the ledger
    Upload {
        #[clap(value_parser)]
        file: PathBuf,
        /// Extra metadata as key=value, repeatable (e.g. --meta student_id=S1)
        #[clap(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
    /// Look a content hash up on the ledger
    Verify {
        #[clap(value_parser)]
        hash: String,
    },
    /// Print one block
    Block {
        #[clap(value_parser)]
        index: u64,
    },
    /// Most recent memo whose metadata field equals a value
    Latest {
        #[clap(value_parser)]
        field: String,
        #[clap(value_parser)]
        value: String,
    },
    /// Ledger summary
    Stats,
    /// Every block on the ledger
    Blocks,
    /// Check hashes and links of the whole chain
    Validate,
    /// Membership filter statistics
    FilterStats,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if k.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_startup(report: &OpenReport) {
    match &report.ledger {
        LoadOutcome::Recovered { reason } => {
            warn!(%reason, "ledger history could not be read and was reset")
        }
        LoadOutcome::Invalid { first_invalid, .. } => {
            warn!(first_invalid, "ledger failed validation; writes are refused")
        }
        LoadOutcome::Fresh | LoadOutcome::Restored { .. } => {}
    }
    if let FilterLoadOutcome::Recovered { reason } = &report.filter {
        warn!(%reason, "filter state reset");
    }
    if report.reconciled > 0 {
        info!(keys = report.reconciled, "filter reconciled with ledger");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    init_logging(&settings.log_level);

    let (registry, report) = MemoRegistry::open(&settings).with_context(|| {
        format!("opening ledger in {}", settings.data_dir.display())
    })?;
    report_startup(&report);
    let chain_invalid = matches!(report.ledger, LoadOutcome::Invalid { .. });

    match cli.command {
        Command::Upload { file, meta } => {
            if chain_invalid {
                bail!("refusing to append to a ledger that fails validation");
            }
            let content =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            if content.is_empty() {
                bail!("{} is empty", file.display());
            }

            let key = content_key(&content);
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut tx = Transaction::new(key.clone())
                .with_field("verified", true)
                .with_field("filename", filename)
                .with_field(
                    "timestamp",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                );
            for (k, v) in meta {
                tx = tx.with_field(k, v);
            }

            let registration = registry.register(tx)?;
            let message = match registration {
                Registration::Created { .. } => "memo added to ledger",
                Registration::Exists { .. } => "memo already exists in ledger",
            };
            let mut out = serde_json::to_value(registration)?;
            out["message"] = json!(message);
            out["hash"] = json!(key);
            print_json(&out)?;
        }
        Command::Verify { hash } => {
            if !is_content_key(&hash) {
                bail!("'{hash}' is not a 64-character hex digest");
            }
            let hash = hash.to_ascii_lowercase();
            match registry.verify(&hash) {
                Some((index, block)) => print_json(&json!({
                    "exists": true,
                    "block_index": index,
                    "block": block,
                    "occurrences": registry.ledger().transactions_by_key(&hash),
                }))?,
                None => print_json(&json!({ "exists": false, "hash": hash }))?,
            }
        }
        Command::Block { index } => match registry.ledger().get(index) {
            Some(block) => print_json(&block)?,
            None => bail!("no block at index {index}"),
        },
        Command::Latest { field, value } => {
            match registry
                .ledger()
                .find_latest_by_field(&field, &Value::String(value.clone()))
            {
                Some((index, tx)) => print_json(&json!({
                    "found": true,
                    "block_index": index,
                    "transaction": tx,
                }))?,
                None => print_json(&json!({ "found": false, "field": field, "value": value }))?,
            }
        }
        Command::Stats => print_json(&registry.ledger().summary())?,
        Command::Blocks => print_json(&json!({ "blocks": registry.ledger().blocks() }))?,
        Command::Validate => {
            let first_invalid = registry.ledger().first_invalid_block();
            print_json(&json!({
                "valid": first_invalid.is_none(),
                "first_invalid": first_invalid,
                "total_blocks": registry.ledger().block_count(),
            }))?;
            if let Some(index) = first_invalid {
                bail!("chain integrity violation at block {index}");
            }
        }
        Command::FilterStats => print_json(&registry.filter().stats())?,
    }

    Ok(())
}
