//! stockpilot CLI
//!
//! Operational entrypoint: schema status and migration, proposal
//! generation, receipt closure, end-of-day closure, export, backup and
//! revert. Business configuration lives in the database settings table;
//! only the database path and log filter come from the environment.
//!
//! # Exit codes
//!
//! - 0: success
//! - 1: domain error (not found, constraint, invalid input)
//! - 2: storage/migration error

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing::error;

use stockpilot::calendar::Lane;
use stockpilot::error::CoreError;
use stockpilot::store::{backup, Database};
use stockpilot::workflow::{self, ReceiptItem, RevertTarget};
use stockpilot::{export, kpi, EventType};

#[derive(Parser)]
#[command(name = "stockpilot", about = "Inventory and replenishment engine")]
struct Cli {
    /// Database file; defaults to $STOCKPILOT_DB or ./stockpilot.db.
    #[arg(long, env = "STOCKPILOT_DB", default_value = "./stockpilot.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show schema version and pending migrations.
    Status,
    /// Generate replenishment proposals for the active assortment.
    Propose {
        /// Order date (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,
        /// Lane: standard, saturday or monday.
        #[arg(long, default_value = "standard")]
        lane: String,
        /// Print the full breakdown as JSON.
        #[arg(long)]
        verbose: bool,
    },
    /// Generate the Friday dual-lane pair for one SKU.
    ProposeFriday {
        #[arg(long)]
        sku: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Close a receiving document against open orders.
    Receive {
        #[arg(long)]
        document: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        sku: String,
        #[arg(long)]
        qty: i64,
        /// Target order ids, comma separated; empty means FIFO.
        #[arg(long, default_value = "")]
        orders: String,
        /// Declare touched orders closed even if short.
        #[arg(long)]
        close_short: bool,
    },
    /// End-of-day closure for a date.
    Eod {
        #[arg(long)]
        date: NaiveDate,
        /// Physical counts as sku=qty pairs, comma separated.
        #[arg(long, default_value = "")]
        counts: String,
    },
    /// Export all tables as CSV plus manifest.
    Export {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Back up the database triple.
    Backup {
        #[arg(long, default_value = "manual")]
        reason: String,
        /// Prune old startup backups down to this many.
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
    /// Restore a backup over the live database (database must be idle).
    Restore {
        #[arg(long)]
        from: PathBuf,
    },
    /// Delete ledger rows: by id, or by sku/date/event.
    Revert {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        sku: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        event: Option<String>,
    },
    /// Recompute KPI snapshots for one SKU.
    Kpi {
        #[arg(long)]
        sku: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 28)]
        lookback: i64,
    },
}

fn parse_lane(name: &str) -> Result<Lane> {
    match name.to_ascii_lowercase().as_str() {
        "standard" => Ok(Lane::Standard),
        "saturday" => Ok(Lane::Saturday),
        "monday" => Ok(Lane::Monday),
        other => anyhow::bail!("unknown lane: {}", other),
    }
}

fn run(cli: Cli) -> Result<()> {
    // Restore operates on closed files; do not open the database first.
    if let Command::Restore { from } = &cli.command {
        backup::restore_backup(from, &cli.db).context("restore failed")?;
        println!("restored {} from {}", cli.db.display(), from.display());
        return Ok(());
    }

    let db = Database::open(&cli.db).context("open database")?;

    // Best-effort startup backup with retention; never blocks operation.
    match backup::backup_database(&db, "startup") {
        Ok(_) => {
            let _ = backup::prune_backups(&backup::backup_dir(&cli.db), "startup", 10);
        }
        Err(e) => tracing::warn!(error = %e, "startup backup failed"),
    }

    match cli.command {
        Command::Status => {
            let status = db.schema_status()?;
            println!("schema version: {}", status.current);
            println!("binary supports: {}", status.latest);
            if status.pending.is_empty() {
                println!("no pending migrations");
            } else {
                println!("pending: {:?}", status.pending);
            }
            db.integrity_check()?;
            println!("integrity: ok");
        }
        Command::Propose { date, lane, verbose } => {
            let lane = parse_lane(&lane)?;
            let cancel = AtomicBool::new(false);
            let proposals = workflow::batch_proposals(&db, date, lane, &cancel)?;
            for p in &proposals {
                if p.qty > 0 {
                    println!(
                        "{}  qty={}  arrives={}  (mu_P={:.1}, sigma_P={:.1}, S={:.1}, IP={})",
                        p.sku,
                        p.qty,
                        p.receipt_date,
                        p.breakdown.mu_p,
                        p.breakdown.sigma_p,
                        p.breakdown.reorder_target,
                        p.breakdown.inventory_position,
                    );
                }
                if verbose {
                    println!("{}", serde_json::to_string_pretty(&p.breakdown)?);
                }
            }
            println!(
                "{} proposals, {} with quantity",
                proposals.len(),
                proposals.iter().filter(|p| p.qty > 0).count()
            );
        }
        Command::ProposeFriday { sku, date } => {
            let (saturday, monday) = workflow::friday_proposals_for_sku(&db, &sku, date)?;
            println!(
                "SATURDAY: qty={} arrives={} (P={})",
                saturday.qty, saturday.receipt_date, saturday.breakdown.protection_days
            );
            println!(
                "MONDAY:   qty={} arrives={} (P={})",
                monday.qty, monday.receipt_date, monday.breakdown.protection_days
            );
        }
        Command::Receive {
            document,
            date,
            sku,
            qty,
            orders,
            close_short,
        } => {
            let targets: Vec<String> = orders
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let outcome = workflow::close_receipt(
                &db,
                &document,
                date,
                &[ReceiptItem {
                    sku,
                    qty_received: qty,
                    target_order_ids: targets,
                }],
                close_short,
                "cli",
            )?;
            match outcome {
                workflow::ReceiptOutcome::AlreadyProcessed => {
                    println!("already_processed=true (no changes)");
                }
                workflow::ReceiptOutcome::Inserted(summary) => {
                    for a in &summary.allocations {
                        println!("order {}: +{} ({})", a.order_id, a.qty, a.status.as_str());
                    }
                    println!(
                        "receipts={} unfulfilled={} lots={:?}",
                        summary.receipt_events, summary.unfulfilled_events, summary.lots_created
                    );
                }
            }
        }
        Command::Eod { date, counts } => {
            let mut count_map = BTreeMap::new();
            for pair in counts.split(',').filter(|s| !s.trim().is_empty()) {
                let (sku, qty) = pair
                    .split_once('=')
                    .context("counts must be sku=qty pairs")?;
                count_map.insert(sku.trim().to_string(), qty.trim().parse::<i64>()?);
            }
            let lines = workflow::close_day(&db, date, &count_map, "cli")?;
            for line in &lines {
                println!(
                    "{}: sold={} fefo={} adjust={:?}",
                    line.sku,
                    line.qty_sold,
                    line.fefo_applied
                        .as_ref()
                        .map(|f| f.satisfied)
                        .unwrap_or(0),
                    line.adjusted_to,
                );
            }
        }
        Command::Export { dir } => {
            let manifest = export::export_snapshot(&db, &dir)?;
            println!(
                "exported {} tables to {} (schema v{})",
                manifest.tables.len(),
                dir.display(),
                manifest.schema_version
            );
        }
        Command::Backup { reason, keep } => {
            let dest = backup::backup_database(&db, &reason)?;
            println!("backup: {}", dest.display());
            let pruned = backup::prune_backups(
                &backup::backup_dir(cli.db.as_path()),
                "startup",
                keep,
            )?;
            if pruned > 0 {
                println!("pruned {} old startup backups", pruned);
            }
        }
        Command::Restore { .. } => unreachable!(),
        Command::Revert { id, sku, date, event } => {
            let target = match (id, sku, date, event) {
                (Some(id), _, _, _) => RevertTarget::ById(id),
                (None, Some(sku), Some(date), Some(event)) => RevertTarget::ByFields {
                    sku,
                    date,
                    event: EventType::parse_str(&event.to_uppercase())?,
                },
                _ => anyhow::bail!("revert needs --id, or --sku with --date and --event"),
            };
            let outcome = workflow::revert(&db, &target, "cli")?;
            println!("deleted {} ledger rows", outcome.deleted);
            if outcome.lots_left_untouched {
                println!("warning: RECEIPT reverted; lots were NOT reversed");
            }
        }
        Command::Kpi { sku, date, lookback } => {
            let snapshot = kpi::compute_for_sku(&db, &sku, date, lookback)?;
            println!(
                "{}: oos={:.1}% fill={:.1}% wmape={:?} bias={:?} lost={:.1}",
                snapshot.sku,
                snapshot.oos_rate * 100.0,
                snapshot.fill_rate * 100.0,
                snapshot.wmape,
                snapshot.bias,
                snapshot.lost_sales_estimate,
            );
        }
    }
    Ok(())
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpilot=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        let code = match e.downcast_ref::<CoreError>() {
            Some(CoreError::Sqlite(_))
            | Some(CoreError::MigrationFailure(_))
            | Some(CoreError::IntegrityError(_))
            | Some(CoreError::Io(_)) => 2,
            Some(_) => 1,
            None => 2,
        };
        std::process::exit(code);
    }
}
