//! Stock trading-decision bot
//!
//! Ingests price/volume history and news signals, gates entries through
//! liquidity/veto/hysteresis rules, sizes positions from the model's
//! outperform probability, and records every trade and decision in an
//! append-only audit ledger. Portfolio state is derived by replaying the
//! ledger, never from cached balances.

mod config;
mod db;
mod hashing;
mod jobs;
mod metrics;
mod models;
mod providers;
mod trading;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::AppConfig;
use crate::db::Database;
use crate::providers::{MarketAnalyzer, ProviderRouter, StockAnalyzer};
use crate::trading::{BuyOutcome, BuyRequest, SellRequest};

/// Trading-decision bot CLI.
#[derive(Parser)]
#[command(name = "stockpilot")]
#[command(about = "Rule-gated equity trading bot with an auditable ledger", long_about = None)]
struct Cli {
    /// Database URL (overrides STOCKPILOT_DATABASE_URL)
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the evidence packet and decision for a ticker
    Analyze {
        /// Ticker symbol
        ticker: String,
    },

    /// Run the entry gate and record a buy if it passes
    Buy {
        /// Ticker symbol
        ticker: String,

        /// Explicit share quantity (overrides sizing)
        #[arg(short, long)]
        qty: Option<f64>,

        /// Explicit notional in USD (overrides the allocation default)
        #[arg(short, long)]
        notional: Option<f64>,

        /// Risk mode ("moderate" raises the allocation ceiling)
        #[arg(short, long)]
        risk_mode: Option<String>,

        /// Fees in USD
        #[arg(short, long, default_value = "0")]
        fees: f64,
    },

    /// Sell part or all of an active position
    Sell {
        /// Ticker symbol
        ticker: String,

        /// Quantity to sell (defaults to the whole position)
        #[arg(short, long)]
        qty: Option<f64>,

        /// Fees in USD
        #[arg(short, long, default_value = "0")]
        fees: f64,
    },

    /// Show active positions with their latest decisions and exit signals
    Positions,

    /// Replay the ledger into an equity curve, Sharpe, drawdown, win rate
    Metrics,

    /// Show recent audit events
    Audit {
        /// Number of events to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Run one scheduled job immediately
    Job {
        #[command(subcommand)]
        job: JobCommands,
    },

    /// Run the job scheduler until Ctrl-C
    Run,

    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum JobCommands {
    /// Shock scan over current holdings
    Reserve,
    /// Entry scan over holdings plus the watchlist
    Broad,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = AppConfig::from_env();
    if let Some(database) = cli.database {
        config.database_url = database;
    }

    let db = Database::connect(&config.database_url).await?;
    let analyzer = StockAnalyzer::new(&config);

    match cli.command {
        Commands::Analyze { ticker } => {
            let (evidence, decision) = analyzer.analyze(&ticker)?;
            let out = serde_json::json!({"evidence": evidence, "decision": decision});
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Commands::Buy {
            ticker,
            qty,
            notional,
            risk_mode,
            fees,
        } => {
            let req = BuyRequest {
                ticker,
                qty,
                notional_usd: notional,
                risk_mode,
                fees,
            };
            match trading::execute_buy(&db, &config, &analyzer, &req).await? {
                BuyOutcome::NoTrade { ticker, reason } => {
                    println!("NO TRADE {} ({})", ticker, reason.as_str());
                }
                BuyOutcome::Executed {
                    ticker,
                    qty,
                    price,
                    alloc_pct,
                } => {
                    println!(
                        "BOUGHT {} {:.4} @ ${:.2} (alloc {}%)",
                        ticker,
                        qty,
                        price,
                        alloc_pct * rust_decimal::Decimal::from(100)
                    );
                }
            }
        }

        Commands::Sell { ticker, qty, fees } => {
            let req = SellRequest { ticker, qty, fees };
            let outcome = trading::execute_sell(&db, &config, &analyzer, &req).await?;
            println!(
                "SOLD {} {:.4} @ ${:.2}",
                outcome.ticker, outcome.qty, outcome.price
            );
        }

        Commands::Positions => {
            let reports = trading::active_report(&db, &config, &analyzer).await?;
            if reports.is_empty() {
                println!("No active positions.");
                return Ok(());
            }

            println!(
                "\n{:<8} {:>12} {:>10} {:>10} {:>8}  {:<7} {}",
                "TICKER", "NET QTY", "AVG COST", "PRICE", "P&L%", "SELL?", "REASON"
            );
            println!("{}", "-".repeat(76));
            for r in &reports {
                println!(
                    "{:<8} {:>12.4} {:>10.2} {:>10.2} {:>7.1}%  {:<7} {}",
                    r.ticker,
                    r.net_qty,
                    r.avg_cost,
                    r.current_price,
                    r.unrealized_pnl_pct * 100.0,
                    if r.sell_trigger { "yes" } else { "no" },
                    r.sell_reason
                );
            }
        }

        Commands::Metrics => {
            let report = metrics::compute_metrics(&db, &config, None).await?;

            println!("\n=== Portfolio Metrics ===");
            println!("Sharpe:        {:.4}", report.sharpe);
            println!("Max Drawdown:  {:.2}%", report.max_drawdown * 100.0);
            println!("Win Rate:      {:.1}%", report.win_rate * 100.0);

            if let (Some(first), Some(last)) =
                (report.equity_curve.first(), report.equity_curve.last())
            {
                println!("\n=== Equity Curve ===");
                println!("{}  ${:.2}", first.date, first.value);
                if report.equity_curve.len() > 1 {
                    println!("...  ({} points)", report.equity_curve.len());
                    println!("{}  ${:.2}", last.date, last.value);
                }
            }
        }

        Commands::Audit { limit } => {
            let events = db.list_audit_events(limit).await?;
            if events.is_empty() {
                println!("Audit log is empty.");
                return Ok(());
            }

            for event in events {
                println!(
                    "[{}] {:<8} {:<6} {}",
                    event.ts_utc,
                    event.event_type,
                    event.ticker.as_deref().unwrap_or("-"),
                    truncate(&event.payload_json, 100)
                );
            }
        }

        Commands::Job { job } => {
            let payload = match job {
                JobCommands::Reserve => jobs::run_reserve_job(&db, &config, &analyzer).await?,
                JobCommands::Broad => {
                    let mut macro_router = ProviderRouter::with_default_feeds(
                        5,
                        std::time::Duration::from_secs(4 * 3600),
                    );
                    jobs::run_broad_job(&db, &config, &analyzer, &mut macro_router).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }

        Commands::Run => {
            info!("starting scheduler (Ctrl-C to stop)");
            jobs::run_scheduler(&db, &config, &analyzer).await?;
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
