//! Portfolio rebalancer CLI.
//!
//! Periodically rebalances brokerage accounts toward a configured target
//! allocation and submits the resulting orders, with margin-aware sizing
//! and phased, paced execution.

mod allocation;
mod broker;
mod config;
mod margin;
mod marketdata;
mod models;
mod orders;
mod runner;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::broker::RestBroker;
use crate::config::{AccountConfig, AppConfig};
use crate::models::Position;
use crate::runner::Rebalancer;

/// Portfolio rebalancer CLI.
#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Rebalance brokerage portfolios toward a target allocation", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rebalancing iterations for all configured accounts
    Run {
        /// Seconds between iterations
        #[arg(short, long, default_value = "300")]
        interval: u64,

        /// Run a single iteration and exit
        #[arg(long)]
        once: bool,

        /// Compute everything but submit no orders
        #[arg(long)]
        dry_run: bool,
    },

    /// Compute and print the allocation plan without submitting orders
    Plan,

    /// Show the loaded configuration
    Config,
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

    let app_config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            interval,
            once,
            dry_run,
        } => {
            let mut bots = build_bots(&app_config, dry_run)?;

            info!(
                accounts = bots.len(),
                interval = interval,
                dry_run = dry_run,
                "starting rebalancer"
            );

            loop {
                run_round(&mut bots).await;

                if once {
                    break;
                }

                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                }
            }
        }

        Commands::Plan => {
            let bots = build_bots(&app_config, true)?;

            for bot in &bots {
                match bot.plan().await {
                    Ok(positions) => print_plan(bot.account_id(), &positions),
                    Err(e) => error!(account = %bot.account_id(), error = %e, "plan failed"),
                }
            }
        }

        Commands::Config => {
            for account in &app_config.accounts {
                print_account(account);
            }
        }
    }

    Ok(())
}

fn build_bots(app_config: &AppConfig, dry_run: bool) -> Result<Vec<Rebalancer<RestBroker>>> {
    let mut bots = Vec::with_capacity(app_config.accounts.len());

    for account in &app_config.accounts {
        let token = account
            .token()
            .with_context(|| format!("no token for account {}", account.account_id))?;

        let broker = match &app_config.base_url {
            Some(url) => RestBroker::with_base_url(token, url.clone())?,
            None => RestBroker::new(token)?,
        };

        bots.push(
            Rebalancer::new(broker, account.clone())
                .with_aum_url(app_config.aum_url.clone())
                .with_dry_run(dry_run),
        );
    }

    Ok(bots)
}

/// One round: every account runs its own iteration, concurrently and
/// independently. A failing account never blocks the others.
async fn run_round(bots: &mut [Rebalancer<RestBroker>]) {
    let iterations: Vec<_> = bots.iter_mut().map(|bot| bot.run_iteration()).collect();
    let results = futures::future::join_all(iterations).await;

    for (bot, result) in bots.iter().zip(results) {
        match result {
            Ok(outcome) if outcome.skipped => {
                info!(
                    account = %bot.account_id(),
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "iteration skipped"
                );
            }
            Ok(outcome) => {
                info!(
                    account = %bot.account_id(),
                    orders = outcome.orders_submitted.len(),
                    "iteration finished"
                );
            }
            Err(e) => {
                error!(account = %bot.account_id(), error = %e, "iteration failed");
            }
        }

        if let Some(snapshot) = bot.last_snapshot() {
            tracing::debug!(
                account = %bot.account_id(),
                computed_at = %snapshot.computed_at,
                executed = snapshot.executed,
                positions = snapshot.positions.len(),
                "allocation snapshot updated"
            );
        }
    }
}

fn print_plan(account_id: &str, positions: &[Position]) {
    println!("\n=== Plan for account {account_id} ===");
    println!(
        "{:<8} {:>10} {:>10} {:>14} {:>14} {:>12} {:>7}",
        "TICKER", "CURR %", "TARGET %", "CURR AMT", "TARGET AMT", "LOTS +/-", "MARGIN"
    );
    println!("{}", "-".repeat(82));

    for p in positions {
        println!(
            "{:<8} {:>9.2}% {:>9.2}% {:>14.2} {:>14.2} {:>12.2} {:>7}",
            p.ticker,
            p.current_pct,
            p.desired_pct,
            p.current_amount,
            p.desired_amount,
            p.to_buy_lots,
            if p.is_margin { "yes" } else { "" }
        );
    }
}

fn print_account(account: &AccountConfig) {
    println!("\n=== Account {} ===", account.account_id);
    println!("Mode:               {}", account.desired_mode);
    println!("Order pause:        {}ms", account.sleep_between_orders_ms);
    println!(
        "Closure behavior:   {} (update result: {})",
        account.exchange_closure.mode, account.exchange_closure.update_iteration_result
    );
    println!(
        "Margin:             {} (x{}, free {}, cap {}, {:?})",
        if account.margin.enabled { "on" } else { "off" },
        account.margin.multiplier,
        account.margin.free_threshold,
        account.margin.max_margin_size,
        account.margin.balancing_strategy
    );
    if !account.total_marginal_sell.is_empty() {
        println!("Sell-before-buy:    {}", account.total_marginal_sell.join(", "));
    }

    println!("\n{:<8} {:>8}", "TICKER", "WEIGHT");
    let mut entries: Vec<_> = account.desired_wallet.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (ticker, weight) in entries {
        println!("{:<8} {:>7.1}%", ticker, weight);
    }
}
