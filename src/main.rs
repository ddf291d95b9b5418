//! mirrorbot: mirrors a reference trading account into a managed account
//! under a fixed capital budget.
//!
//! The managed portfolio converges toward a scaled copy of the reference
//! without ever holding as much capital as the reference account.

mod adapters;
mod config;
mod engine;
mod error;
mod events;
mod models;
mod syncer;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::adapters::{build_adapter, VenueKind};
use crate::config::SyncConfig;
use crate::engine::{diff_positions, scale_to_budget, DiffOptions, ScalingOptions};
use crate::events::SyncEvent;
use crate::syncer::Syncer;

/// mirrorbot CLI.
#[derive(Parser)]
#[command(name = "mirrorbot")]
#[command(about = "Mirror a reference trading account under a fixed capital budget", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync loop
    Run {
        /// Reference account identifier to mirror
        #[arg(short, long)]
        reference: String,

        /// Copy budget in quote currency
        #[arg(short, long)]
        budget: f64,

        /// Sync interval in seconds
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Venue both accounts live on
        #[arg(short, long, value_enum, default_value = "margin")]
        venue: VenueKind,

        /// Submit real orders instead of simulating
        #[arg(long)]
        live: bool,
    },

    /// Compute and print the action plan without executing anything
    Plan {
        /// Reference account identifier to mirror
        #[arg(short, long)]
        reference: String,

        /// Copy budget in quote currency
        #[arg(short, long)]
        budget: f64,

        /// Venue both accounts live on
        #[arg(short, long, value_enum, default_value = "margin")]
        venue: VenueKind,
    },

    /// Show the managed account balance
    Balance {
        /// Venue the managed account lives on
        #[arg(short, long, value_enum, default_value = "margin")]
        venue: VenueKind,
    },

    /// Show the effective configuration
    Config,
}

fn managed_account() -> Result<String> {
    std::env::var("MIRROR_MANAGED_ACCOUNT").context("MIRROR_MANAGED_ACCOUNT not set")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
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

    match cli.command {
        Commands::Run {
            reference,
            budget,
            interval,
            venue,
            live,
        } => {
            let config = SyncConfig {
                reference_account: reference.clone(),
                budget: Decimal::try_from(budget)?,
                sync_interval_ms: interval * 1000,
                dry_run: !live,
                ..SyncConfig::default()
            };

            let reference_adapter = build_adapter(venue, &reference, config.default_leverage)
                .context("building reference adapter")?;
            let managed = managed_account()?;
            let managed_adapter = build_adapter(venue, &managed, config.default_leverage)
                .context("building managed adapter")?;

            info!(
                reference = %reference,
                managed = %managed,
                venue = %managed_adapter.name(),
                "adapters ready"
            );

            let syncer = Arc::new(Syncer::new(config, reference_adapter, managed_adapter));

            // Progress printer; lagging here never blocks the loop
            let mut rx = syncer.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(SyncEvent::CycleCompleted {
                            target_positions,
                            changes,
                            stats,
                            ..
                        }) => {
                            println!(
                                "[{}] sync #{} | targets {} | +{} -{} ~{} flip {} | errors {}",
                                chrono::Local::now().format("%H:%M:%S"),
                                stats.syncs_completed,
                                target_positions.len(),
                                changes.to_add.len(),
                                changes.to_remove.len(),
                                changes.to_adjust.len(),
                                changes.to_flip.len(),
                                stats.errors
                            );
                        }
                        Ok(SyncEvent::ActionExecuted {
                            kind,
                            symbol,
                            size,
                            dry_run,
                            ..
                        }) => {
                            println!(
                                "  {} {} {} {}",
                                if dry_run { "[DRY RUN]" } else { "[LIVE]" },
                                kind.as_str(),
                                symbol,
                                size
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
            });

            // Ctrl+C stops the loop at the next safe point
            let stopper = syncer.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
                stopper.stop();
            });

            println!("\n=== mirrorbot ===");
            println!("Reference account: {}", reference);
            println!("Copy budget:       ${}", budget);
            println!("Sync interval:     {}s", interval);
            println!(
                "Mode:              {}",
                if live { "LIVE TRADING" } else { "DRY RUN (no real orders)" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            syncer.run().await;

            let stats = syncer.stats().await;
            println!("\n{}", stats);
        }

        Commands::Plan {
            reference,
            budget,
            venue,
        } => {
            let config = SyncConfig {
                reference_account: reference.clone(),
                budget: Decimal::try_from(budget)?,
                ..SyncConfig::default()
            };

            let reference_adapter = build_adapter(venue, &reference, config.default_leverage)
                .context("building reference adapter")?;
            let managed = managed_account()?;
            let managed_adapter = build_adapter(venue, &managed, config.default_leverage)
                .context("building managed adapter")?;

            let reference_positions = reference_adapter.fetch_positions().await?;
            let managed_positions = managed_adapter.fetch_positions().await?;

            let outcome = scale_to_budget(
                &reference_positions,
                config.budget,
                &ScalingOptions {
                    safety_buffer: config.safety_buffer,
                    default_leverage: config.default_leverage,
                    size_decimals: config.size_decimals,
                },
            )?;
            let diff = diff_positions(
                &outcome.positions,
                &managed_positions,
                &DiffOptions {
                    size_threshold_pct: config.size_threshold_pct,
                    min_position_value: config.min_position_value,
                },
            );

            println!("\n=== Reconciliation Plan ===");
            println!("Reference positions: {}", reference_positions.len());
            println!("Managed positions:   {}", managed_positions.len());
            println!("Scaling factor:      {}", outcome.scaling_factor);
            println!(
                "Estimated cost:      ${} (budget ${})",
                outcome.total_estimated_cost, config.budget
            );
            for warning in &outcome.warnings {
                println!("Warning: {}", warning);
            }

            println!(
                "Reference notional:  ${} -> ${} after scaling",
                outcome.original_total_value, outcome.total_market_value
            );
            println!("Reference margin:    ${}", outcome.original_total_cost);

            println!("\n--- Actions ({}) ---", diff.action_count());
            if diff.is_empty() {
                println!("  portfolios already in sync");
            }
            for pos in &diff.to_remove {
                println!("  close  {:<12} {} {}", pos.symbol, pos.side.as_str(), pos.size);
            }
            for flip in &diff.to_flip {
                println!(
                    "  flip   {:<12} {} {} -> {} {}",
                    flip.symbol,
                    flip.current.side.as_str(),
                    flip.current.size,
                    flip.target.side.as_str(),
                    flip.target.size
                );
            }
            for pos in &diff.to_add {
                println!(
                    "  open   {:<12} {} {} @ {}",
                    pos.symbol,
                    pos.side.as_str(),
                    pos.size,
                    pos.entry_price
                );
            }
            for adj in &diff.to_adjust {
                println!(
                    "  resize {:<12} {} -> {} ({:?})",
                    adj.symbol, adj.current_size, adj.target_size, adj.direction
                );
            }
        }

        Commands::Balance { venue } => {
            let config = SyncConfig::default();
            let managed = managed_account()?;
            let adapter = build_adapter(venue, &managed, config.default_leverage)
                .context("building managed adapter")?;

            let balance = adapter.fetch_balance().await?;

            println!("\n=== Managed Account ({}) ===", adapter.name());
            println!("Total margin: ${:.2}", balance.total);
            println!("Free margin:  ${:.2}", balance.free);
            println!("Used margin:  ${:.2}", balance.used);
        }

        Commands::Config => {
            let config = SyncConfig::default();

            println!("\n=== Sync Configuration ===\n");
            println!("Budget:              ${}", config.budget);
            println!("Sync Interval:       {}ms", config.sync_interval_ms);
            println!("Action Delay:        {}ms", config.action_delay_ms);
            println!("Dry Run:             {}", config.dry_run);

            println!("\nScaling:");
            println!("  Safety Buffer:     {}", config.safety_buffer);
            println!("  Default Leverage:  {}x", config.default_leverage);
            println!(
                "  Size Decimals:     {}",
                config
                    .size_decimals
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "per-position".to_string())
            );

            println!("\nDiffing:");
            println!(
                "  Size Threshold:    {}%",
                config.size_threshold_pct * Decimal::from(100)
            );
            println!("  Min Value:         ${}", config.min_position_value);
            println!("  Min Size:          {}", config.min_position_size);
        }
    }

    Ok(())
}
