//! CLMM Hedger - Main Entry Point
//!
//! Runs the poll loop by default. The pool leg is simulated; the hedge leg is
//! simulated unless `LIVE_TRADING=true`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use clmm_hedger::config::Config;
use clmm_hedger::exchange::{
    BinanceClient, BinanceHedgeVenue, HedgeVenue, PaperHedgeVenue, PriceOracle,
};
use clmm_hedger::notify::{AlertSink, LogAlertSink, TelegramNotifier};
use clmm_hedger::persistence::PersistenceManager;
use clmm_hedger::pool::{PaperPoolLedger, PoolLedger};
use clmm_hedger::position::{Position, PositionStatus};
use clmm_hedger::strategy::{
    compute_range, forward_shutdown, shutdown_signal, ControllerConfig, RebalanceController,
    SchedulerConfig, SchedulerLoop,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// CLMM Hedger CLI
#[derive(Parser)]
#[command(name = "clmm-hedger")]
#[command(version, about = "Delta-neutral concentrated liquidity with a perpetual short hedge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll loop (default)
    Run,

    /// Show the persisted position and its recent transitions
    Status {
        /// Path to SQLite database (default: persistence.db_path)
        #[arg(short, long)]
        db: Option<String>,

        /// Show the transition log
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compute a range and capital split without touching any venue
    Range {
        /// Center price
        #[arg(short, long)]
        price: Decimal,

        /// Capital in the paired asset (default: strategy.base_capital)
        #[arg(short, long)]
        capital: Option<Decimal>,

        /// Half-width fraction (default: strategy.price_range_fraction)
        #[arg(short, long)]
        fraction: Option<Decimal>,
    },

    /// Reset a faulted position so the next run redeploys it
    Recover {
        /// Recover even if the legs are not confirmed closed
        #[arg(long)]
        force: bool,
    },
}

/// Hedge leg mode: Live (real orders) or Paper (simulated fills).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize comprehensive logging
    init_logging()?;

    // Load configuration
    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Status { db, verbose } => {
            let db = db.unwrap_or_else(|| config.persistence.db_path.clone());
            show_status(&db, verbose)
        }
        Commands::Range {
            price,
            capital,
            fraction,
        } => show_range(&config, price, capital, fraction),
        Commands::Recover { force } => recover(config, force).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            CLMM Hedger v{} - Delta-Neutral LP              ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    config.validate()?;
    log_config(&config);

    let mode = trading_mode();
    let (controller, persistence) = build_controller(&config, mode)?;

    let position = match persistence.load_position()? {
        Some(position) => {
            info!(
                "📂 [PERSISTENCE] Restored {} position, range [{}, {}], hedge {}",
                position.status, position.lower_price, position.upper_price, position.hedge_size
            );
            position
        }
        None => {
            info!("📂 [PERSISTENCE] No previous position found, starting fresh");
            Position::uninitialized()
        }
    };
    let position = controller.reconcile_on_startup(position).await;

    let scheduler = SchedulerLoop::new(
        controller,
        SchedulerConfig::from_config(&config),
        position,
    );

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    forward_shutdown(shutdown_signal(), shutdown_tx);

    info!("🚀 Starting poll loop...");
    let position = scheduler.run(shutdown_rx).await;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "🏁 Final position: {} | range [{}, {}] | hedge {} | rebalances {}",
        position.status,
        position.lower_price,
        position.upper_price,
        position.hedge_size,
        position.rebalance_count
    );
    info!("👋 CLMM Hedger shutdown complete");
    Ok(())
}

/// Determine hedge mode from environment.
fn trading_mode() -> TradingMode {
    if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        warn!("⚠️  LIVE HEDGE MODE - real futures orders against a simulated pool leg!");
        TradingMode::Live
    } else {
        info!("📝 PAPER MODE - pool and hedge legs are simulated");
        TradingMode::Paper
    }
}

/// Wire the controller to its collaborators.
fn build_controller(
    config: &Config,
    mode: TradingMode,
) -> Result<(Arc<RebalanceController>, Arc<PersistenceManager>)> {
    let persistence = Arc::new(PersistenceManager::new(&config.persistence.db_path)?);

    let binance = Arc::new(BinanceClient::new(&config.binance)?);
    if config.binance.api_key.is_empty() {
        info!("⚠️  No API keys provided. Public price feed only.");
    }
    let oracle: Arc<dyn PriceOracle> = binance.clone();

    let ledger: Arc<dyn PoolLedger> = Arc::new(PaperPoolLedger::new(
        config.tokens.pool_asset.clone(),
        config.tokens.paired_asset.clone(),
    ));

    let venue: Arc<dyn HedgeVenue> = match mode {
        TradingMode::Live => Arc::new(BinanceHedgeVenue::new(
            binance,
            config.strategy.pair_symbol.clone(),
            config.binance.quantity_precision,
        )),
        TradingMode::Paper => Arc::new(PaperHedgeVenue::new(
            config.strategy.pair_symbol.clone(),
            oracle.clone(),
        )),
    };

    let alerts: Arc<dyn AlertSink> = match &config.notifications.telegram {
        Some(telegram) => {
            info!("📨 Alerts delivered to Telegram chat {}", telegram.chat_id);
            Arc::new(TelegramNotifier::new(telegram)?)
        }
        None => {
            info!("📨 No notifier configured, alerts go to the log");
            Arc::new(LogAlertSink)
        }
    };

    let controller = RebalanceController::new(
        ControllerConfig::from_config(config),
        oracle,
        ledger,
        venue,
        alerts,
        persistence.clone(),
    );

    Ok((Arc::new(controller), persistence))
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "clmm-hedger.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("clmm_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Pair: {}", config.strategy.pair_symbol);
    info!(
        "   Base Capital: {} {}",
        config.strategy.base_capital, config.tokens.paired_asset.symbol
    );
    info!(
        "   Range Half-Width: {:.2}%",
        config.strategy.price_range_fraction * dec!(100)
    );
    info!(
        "   Rebalance Threshold: {:.2}%",
        config.strategy.rebalance_threshold_fraction * dec!(100)
    );
    info!(
        "   Slippage Tolerance: {:.2}%",
        config.strategy.slippage_tolerance * dec!(100)
    );
    info!("   Check Interval: {}s", config.strategy.check_interval_secs);
    info!("   Call Timeout: {}s", config.execution.call_timeout_secs);
    info!(
        "   Decimals: {} {} / {} {}",
        config.tokens.pool_asset.symbol,
        config.tokens.pool_asset.decimals,
        config.tokens.paired_asset.symbol,
        config.tokens.paired_asset.decimals
    );
}

/// Dry-run the range calculator.
fn show_range(
    config: &Config,
    price: Decimal,
    capital: Option<Decimal>,
    fraction: Option<Decimal>,
) -> Result<()> {
    let capital = capital.unwrap_or(config.strategy.base_capital);
    let fraction = fraction.unwrap_or(config.strategy.price_range_fraction);
    let plan = compute_range(price, capital, fraction)?;

    let t = config.strategy.rebalance_threshold_fraction;

    println!("Price:      {}", price);
    println!("Capital:    {}", capital);
    println!("Range:      [{}, {}]", plan.lower_price, plan.upper_price);
    println!(
        "Deposit:    {} {} + {} {}",
        plan.pool_asset_amount.round_dp(9),
        config.tokens.pool_asset.symbol,
        plan.paired_asset_amount.round_dp(6),
        config.tokens.paired_asset.symbol
    );
    println!(
        "Hedge:      short {} {}",
        plan.pool_asset_amount.round_dp(9),
        config.tokens.pool_asset.symbol
    );
    println!(
        "Rebalance:  price <= {} or >= {}",
        plan.lower_price * (Decimal::ONE + t),
        plan.upper_price * (Decimal::ONE - t)
    );
    Ok(())
}

/// Operator reset of a faulted position.
async fn recover(config: Config, force: bool) -> Result<()> {
    config.validate()?;
    let (controller, persistence) = build_controller(&config, trading_mode())?;

    let Some(position) = persistence.load_position()? else {
        println!("❌ No saved position found; nothing to recover.");
        return Ok(());
    };

    if position.status != PositionStatus::Faulted {
        println!("ℹ️  Position is {}; nothing to recover.", position.status);
        return Ok(());
    }

    let reset = controller.recover(position, force).await?;
    println!(
        "✅ Position reset to {}. The next run will redeploy both legs.",
        reset.status
    );
    Ok(())
}

/// Show the persisted position from the database.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              CLMM HEDGER STATUS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The hedger has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(position) = persistence.load_position()? else {
        println!("\n❌ No saved position found in database.");
        return Ok(());
    };

    println!("\n📊 Position");
    println!("   Status:      {}", position.status);
    println!(
        "   Range:       [{}, {}] (entry {})",
        position.lower_price, position.upper_price, position.entry_price
    );
    println!(
        "   Pool leg:    {} / {} ({})",
        position.pool_asset_amount,
        position.paired_asset_amount,
        position
            .pool_handle
            .as_ref()
            .map(|h| h.id.as_str())
            .unwrap_or("closed")
    );
    println!(
        "   Hedge leg:   short {} ({})",
        position.hedge_size,
        position
            .hedge_order_ref
            .as_ref()
            .map(|o| o.order_id.as_str())
            .unwrap_or("closed")
    );
    println!("   Net delta:   {}", position.net_delta());
    println!("   Rebalances:  {}", position.rebalance_count);
    if let Some(opened_at) = position.opened_at {
        println!("   Opened:      {}", opened_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "   Updated:     {}",
        position.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if let Some(fault) = &position.fault {
        println!("\n🚨 Fault");
        println!("   Step:        {} ({} leg)", fault.step, fault.step.leg());
        println!("   Legs:        {:?}", fault.legs);
        println!("   Error:       {}", fault.error);
        println!("   At:          {}", fault.at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if verbose {
        let events = persistence.recent_events(20)?;
        println!("\n📜 Recent transitions ({})", events.len());
        for event in events {
            println!(
                "   {} {:<13} [{}, {}] hedge {}{}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.status.as_str(),
                event.lower_price,
                event.upper_price,
                event.hedge_size,
                event
                    .detail
                    .map(|d| format!(" | {}", d))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}
