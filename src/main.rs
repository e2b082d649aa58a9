//! Autotrader - Main Entry Point

use anyhow::Result;
use autotrader::broker::BrokerClient;
use autotrader::config::{Config, StrategyKind};
use autotrader::engine::{
    BreakoutStrategy, MomentumStrategy, Runner, Strategy, StrategyEngine,
};
use autotrader::persistence::TradeLog;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Autotrader CLI
#[derive(Parser)]
#[command(name = "autotrader")]
#[command(version, about = "Rule-based automated stock trading against a brokerage OpenAPI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a summary of the local trade log
    Status {
        /// Path to the SQLite trade log
        #[arg(short, long, default_value = "data/trades.db")]
        db: String,

        /// Number of recent trades to print
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    if let Some(Commands::Status { db, limit }) = cli.command {
        return show_status(&db, limit);
    }

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    if config.broker.app_key.is_empty() {
        warn!("no app_key configured; broker calls will be rejected");
    }

    let client = Arc::new(BrokerClient::new(&config.broker, config.broker_base_url())?);

    let strategy: Box<dyn Strategy> = match config.trading.strategy {
        StrategyKind::MomentumVolume => Box::new(MomentumStrategy::new(config.momentum.clone())),
        StrategyKind::VolatilityBreakout => {
            Box::new(BreakoutStrategy::new(config.breakout.clone())?)
        }
    };
    info!(strategy = strategy.name(), "strategy selected");

    let trade_log = TradeLog::new(&config.runner.trade_log_path)?;
    let engine = StrategyEngine::new(client, strategy, config.trading.clone())
        .with_trade_log(trade_log);
    let (runner, handle) = Runner::new(engine, config.runner.clone());

    // Ctrl-C requests a stop; the scheduler observes it promptly, even
    // mid-backoff.
    let ctrl_handle = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        ctrl_handle.stop();
    });

    runner.run().await;
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "autotrader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("autotrader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

/// Log the effective configuration with credentials masked.
fn log_config(config: &Config) {
    let mask = |secret: &str| -> String {
        let prefix: String = secret.chars().take(4).collect();
        format!("{prefix}***")
    };

    info!("Configuration:");
    info!("   Environment: {}", config.broker.environment);
    info!("   App key: {}", mask(&config.broker.app_key));
    info!("   Account: {}", mask(&config.broker.account_no));
    info!("   Strategy: {:?}", config.trading.strategy);
    info!("   Max positions: {}", config.trading.max_positions);
    info!("   Max buys/day: {}", config.trading.max_buys_per_day);
    info!("   Position ratio: {}", config.trading.position_ratio);
    info!(
        "   Take profit / stop loss: {} / {}",
        config.trading.take_profit_rate, config.trading.stop_loss_rate
    );
    info!("   Max hold days: {}", config.trading.max_hold_days);
}

fn show_status(db: &str, limit: usize) -> Result<()> {
    let log = TradeLog::new(db)?;
    let summary = log.summary()?;

    println!(
        "trades: {} total ({} buys, {} sells, {} rejected)",
        summary.total, summary.buys, summary.sells, summary.rejected
    );

    for record in log.recent(limit)? {
        println!(
            "{} {:>4} {:>8} x{:<6} @ {:<10} {} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.side.as_str(),
            record.symbol,
            record.quantity,
            record.price,
            if record.accepted { "accepted" } else { "REJECTED" },
            record.reason,
        );
    }
    Ok(())
}
