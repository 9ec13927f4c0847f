// src/main.rs - Console front end for the market dashboard
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_dashboard::alignment::viewer_offset_secs;
use market_dashboard::api::HttpDataClient;
use market_dashboard::config::DashboardConfig;
use market_dashboard::markers::PatternVisibility;
use market_dashboard::settings::{FileSettingsStorage, SelectionState};
use market_dashboard::views::DashboardView;
use market_dashboard::{CycleOutcome, RefreshCoordinator, SnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "market_dashboard")]
#[command(about = "Poll the analytics service and keep a synchronized market snapshot")]
struct Args {
    /// Ticker to follow (overrides TICKER)
    #[arg(short, long)]
    ticker: Option<String>,

    /// Analytics service base URL (overrides API_BASE)
    #[arg(long)]
    api_base: Option<String>,

    /// Trading daemon base URL (overrides TRADING_DAEMON_BASE)
    #[arg(long)]
    trading_daemon_base: Option<String>,

    /// Refresh interval in seconds (overrides REFRESH_INTERVAL_SECS)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Directory holding persisted settings (overrides SETTINGS_DIR)
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Pattern keys to mark on the chart, e.g. doji-5m
    #[arg(long = "show-pattern")]
    show_patterns: Vec<String>,

    /// Run a single refresh cycle and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    fn apply(&self, mut config: DashboardConfig) -> DashboardConfig {
        if let Some(ticker) = &self.ticker {
            config.ticker = ticker.clone();
        }
        if let Some(api_base) = &self.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(base) = &self.trading_daemon_base {
            config.trading_daemon_base = base.clone();
        }
        if let Some(secs) = self.interval.filter(|secs| *secs > 0) {
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.settings_dir {
            config.settings_dir = dir.clone();
        }
        config
    }
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = tracing_appender::rolling::daily("logs", "market_dashboard");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_level(true)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenv::dotenv() {
        println!("Warning: Could not load .env file: {}", e);
    }

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .init();
    }

    let args = Args::parse();
    let config = args.apply(DashboardConfig::from_env());

    info!("🚀 Starting market dashboard");
    info!("   🌐 Analytics service: {}", config.api_base);
    info!("   🤖 Trading daemon: {}", config.trading_daemon_base);
    info!("   ⏱️  Refresh interval: {:?}", config.refresh_interval);
    info!("   📁 Settings: {}", config.settings_dir.display());

    let client = Arc::new(HttpDataClient::new(&config)?);
    info!("   📈 Ticker: {}", client.ticker());
    let selection = Arc::new(SelectionState::load(Arc::new(FileSettingsStorage::new(
        &config.settings_dir,
    ))));
    let store = Arc::new(SnapshotStore::new());
    let visibility: PatternVisibility = args.show_patterns.iter().cloned().collect();
    if !visibility.is_empty() {
        info!(
            "   🏷️  Chart markers for {} pattern(s): {}",
            visibility.len(),
            visibility.keys().collect::<Vec<_>>().join(", ")
        );
    }

    {
        let selection = Arc::clone(&selection);
        store.subscribe(move |snapshot| {
            if snapshot.is_loading {
                return;
            }
            let view = DashboardView::build(
                snapshot,
                &selection.settings(),
                &visibility,
                viewer_offset_secs(),
            );
            info!("📊 {}", view.summary_line());
        });
    }

    let coordinator = RefreshCoordinator::new(client, Arc::clone(&store), selection)
        .with_interval(config.refresh_interval)
        .with_chart_bars_back(config.chart_bars_back);

    if args.once {
        return match coordinator.refresh_now().await {
            CycleOutcome::Failed(message) => Err(message.into()),
            _ => Ok(()),
        };
    }

    coordinator.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("🛑 Shutting down");
    coordinator.stop();

    Ok(())
}
