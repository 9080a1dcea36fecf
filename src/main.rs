mod cache;
mod chart;
mod config;
mod dashboard;
mod data;
mod error;
mod forecast;
mod format;
mod indicators;
mod intraday;
mod market;
mod upload;
mod webui;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "PSX Forecast Dashboard: simulated Pakistan Stock Exchange prices, forecasts and charts in the browser",
    after_help = "EXAMPLES:
    # Serve the dashboard on the default 0.0.0.0:8080
    cargo run --release

    # Local only, refreshing every minute
    cargo run --release -- --host 127.0.0.1 --port 3000 --refresh-secs 60

    # Print one simulated quote table and exit
    cargo run --release -- --snapshot"
)]
struct Args {
    /// Address to bind (env PSX_DASH_HOST, default 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (env PSX_DASH_PORT, default 8080)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between automatic quote refreshes (env PSX_DASH_REFRESH_SECS, default 300)
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Seconds a cached snapshot, history or forecast stays valid (env PSX_DASH_CACHE_TTL_SECS, default 300)
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Print one simulated quote table to stdout and exit
    #[arg(long)]
    snapshot: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("psx_dashboard=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    let settings = config::DashboardSettings::resolve(
        args.host,
        args.port,
        args.refresh_secs,
        args.cache_ttl_secs,
    );
    config::report_optional_provider_keys();

    if args.snapshot {
        let mut dashboard = dashboard::Dashboard::new(settings.cache_ttl);
        print!("{}", dashboard.snapshot(true).render_table());
        return Ok(());
    }

    info!(
        "Refreshing every {}s, cache TTL {}s",
        settings.refresh_interval.as_secs(),
        settings.cache_ttl.as_secs()
    );
    if let Err(e) = webui::run_webui_server(settings).await {
        error!("WebUI server failed: {}", e);
        return Err(e);
    }
    Ok(())
}
