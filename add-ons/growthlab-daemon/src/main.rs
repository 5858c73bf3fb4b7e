//! Growthlab Heartbeat Service
//!
//! Long-running daemon that keeps the article and trend feeds fresh in the background.
//! Every generation call goes through the shared governor, so a quota hit suspends the
//! heartbeat for the breaker cooldown instead of hammering the API.

use growthlab_core::{
    BackgroundGenerationScheduler, GeminiClient, GrowthConfig, QuotaCircuitBreaker, RequestGovernor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the daemon reports feed and breaker status.
const DEFAULT_REPORT_SECS: u64 = 300;

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[growthlab-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GrowthConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    // `growthlab-daemon --write-config <path>` seeds a config file and exits
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "--write-config") {
        let path = args
            .get(pos + 1)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from("config/growthlab.toml"));
        match config.save(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "wrote config"),
            Err(e) => {
                tracing::error!(error = %e, "failed to write config");
                std::process::exit(1);
            }
        }
        return;
    }

    let client = match GeminiClient::from_env(config.gemini.clone()) {
        Ok(Some(client)) => client,
        Ok(None) => {
            tracing::error!("no API key: set GROWTHLAB_API_KEY or GEMINI_API_KEY");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to build inference client");
            std::process::exit(1);
        }
    };

    let report_secs = std::env::var("GROWTHLAB_REPORT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_REPORT_SECS)
        .max(1);

    let breaker = QuotaCircuitBreaker::from_settings(&config.breaker);
    let governor = RequestGovernor::new(config.governor.clone(), breaker.clone());
    let heartbeat =
        BackgroundGenerationScheduler::new(governor.clone(), Arc::new(client), config.scheduler.clone())
            .spawn();

    tracing::info!(
        interval_secs = config.scheduler.interval_secs,
        max_concurrent = config.governor.max_concurrent,
        cooldown_secs = config.breaker.cooldown_secs,
        model = %config.gemini.model,
        "Growthlab daemon started"
    );

    let period = Duration::from_secs(report_secs);
    let mut report = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = report.tick() => {
                let feed = heartbeat.scheduler();
                tracing::info!(
                    articles = feed.primary_items().len(),
                    trends = feed.secondary_items().len(),
                    in_flight = governor.in_flight(),
                    suspended = breaker.is_suspended(),
                    "heartbeat status"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down daemon");
                break;
            }
        }
    }

    heartbeat.shutdown().await;
}
