mod api;
mod backend;
mod config;
mod envelope;
mod error;
mod normalize;
mod pipeline;
mod prompt;
mod rate_limit;
mod script;
#[cfg(test)]
mod test_support;
mod validate;

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{build_router, AppState};
use crate::backend::build_backend;
use crate::config::AppConfig;
use crate::pipeline::MenuPipeline;
use crate::rate_limit::{build_counter_store, RateLimitPolicy, RateLimiter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "menu_translate_server=info,axum=info".into()),
        )
        .compact()
        .init();

    let cfg = AppConfig::from_env()?;
    if cfg.hf_api_key.is_none() {
        warn!("HF_API_KEY is not set; menu parsing requests will fail until it is configured");
    }

    let backend = build_backend(&cfg)?;
    let store = build_counter_store(&cfg.rate_limit)?;
    let limiter = RateLimiter::new(store, RateLimitPolicy::from(&cfg.rate_limit));
    let pipeline = MenuPipeline::new(
        backend,
        cfg.model_profile,
        cfg.model_id.clone(),
        cfg.script_ranges.clone(),
    );
    let state = Arc::new(AppState::new(cfg.clone(), limiter, pipeline));

    let app = build_router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        model = %cfg.model_id,
        profile = cfg.model_profile.as_str(),
        counter_store = cfg.rate_limit.store.as_str(),
        hourly_limit = cfg.rate_limit.hourly_limit,
        daily_limit = cfg.rate_limit.daily_limit,
        script_ranges = %cfg.script_ranges,
        "starting menu-translate-server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
