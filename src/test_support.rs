//! Fixtures shared by unit tests.

use std::time::Duration;

use axum::Router;

use crate::config::{AppConfig, CounterStoreKind, RateLimitConfig};
use crate::prompt::ModelProfile;
use crate::script::ScriptRanges;

/// Configuration with default limits, a memory store and model `test/model`.
pub fn test_config(api_base: &str, api_key: Option<&str>) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 3000,
        hf_api_key: api_key.map(ToOwned::to_owned),
        hf_api_base: api_base.to_string(),
        model_profile: ModelProfile::Mixtral,
        model_id: "test/model".to_string(),
        inference_timeout: Duration::from_secs(5),
        script_ranges: ScriptRanges::default(),
        rate_limit: RateLimitConfig {
            hourly_limit: 20,
            daily_limit: 1000,
            hourly_window: Duration::from_secs(3600),
            daily_window: Duration::from_secs(86_400),
            fail_open: false,
            charge_both: true,
            identity_header: "x-forwarded-for".to_string(),
            anonymous_identity: "unknown".to_string(),
            store: CounterStoreKind::Memory,
        },
    }
}

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}
