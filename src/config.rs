use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: billing-config -> runner scan cadence
pub static BILLING_RUN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("BILLING_RUN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60)
});

/// key: gateway-config -> amounts the simulated gateway always declines
pub static GATEWAY_DECLINE_AMOUNTS: Lazy<HashSet<i64>> = Lazy::new(|| {
    std::env::var("GATEWAY_DECLINE_AMOUNTS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .filter_map(|raw| raw.trim().parse::<i64>().ok())
                .collect::<HashSet<_>>()
        })
        .unwrap_or_else(|| HashSet::from([4002]))
});

/// key: gateway-config -> optional ceiling above which charges are declined
pub static GATEWAY_DECLINE_OVER: Lazy<Option<i64>> = Lazy::new(|| {
    std::env::var("GATEWAY_DECLINE_OVER")
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value > 0)
});

/// Endpoint lifecycle events are delivered to. Unset disables webhook delivery.
pub static WEBHOOK_ENDPOINT: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("WEBHOOK_ENDPOINT"));

/// Shared secret used to sign webhook payloads.
pub static WEBHOOK_SECRET: Lazy<Option<String>> = Lazy::new(|| read_optional_env("WEBHOOK_SECRET"));

/// Per-delivery timeout for webhook posts. Defaults to 5 seconds.
pub static WEBHOOK_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("WEBHOOK_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
