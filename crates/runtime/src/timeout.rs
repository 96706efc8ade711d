//! Per-resource construction deadlines.

use std::time::Duration;

/// Deadline applied to each construction or in-place reconfigure unless
/// the environment overrides it.
pub const DEFAULT_RESOURCE_CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable overriding the per-resource deadline. Kept exactly
/// as deployed fleets set it. Accepts `"300ms"`, `"45s"`, `"2m"`, `"1h"`,
/// or bare seconds.
pub const RESOURCE_CONFIGURATION_TIMEOUT_ENV: &str = "VIAM_RESOURCE_CONFIGURATION_TIMEOUT";

/// The effective per-resource deadline for this process.
#[must_use]
pub fn resource_configuration_timeout() -> Duration {
    timeout_from(std::env::var(RESOURCE_CONFIGURATION_TIMEOUT_ENV).ok().as_deref())
}

fn timeout_from(raw: Option<&str>) -> Duration {
    match raw {
        None => DEFAULT_RESOURCE_CONFIGURATION_TIMEOUT,
        Some(raw) => parse_duration(raw).unwrap_or_else(|| {
            tracing::warn!(
                value = raw,
                "unparseable {RESOURCE_CONFIGURATION_TIMEOUT_ENV}, using the default"
            );
            DEFAULT_RESOURCE_CONFIGURATION_TIMEOUT
        }),
    }
}

/// Parse a duration string: a float with an `ms` / `s` / `m` / `h` suffix,
/// or bare seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (value, scale_ms) = if let Some(v) = raw.strip_suffix("ms") {
        (v, 1.0)
    } else if let Some(v) = raw.strip_suffix('s') {
        (v, 1_000.0)
    } else if let Some(v) = raw.strip_suffix('m') {
        (v, 60_000.0)
    } else if let Some(v) = raw.strip_suffix('h') {
        (v, 3_600_000.0)
    } else {
        (raw, 1_000.0)
    };
    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value * scale_ms / 1_000.0))
}
