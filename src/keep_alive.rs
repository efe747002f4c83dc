// --------------------------------------------------
// Self-ping that keeps an idling host awake.
// Only runs in production with a target configured;
// failures are logged and otherwise ignored.
// --------------------------------------------------

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config::Config;

const USER_AGENT: &str = concat!("TaskFlow-KeepAlive/", env!("CARGO_PKG_VERSION"));

pub fn health_url(target: &str) -> String {
    format!("{}/api/health", target.trim_end_matches('/'))
}

pub fn spawn(config: &Config) -> Option<JoinHandle<()>> {
    if !config.production {
        tracing::info!("keep-alive disabled outside production");
        return None;
    }
    let Some(target) = config.keep_alive_url.as_deref() else {
        tracing::info!("keep-alive disabled, no target configured");
        return None;
    };

    let url = health_url(target);
    let every = config.keep_alive_interval.max(Duration::from_secs(1));
    tracing::info!(%url, interval_secs = every.as_secs(), "keep-alive started");

    Some(tokio::spawn(run(url, every)))
}

async fn run(url: String, every: Duration) {
    let client = match reqwest::Client::builder().user_agent(USER_AGENT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "keep-alive client could not be built");
            return;
        }
    };

    // first tick fires immediately
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        ping(&client, &url).await;
    }
}

async fn ping(client: &reqwest::Client, url: &str) {
    let started = Instant::now();
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::info!(latency_ms = started.elapsed().as_millis() as u64, "keep-alive ok");
        }
        Ok(response) => {
            tracing::warn!(
                status = response.status().as_u16(),
                latency_ms = started.elapsed().as_millis() as u64,
                "keep-alive got non-success status"
            );
        }
        Err(e) => tracing::warn!(error = %e, "keep-alive request failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_health_url() {
        assert_eq!(health_url("https://taskflow.onrender.com"), "https://taskflow.onrender.com/api/health");
        assert_eq!(health_url("https://taskflow.onrender.com/"), "https://taskflow.onrender.com/api/health");
    }

    #[test]
    fn disabled_outside_production() {
        let config = Config { keep_alive_url: Some("https://example.com".into()), ..Config::default() };
        assert!(spawn(&config).is_none());
    }

    #[test]
    fn disabled_without_target() {
        let config = Config { production: true, ..Config::default() };
        assert!(spawn(&config).is_none());
    }
}
