use anyhow::{Context, Result, bail};
use rpcnats_lite::server::{DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE_DELAY, SupervisorConfig};
use std::time::Duration;
use url::Url;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_SUBJECT: &str = "service-example";

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub nats_url: String,
    pub subject: String,
    pub settle_delay: Duration,
    pub poll_interval: Duration,
}

impl ServiceConfig {
    /// Read `NATS_URL`, `NATS_SUBJECT`, `SETTLE_DELAY_MS` and `POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = lookup("NATS_URL").unwrap_or_else(|| DEFAULT_NATS_URL.to_string());
        let url = Url::parse(&nats_url).with_context(|| format!("invalid NATS_URL '{nats_url}'"))?;
        if url.host_str().is_none() {
            bail!("NATS_URL '{nats_url}' has no host");
        }

        let subject = lookup("NATS_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        if subject.trim().is_empty() {
            bail!("NATS_SUBJECT must not be empty");
        }

        let settle_delay = millis(&lookup, "SETTLE_DELAY_MS")?.unwrap_or(DEFAULT_SETTLE_DELAY);
        let poll_interval = millis(&lookup, "POLL_INTERVAL_MS")?.unwrap_or(DEFAULT_POLL_INTERVAL);

        Ok(Self {
            nats_url,
            subject,
            settle_delay,
            poll_interval,
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(&self.nats_url, &self.subject)
            .with_settle_delay(self.settle_delay)
            .with_poll_interval(self.poll_interval)
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got '{raw}'"))?;
    if ms == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Some(Duration::from_millis(ms)))
}
