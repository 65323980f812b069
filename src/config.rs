//! Configuration types.

use std::time::Duration;

/// Task runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Size of the bounded local worker pool.
    pub worker_pool_size: usize,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
    /// How long terminal tasks are retained in the registry before reclamation.
    pub retention_window: Duration,
    /// Default maximum queued duration for envelopes that do not set one.
    pub default_max_queue: Duration,
    /// Default maximum running duration for envelopes that do not set one.
    pub default_max_run: Duration,
    /// Capacity of the lifecycle event broadcast bus.
    pub event_bus_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            sweep_interval: Duration::from_secs(30),
            retention_window: Duration::from_secs(30 * 60), // 30 minutes
            default_max_queue: Duration::from_secs(30 * 60),
            default_max_run: Duration::from_secs(60 * 60), // 1 hour
            event_bus_capacity: 256,
        }
    }
}

/// Outbound SMTP configuration for completion notifications.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl MailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `LONGRUN_SMTP_HOST` is not set (notifications disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("LONGRUN_SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("LONGRUN_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("LONGRUN_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("LONGRUN_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("LONGRUN_MAIL_FROM").unwrap_or_else(|_| username.clone());

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}
