//! Cooldown-gated alert delivery.
//!
//! The [`Notifier`] turns [`AnomalyEvent`]s into [`AlertMessage`]s and hands
//! them to an [`AlertTransport`]. A global mute (maintenance mode) and a
//! per-key cooldown keep repeated conditions from flooding the channel. Only a
//! successful delivery touches the cooldown table, so a failed send is retried
//! on the next qualifying event.

pub mod cooldown;
pub mod webhook;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::detector::AnomalyEvent;

pub use cooldown::CooldownTable;
pub use webhook::WebhookTransport;

/// Cooldown key for an alert.
///
/// Failovers are keyed per ordered pair so `blue -> green` and
/// `green -> blue` cool down independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertKey {
    /// Failover between two specific pools or addresses.
    Failover {
        /// Source pool or address.
        from: String,
        /// Destination pool or address.
        to: String,
    },
    /// Error-rate breach (single shared key).
    HighErrorRate,
}

impl AlertKey {
    /// Cooldown key for an event.
    pub fn for_event(event: &AnomalyEvent) -> Self {
        match event {
            AnomalyEvent::Failover { from, to, .. } => Self::Failover {
                from: from.clone(),
                to: to.clone(),
            },
            AnomalyEvent::HighErrorRate { .. } => Self::HighErrorRate,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failover { from, to } => write!(f, "failover:{from}->{to}"),
            Self::HighErrorRate => f.write_str("high_error_rate"),
        }
    }
}

/// Formatted alert ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    /// Short headline.
    pub title: String,
    /// Human-readable details.
    pub body: String,
}

impl AlertMessage {
    /// Title and body joined for plain-text channels.
    pub fn text(&self) -> String {
        format!("*{}*\n{}", self.title, self.body)
    }
}

/// Errors produced while delivering an alert.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or timed out.
    #[error("alert request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("alert endpoint returned status {status}")]
    Status {
        /// HTTP status code returned.
        status: u16,
    },
}

/// Outbound channel for alerts.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Deliver one message. `Ok` means the endpoint acknowledged it.
    async fn deliver(&self, message: &AlertMessage) -> Result<(), TransportError>;
}

/// Why a notification was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Maintenance mode is on.
    Muted,
    /// The same alert key was delivered within the cooldown.
    Cooldown,
}

/// Why a notification attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No notification endpoint is configured.
    NotConfigured,
    /// The transport reported an error.
    Transport(String),
}

/// Result of [`Notifier::notify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The transport acknowledged the alert.
    Delivered,
    /// The alert was intentionally not sent.
    Suppressed(SuppressReason),
    /// The alert was wanted but could not be delivered.
    Failed(FailureReason),
}

/// Settings for the [`Notifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierConfig {
    /// Minimum spacing between deliveries of the same alert key.
    pub cooldown: Duration,
    /// Global mute of all alerts.
    pub muted: bool,
    /// Informational label of the expected active pool.
    pub active_pool: String,
    /// Bound on distinct cooldown keys.
    pub max_cooldown_keys: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::seconds(300),
            muted: false,
            active_pool: "blue".to_owned(),
            max_cooldown_keys: cooldown::DEFAULT_MAX_KEYS,
        }
    }
}

/// Applies mute and cooldown policy, then delivers through the transport.
pub struct Notifier {
    transport: Option<Arc<dyn AlertTransport>>,
    cooldowns: CooldownTable,
    muted: bool,
    active_pool: String,
}

impl Notifier {
    /// Create a notifier. `None` for the transport means no endpoint is
    /// configured; every attempt then fails without side effects.
    pub fn new(config: NotifierConfig, transport: Option<Arc<dyn AlertTransport>>) -> Self {
        Self {
            transport,
            cooldowns: CooldownTable::new(config.cooldown, config.max_cooldown_keys),
            muted: config.muted,
            active_pool: config.active_pool,
        }
    }

    /// Notify about `event` using the current wall clock.
    pub async fn notify(&mut self, event: &AnomalyEvent) -> NotifyOutcome {
        self.notify_at(event, Utc::now()).await
    }

    /// Notify about `event` as if the current time were `now`.
    pub async fn notify_at(&mut self, event: &AnomalyEvent, now: DateTime<Utc>) -> NotifyOutcome {
        let key = AlertKey::for_event(event);

        if self.muted {
            info!(alert = %key, reason = "maintenance", "alert suppressed (maintenance mode)");
            return NotifyOutcome::Suppressed(SuppressReason::Muted);
        }

        if self.cooldowns.is_cooling_down(&key, now) {
            info!(alert = %key, reason = "cooldown", "alert suppressed (cooldown)");
            return NotifyOutcome::Suppressed(SuppressReason::Cooldown);
        }

        let Some(transport) = self.transport.as_ref() else {
            warn!(alert = %key, "alert not sent: no notification endpoint configured");
            return NotifyOutcome::Failed(FailureReason::NotConfigured);
        };

        let message = format_message(event, &self.active_pool, now);
        match transport.deliver(&message).await {
            Ok(()) => {
                info!(alert = %key, title = %message.title, "alert sent");
                self.cooldowns.record(key, now);
                NotifyOutcome::Delivered
            }
            Err(e) => {
                warn!(alert = %key, error = %e, "failed to send alert");
                NotifyOutcome::Failed(FailureReason::Transport(e.to_string()))
            }
        }
    }

    /// Toggle maintenance mode.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Whether maintenance mode is on.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Whether a transport is configured.
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Read-only view of the cooldown table.
    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }
}

/// Render an event as a human-readable alert.
pub fn format_message(event: &AnomalyEvent, active_pool: &str, now: DateTime<Utc>) -> AlertMessage {
    let time = now.format("%Y-%m-%d %H:%M:%S UTC");
    match event {
        AnomalyEvent::Failover { scope, from, to } => AlertMessage {
            title: format!("Blue/Green Alert: {scope} failover"),
            body: format!(
                "Failover detected: {from} \u{2192} {to}\nConfigured active pool: {active_pool}\nTime: {time}"
            ),
        },
        AnomalyEvent::HighErrorRate {
            rate_percent,
            threshold_percent,
            window_size,
            pool,
        } => AlertMessage {
            title: "Blue/Green Alert: high error rate".to_owned(),
            body: format!(
                "High error rate: {rate_percent:.1}% (threshold: {threshold_percent}%)\n\
                 Last {window_size} requests, serving pool: {serving}\n\
                 Configured active pool: {active_pool}\nTime: {time}",
                serving = pool.as_deref().unwrap_or("unknown"),
            ),
        },
    }
}
