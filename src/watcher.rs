//! The single cooperative loop: tail → parse → detect → notify.
//!
//! One [`Watcher`] owns the log tail, the detector and the notifier, so all
//! state is mutated by one task and records are evaluated in log order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PoolwatchConfig;
use crate::detector::{AnomalyEvent, Detector, DetectorConfig};
use crate::notifier::{AlertTransport, Notifier, NotifyOutcome, WebhookTransport};
use crate::parser::parse_line;
use crate::source::{LogTail, SourceError, StartPosition};

/// How the watcher reads its log file.
#[derive(Debug, Clone)]
pub struct TailSettings {
    /// Log file to tail.
    pub path: PathBuf,
    /// Where the first successful open starts reading.
    pub start: StartPosition,
    /// Sleep between polls with no new data.
    pub poll_interval: Duration,
    /// Upper bound on the retry backoff while the file is unavailable.
    pub retry_max: Duration,
}

/// An anomaly together with what the notifier did about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    /// Detected anomaly.
    pub event: AnomalyEvent,
    /// Notification result.
    pub outcome: NotifyOutcome,
}

/// Owns all pipeline state for one access log.
pub struct Watcher {
    settings: TailSettings,
    tail: Option<LogTail>,
    next_start: StartPosition,
    detector: Detector,
    notifier: Notifier,
}

impl Watcher {
    /// Assemble a watcher from its parts.
    pub fn new(settings: TailSettings, detector: Detector, notifier: Notifier) -> Self {
        Self {
            next_start: settings.start,
            settings,
            tail: None,
            detector,
            notifier,
        }
    }

    /// Build a watcher from validated configuration.
    ///
    /// A webhook transport is created only when a webhook URL is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &PoolwatchConfig) -> anyhow::Result<Self> {
        let transport: Option<Arc<dyn AlertTransport>> = match &config.alerts.webhook_url {
            Some(url) => Some(Arc::new(
                WebhookTransport::new(
                    url.clone(),
                    config.alerts.username.clone(),
                    config.alerts.icon_emoji.clone(),
                    config.request_timeout(),
                )
                .context("failed to build webhook transport")?,
            )),
            None => {
                warn!("no webhook URL configured, alerts will only be logged");
                None
            }
        };

        let settings = TailSettings {
            path: config.source.path.clone(),
            start: if config.source.start_from_beginning {
                StartPosition::Beginning
            } else {
                StartPosition::End
            },
            poll_interval: config.poll_interval(),
            retry_max: Duration::from_secs(config.source.retry_max_secs),
        };

        Ok(Self::new(
            settings,
            Detector::new(config.detector()),
            Notifier::new(config.notifier(), transport),
        ))
    }

    /// Run one line through parser, detector and notifier.
    ///
    /// Lines that are not access log records are ignored.
    pub async fn process_line(&mut self, line: &str) -> Vec<Processed> {
        let Some(record) = parse_line(line) else {
            return Vec::new();
        };

        let events = self.detector.observe(&record);
        let mut processed = Vec::with_capacity(events.len());
        for event in events {
            info!(event = ?event, "anomaly detected");
            let outcome = self.notifier.notify(&event).await;
            processed.push(Processed { event, outcome });
        }
        processed
    }

    /// Open the log if needed, read new lines and process them.
    ///
    /// Returns the number of lines read. If the log was missing when first
    /// looked up, it is read from its first byte once it appears.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the log cannot be opened or read; the
    /// caller retries later.
    pub async fn poll_once(&mut self) -> Result<usize, SourceError> {
        if self.tail.is_none() {
            let tail = match LogTail::open(&self.settings.path, self.next_start) {
                Ok(tail) => tail,
                Err(e) => {
                    if matches!(e, SourceError::Unavailable { .. }) {
                        self.next_start = StartPosition::Beginning;
                    }
                    return Err(e);
                }
            };
            info!(
                path = %self.settings.path.display(),
                start = ?self.next_start,
                "tailing access log"
            );
            self.tail = Some(tail);
        }
        let Some(tail) = self.tail.as_mut() else {
            return Ok(0);
        };

        let lines = tail.poll()?;
        for line in &lines {
            self.process_line(line).await;
        }
        Ok(lines.len())
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Source errors are logged and retried with exponential backoff; nothing
    /// inside the loop is fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let initial = Duration::from_millis(500).min(self.settings.retry_max);
        let mut backoff = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: self.settings.retry_max,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        info!(path = %self.settings.path.display(), "watcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(0) => {
                    backoff.reset();
                    self.settings.poll_interval
                }
                Ok(lines) => {
                    backoff.reset();
                    debug!(lines, "processed log lines");
                    continue;
                }
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(self.settings.retry_max);
                    match &e {
                        SourceError::Unavailable { .. } => {
                            info!(error = %e, retry_in_ms = delay_ms(delay), "waiting for log file");
                        }
                        SourceError::Io { .. } => {
                            warn!(error = %e, retry_in_ms = delay_ms(delay), "log read failed");
                        }
                    }
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("watcher stopped");
    }

    /// The detector, for inspection.
    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// The notifier, for inspection or runtime toggles.
    pub fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Totals from a dry-run [`scan_file`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    /// Lines read from the file.
    pub lines: usize,
    /// Lines recognised as access log records.
    pub records: usize,
    /// Anomalies detected, in order.
    pub events: Vec<AnomalyEvent>,
}

/// Read `path` from the beginning through parser and detector without
/// notifying anyone.
///
/// The file is treated as complete: a final line without a trailing newline
/// is still evaluated.
///
/// # Errors
///
/// Returns a [`SourceError`] if the file cannot be opened or read.
pub fn scan_file(path: &Path, config: DetectorConfig) -> Result<ScanSummary, SourceError> {
    let mut tail = LogTail::open(path, StartPosition::Beginning)?;
    let mut detector = Detector::new(config);
    let mut summary = ScanSummary::default();

    loop {
        let before = tail.offset();
        let lines = tail.poll()?;
        if lines.is_empty() && tail.offset() == before {
            break;
        }
        for line in &lines {
            summary.scan(&mut detector, line);
        }
    }

    // The file is not growing, so a last line without a newline is complete.
    if let Some(line) = tail.take_remainder()? {
        summary.scan(&mut detector, &line);
    }

    Ok(summary)
}

impl ScanSummary {
    fn scan(&mut self, detector: &mut Detector, line: &str) {
        self.lines = self.lines.saturating_add(1);
        let Some(record) = parse_line(line) else {
            return;
        };
        self.records = self.records.saturating_add(1);
        self.events.extend(detector.observe(&record));
    }
}
