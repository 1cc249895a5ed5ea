//! Poolwatch: blue/green failover and error-rate watcher.
//!
//! Tails a reverse proxy access log, detects pool failovers and server-error
//! rate breaches, and sends cooldown-gated webhook alerts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration loading and validation.
pub mod config;
/// Rolling error window and failover detection.
pub mod detector;
/// Structured logging setup.
pub mod logging;
/// Cooldown-gated alert delivery.
pub mod notifier;
/// Access log line parsing.
pub mod parser;
/// Access log tailing with rotation handling.
pub mod source;
/// The tail → parse → detect → notify loop.
pub mod watcher;
