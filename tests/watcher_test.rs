//! End-to-end tests for the tail → parse → detect → notify loop.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use poolwatch::detector::{AnomalyEvent, Detector, DetectorConfig, FailoverScope};
use poolwatch::notifier::{
    AlertMessage, AlertTransport, Notifier, NotifierConfig, NotifyOutcome, SuppressReason,
    TransportError,
};
use poolwatch::source::StartPosition;
use poolwatch::watcher::{scan_file, TailSettings, Watcher};
use tokio::sync::watch;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<AlertMessage>>,
}

impl RecordingTransport {
    fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .map(|m| m.title.clone())
            .collect()
    }
}

#[async_trait]
impl AlertTransport for RecordingTransport {
    async fn deliver(&self, message: &AlertMessage) -> Result<(), TransportError> {
        self.sent.lock().expect("lock").push(message.clone());
        Ok(())
    }
}

fn json_line(pool: &str, upstream_status: &str, status: &str) -> String {
    format!(
        r#"{{"pool":"{pool}","upstream_status":"{upstream_status}","upstream_addr":"10.0.0.1:3000","status":"{status}"}}"#
    )
}

fn append_lines(path: &Path, lines: &[String]) {
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .expect("open append");
    for line in lines {
        writeln!(f, "{line}").expect("write line");
    }
}

fn watcher(path: &Path, window_size: usize, transport: &Arc<RecordingTransport>) -> Watcher {
    watcher_from(path, StartPosition::Beginning, window_size, transport)
}

fn watcher_from(
    path: &Path,
    start: StartPosition,
    window_size: usize,
    transport: &Arc<RecordingTransport>,
) -> Watcher {
    let settings = TailSettings {
        path: path.to_path_buf(),
        start,
        poll_interval: Duration::from_millis(10),
        retry_max: Duration::from_millis(50),
    };
    let detector = Detector::new(DetectorConfig {
        window_size,
        threshold_percent: 20.0,
        evaluate_every: 1,
    });
    let transport: Arc<dyn AlertTransport> = Arc::clone(transport) as Arc<dyn AlertTransport>;
    let notifier = Notifier::new(NotifierConfig::default(), Some(transport));
    Watcher::new(settings, detector, notifier)
}

#[tokio::test]
async fn process_line_ignores_noise_and_reports_failover() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(RecordingTransport::default());
    let mut w = watcher(&dir.path().join("access.log"), 200, &transport);

    assert!(w.process_line("nginx: worker process started").await.is_empty());
    assert!(w.process_line(&json_line("blue", "200", "200")).await.is_empty());
    assert!(w.process_line("{broken json").await.is_empty());

    let processed = w.process_line(&json_line("green", "200", "200")).await;
    assert_eq!(processed.len(), 1);
    assert_eq!(
        processed[0].event,
        AnomalyEvent::Failover {
            scope: FailoverScope::Pool,
            from: "blue".to_owned(),
            to: "green".to_owned(),
        }
    );
    assert_eq!(processed[0].outcome, NotifyOutcome::Delivered);
    assert_eq!(w.detector().records_seen(), 2);
}

#[tokio::test]
async fn repeated_failover_is_suppressed_by_cooldown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(RecordingTransport::default());
    let mut w = watcher(&dir.path().join("access.log"), 200, &transport);

    w.process_line(&json_line("blue", "200", "200")).await;
    w.process_line(&json_line("green", "200", "200")).await;
    w.process_line(&json_line("blue", "200", "200")).await;
    let processed = w.process_line(&json_line("green", "200", "200")).await;

    assert_eq!(
        processed[0].outcome,
        NotifyOutcome::Suppressed(SuppressReason::Cooldown)
    );
    assert_eq!(transport.titles().len(), 2);
}

#[tokio::test]
async fn runtime_mute_silences_alerts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(RecordingTransport::default());
    let mut w = watcher(&dir.path().join("access.log"), 200, &transport);
    w.notifier_mut().set_muted(true);

    w.process_line(&json_line("blue", "200", "200")).await;
    let processed = w.process_line(&json_line("green", "200", "200")).await;
    assert_eq!(
        processed[0].outcome,
        NotifyOutcome::Suppressed(SuppressReason::Muted)
    );
    assert!(transport.titles().is_empty());
}

#[tokio::test]
async fn poll_once_reports_missing_file_then_reads_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    let transport = Arc::new(RecordingTransport::default());
    let mut w = watcher(&path, 10, &transport);

    assert!(w.poll_once().await.is_err());

    let mut lines: Vec<String> = (0..7).map(|_| json_line("blue", "200", "200")).collect();
    lines.extend((0..3).map(|_| json_line("blue", "502", "502")));
    lines.push("garbage".to_owned());
    append_lines(&path, &lines);

    assert_eq!(w.poll_once().await.expect("poll"), 11);
    assert_eq!(
        transport.titles(),
        vec!["Blue/Green Alert: high error rate".to_owned()]
    );
    assert!(w.detector().window().is_empty());
}

#[tokio::test]
async fn log_created_after_start_is_read_from_first_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    let transport = Arc::new(RecordingTransport::default());
    let mut w = watcher_from(&path, StartPosition::End, 200, &transport);

    assert!(w.poll_once().await.is_err());

    append_lines(
        &path,
        &[
            json_line("blue", "200", "200"),
            json_line("green", "200", "200"),
        ],
    );

    assert_eq!(w.poll_once().await.expect("poll"), 2);
    assert_eq!(
        transport.titles(),
        vec!["Blue/Green Alert: pool failover".to_owned()]
    );
}

#[tokio::test]
async fn existing_log_is_tailed_from_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    append_lines(
        &path,
        &[
            json_line("blue", "200", "200"),
            json_line("green", "200", "200"),
        ],
    );
    let transport = Arc::new(RecordingTransport::default());
    let mut w = watcher_from(&path, StartPosition::End, 200, &transport);

    assert_eq!(w.poll_once().await.expect("poll"), 0);
    append_lines(&path, &[json_line("green", "200", "200")]);
    assert_eq!(w.poll_once().await.expect("poll"), 1);
    assert!(transport.titles().is_empty());
}

#[tokio::test]
async fn run_processes_appended_lines_until_shutdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    let transport = Arc::new(RecordingTransport::default());
    let w = watcher(&path, 200, &transport);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(w.run(shutdown_rx));

    // The file appears after the watcher started.
    tokio::time::sleep(Duration::from_millis(50)).await;
    append_lines(
        &path,
        &[
            json_line("blue", "200", "200"),
            json_line("green", "200", "200"),
        ],
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while transport.titles().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        transport.titles(),
        vec!["Blue/Green Alert: pool failover".to_owned()]
    );

    shutdown_tx.send(true).expect("watcher is listening");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("watcher stops")
        .expect("watcher task completes");
}

#[test]
fn scan_file_reports_without_notifying() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    append_lines(
        &path,
        &[
            "/docker-entrypoint.sh: Configuration complete; ready for start up".to_owned(),
            json_line("blue", "200", "200"),
            json_line("blue", "200", "200"),
            json_line("green", "200", "200"),
        ],
    );

    let summary = scan_file(&path, DetectorConfig::default()).expect("scan");
    assert_eq!(summary.lines, 4);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.events.len(), 1);
}

#[test]
fn scan_file_evaluates_unterminated_last_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    let text = format!(
        "{}\n{}",
        json_line("blue", "200", "200"),
        json_line("green", "200", "200")
    );
    std::fs::write(&path, text).expect("write log");

    let summary = scan_file(&path, DetectorConfig::default()).expect("scan");
    assert_eq!(summary.lines, 2);
    assert_eq!(summary.records, 2);
    assert_eq!(
        summary.events,
        vec![AnomalyEvent::Failover {
            scope: FailoverScope::Pool,
            from: "blue".to_owned(),
            to: "green".to_owned(),
        }]
    );
}
