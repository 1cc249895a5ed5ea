//! Access log line parsing.
//!
//! Turns one raw proxy log line into a [`RequestRecord`]. Two line shapes are
//! recognised: a JSON object (nginx `escape=json` formats) and whitespace
//! separated `key=value` tokens. Anything else (startup banners, error log
//! noise, foreign formats) yields `None` and is dropped by the caller.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Pool identity used when the proxy did not report one.
pub const UNKNOWN_POOL: &str = "unknown";

/// Synthetic non-error status used when the upstream status is absent.
pub const ABSENT_STATUS: &str = "000";

/// Placeholder nginx writes for variables without a value.
const ABSENT_SENTINEL: &str = "-";

/// `key=value`, `key="quoted value"`, or an unquoted comma list such as
/// `upstream_status=502, 200`.
///
/// A key must start the line or follow whitespace. Bare quoted fields (the
/// request line, user agent, referer) match the first alternative without a
/// key capture, so `key=` text inside them is never read as a field.
static KV_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""[^"]*"|(?:^|\s)([A-Za-z_][A-Za-z0-9_]*)=(?:"([^"]*)"|([^\s,]*(?:,\s*[^\s,=]+)*))"#,
    )
    .expect("static key=value pattern is valid")
});

/// One observed request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Backend pool identity, or [`UNKNOWN_POOL`].
    pub pool: String,
    /// Upstream status: one code, a comma list (one per attempt), or empty.
    pub upstream_status: String,
    /// Upstream address: empty, one address, or a comma list paralleling
    /// `upstream_status`.
    pub upstream_addr: String,
    /// Final status returned to the client.
    pub status: String,
}

/// A single upstream attempt paired from the status and address lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt<'a> {
    /// Status code reported for this attempt (may be empty).
    pub status: &'a str,
    /// Address contacted for this attempt.
    pub addr: &'a str,
}

impl RequestRecord {
    /// Whether this request counts as a server error for the rolling window.
    ///
    /// True when any upstream attempt or the final client status is 5xx.
    pub fn is_error(&self) -> bool {
        split_list(&self.upstream_status).any(is_server_error) || is_server_error(&self.status)
    }

    /// Pair upstream statuses with upstream addresses.
    ///
    /// Returns `None` when the two lists have different lengths, which makes
    /// the record ineligible for attempt-level failover.
    pub fn attempts(&self) -> Option<Vec<Attempt<'_>>> {
        let statuses: Vec<&str> = split_list(&self.upstream_status).collect();
        let addrs: Vec<&str> = split_list(&self.upstream_addr).collect();
        if statuses.len() != addrs.len() {
            return None;
        }
        Some(
            statuses
                .into_iter()
                .zip(addrs)
                .map(|(status, addr)| Attempt { status, addr })
                .collect(),
        )
    }
}

/// Returns `true` for exactly three ASCII digits in `500..=599`.
pub fn is_server_error(code: &str) -> bool {
    let code = code.trim();
    code.len() == 3
        && code.bytes().all(|b| b.is_ascii_digit())
        && code.parse::<u16>().is_ok_and(|c| (500..=599).contains(&c))
}

/// Parse a raw log line into a [`RequestRecord`].
///
/// Returns `None` when the line has no recognisable shape or lacks either of
/// the required `pool` / `upstream_status` fields.
pub fn parse_line(raw: &str) -> Option<RequestRecord> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    let fields = if line.starts_with('{') {
        json_fields(line)?
    } else {
        kv_fields(line)
    };

    build_record(&fields)
}

/// Extract the known fields from a JSON object line.
///
/// Fields of an unexpected JSON type are kept as present-but-empty so the
/// record degrades instead of vanishing.
fn json_fields(line: &str) -> Option<HashMap<String, String>> {
    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;

    let mut fields = HashMap::new();
    for key in ["pool", "upstream_status", "upstream_addr", "status"] {
        let Some(raw) = object.get(key) else {
            continue;
        };
        let text = match raw {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        fields.insert(key.to_owned(), text);
    }
    Some(fields)
}

/// Extract the `key=value` tokens from a plain text line.
///
/// The first occurrence of a key wins.
fn kv_fields(line: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for caps in KV_TOKEN.captures_iter(line) {
        let Some(key) = caps.get(1) else {
            continue;
        };
        let Some(value) = caps.get(2).or_else(|| caps.get(3)) else {
            continue;
        };
        fields
            .entry(key.as_str().to_owned())
            .or_insert_with(|| value.as_str().to_owned());
    }
    fields
}

fn build_record(fields: &HashMap<String, String>) -> Option<RequestRecord> {
    let pool = fields.get("pool")?.trim();
    let upstream_status = fields.get("upstream_status")?.trim();

    let pool = if pool.is_empty() || pool == ABSENT_SENTINEL {
        UNKNOWN_POOL.to_owned()
    } else {
        pool.to_owned()
    };

    let upstream_status = if upstream_status == ABSENT_SENTINEL {
        ABSENT_STATUS.to_owned()
    } else {
        upstream_status.to_owned()
    };

    Some(RequestRecord {
        pool,
        upstream_status,
        upstream_addr: optional_field(fields, "upstream_addr"),
        status: optional_field(fields, "status"),
    })
}

fn optional_field(fields: &HashMap<String, String>, key: &str) -> String {
    match fields.get(key).map(|v| v.trim()) {
        Some(v) if v != ABSENT_SENTINEL => v.to_owned(),
        _ => String::new(),
    }
}

/// Split a comma list, treating `-` elements as empty. An empty input yields
/// no elements.
fn split_list(value: &str) -> impl Iterator<Item = &str> {
    let value = value.trim();
    value
        .split(',')
        .filter(move |_| !value.is_empty())
        .map(|part| {
            let part = part.trim();
            if part == ABSENT_SENTINEL {
                ""
            } else {
                part
            }
        })
}
