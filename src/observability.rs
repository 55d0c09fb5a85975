//! Session and call-level metrics, durably persisted.
//!
//! All metrics live in one JSON document (`reports/metrics.json`):
//! cumulative counters plus an ordered list of session records. Every
//! mutation read-modify-writes the whole document immediately so a crash
//! cannot lose buffered telemetry. A failed write is reported on stderr
//! and never propagated; observability must not take down a run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Success,
    Error,
}

/// One record per processing run. Mutated through the sink while running,
/// frozen after `end_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub change_request: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: SessionStatus,
    pub tokens_used: u64,
    pub cost: f64,
    pub test_cases_generated: u64,
    pub test_cases_updated: u64,
    pub retry_attempts: u64,
    pub schema_validation_failures: u64,
    pub errors: Vec<String>,
}

impl SessionRecord {
    fn open(session_id: &str, change_request: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            change_request: change_request.to_string(),
            start_time: Utc::now().to_rfc3339(),
            end_time: None,
            status: SessionStatus::Running,
            tokens_used: 0,
            cost: 0.0,
            test_cases_generated: 0,
            test_cases_updated: 0,
            retry_attempts: 0,
            schema_validation_failures: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetricsFile {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_tokens_used: u64,
    total_cost: f64,
    /// Count-weighted running average of session wall-clock time, seconds.
    average_response_time: f64,
    /// Count-weighted running average of per-call latency, seconds.
    average_call_latency: f64,
    llm_calls: u64,
    schema_validation_failures: u64,
    retry_attempts: u64,
    test_cases_generated: u64,
    test_cases_updated: u64,
    sessions: Vec<SessionRecord>,
}

/// Aggregate view for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub success_rate: f64,
    pub total_tokens_used: u64,
    pub total_cost: f64,
    pub average_response_time: f64,
    pub average_call_latency: f64,
    pub llm_calls: u64,
    pub test_cases_generated: u64,
    pub test_cases_updated: u64,
    pub schema_validation_failures: u64,
    pub retry_attempts: u64,
}

/// Final per-session aggregates passed to `end_session`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTotals {
    pub test_cases_generated: u64,
    pub test_cases_updated: u64,
}

pub struct MetricsSink {
    path: PathBuf,
    state: Mutex<MetricsFile>,
}

impl MetricsSink {
    /// Open the sink, loading existing metrics if present. A corrupt or
    /// missing file starts from zeroed counters.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn start_session(&self, session_id: &str, change_request: &str) {
        self.mutate(|m| {
            m.sessions
                .push(SessionRecord::open(session_id, change_request));
        });
    }

    /// Close a session and fold its counters into the global aggregates.
    /// Closing an unknown or already-closed session is a no-op.
    pub fn end_session(&self, session_id: &str, status: SessionStatus, totals: SessionTotals) {
        self.mutate(|m| {
            let Some(idx) = open_session_index(m, session_id) else {
                return;
            };
            let now = Utc::now();
            let elapsed = chrono::DateTime::parse_from_rfc3339(&m.sessions[idx].start_time)
                .map(|start| (now.with_timezone(&start.timezone()) - start).num_milliseconds())
                .unwrap_or(0) as f64
                / 1000.0;

            {
                let session = &mut m.sessions[idx];
                session.end_time = Some(now.to_rfc3339());
                session.status = status;
                session.test_cases_generated = totals.test_cases_generated;
                session.test_cases_updated = totals.test_cases_updated;
            }

            let session = m.sessions[idx].clone();
            m.total_requests += 1;
            match status {
                SessionStatus::Success => m.successful_requests += 1,
                _ => m.failed_requests += 1,
            }
            m.total_tokens_used += session.tokens_used;
            m.total_cost += session.cost;
            m.test_cases_generated += session.test_cases_generated;
            m.test_cases_updated += session.test_cases_updated;
            m.retry_attempts += session.retry_attempts;
            m.schema_validation_failures += session.schema_validation_failures;

            let closed = m.sessions.iter().filter(|s| s.end_time.is_some()).count() as f64;
            m.average_response_time =
                (m.average_response_time * (closed - 1.0) + elapsed) / closed;
        });
    }

    /// Record one model call attempt: tokens consumed (zero when usage
    /// metadata is absent), advisory cost, and wall-clock latency.
    pub fn log_call(&self, session_id: Option<&str>, tokens: u64, cost: f64, latency_secs: f64) {
        self.mutate(|m| {
            m.llm_calls += 1;
            let n = m.llm_calls as f64;
            m.average_call_latency = (m.average_call_latency * (n - 1.0) + latency_secs) / n;

            if let Some(id) = session_id {
                if let Some(idx) = open_session_index(m, id) {
                    m.sessions[idx].tokens_used += tokens;
                    m.sessions[idx].cost += cost;
                }
            }
        });
    }

    pub fn log_retry(&self, session_id: Option<&str>, reason: &str) {
        self.mutate(|m| {
            if let Some(idx) = session_id.and_then(|id| open_session_index(m, id)) {
                m.sessions[idx].retry_attempts += 1;
                m.sessions[idx].errors.push(format!("Retry: {reason}"));
            }
        });
    }

    pub fn log_validation_failure(&self, session_id: Option<&str>, detail: &str) {
        self.mutate(|m| {
            if let Some(idx) = session_id.and_then(|id| open_session_index(m, id)) {
                m.sessions[idx].schema_validation_failures += 1;
                m.sessions[idx]
                    .errors
                    .push(format!("Schema validation failure: {detail}"));
            }
        });
    }

    /// Append a run-level warning to the session error list.
    pub fn log_warning(&self, session_id: &str, message: &str) {
        self.mutate(|m| {
            if let Some(idx) = open_session_index(m, session_id) {
                m.sessions[idx].errors.push(message.to_string());
            }
        });
    }

    pub fn summary(&self) -> MetricsSummary {
        let m = self.state.lock().expect("metrics lock poisoned");
        let success_rate = if m.total_requests > 0 {
            m.successful_requests as f64 / m.total_requests as f64 * 100.0
        } else {
            0.0
        };
        MetricsSummary {
            total_requests: m.total_requests,
            success_rate,
            total_tokens_used: m.total_tokens_used,
            total_cost: m.total_cost,
            average_response_time: m.average_response_time,
            average_call_latency: m.average_call_latency,
            llm_calls: m.llm_calls,
            test_cases_generated: m.test_cases_generated,
            test_cases_updated: m.test_cases_updated,
            schema_validation_failures: m.schema_validation_failures,
            retry_attempts: m.retry_attempts,
        }
    }

    /// Most recent sessions, oldest first within the window.
    pub fn recent(&self, limit: usize) -> Vec<SessionRecord> {
        let m = self.state.lock().expect("metrics lock poisoned");
        let skip = m.sessions.len().saturating_sub(limit);
        m.sessions[skip..].to_vec()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        let m = self.state.lock().expect("metrics lock poisoned");
        m.sessions
            .iter()
            .rev()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Explicit bulk clear; the only way metrics are ever deleted.
    pub fn reset(&self) {
        self.mutate(|m| *m = MetricsFile::default());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, apply: impl FnOnce(&mut MetricsFile)) {
        let mut m = self.state.lock().expect("metrics lock poisoned");
        apply(&mut m);
        let body = match serde_json::to_string_pretty(&*m) {
            Ok(body) => body,
            Err(e) => {
                eprintln!("  Warning: failed to serialize metrics: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, body) {
            eprintln!(
                "  Warning: failed to save metrics to {}: {e}",
                self.path.display()
            );
        }
    }
}

/// Newest open session matching the id. Ids are expected to be unique;
/// lookups scan newest-first, and a closed session is never returned so
/// it can never be mutated again.
fn open_session_index(m: &MetricsFile, session_id: &str) -> Option<usize> {
    m.sessions
        .iter()
        .enumerate()
        .rev()
        .find(|(_, s)| s.session_id == session_id && s.end_time.is_none())
        .map(|(idx, _)| idx)
}
