//! Bounded per-session command history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

use backplane_mcp_protocol::{BackplaneError, ErrorKind};

use crate::adapter::is_sensitive_key;

/// Longest argument summary kept in an entry, in characters.
pub const MAX_ARGS_SUMMARY_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn from_result<T>(result: &Result<T, BackplaneError>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(err) => Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: String,
    pub args_summary: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: Outcome,
}

/// FIFO ring of entries; the oldest is evicted once `cap` is reached.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
}

impl History {
    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            entries: VecDeque::with_capacity(cap.min(128)),
            cap,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.cap {
            let excess = self.entries.len() + 1 - self.cap;
            self.entries.drain(0..excess);
        }
        self.entries.push_back(entry);
    }

    /// Entries oldest first; with `limit`, only the newest `limit` of them.
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let skip = limit
            .map(|l| self.entries.len().saturating_sub(l))
            .unwrap_or(0);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Compact, credential-free rendering of command arguments.
pub fn summarize_args(args: &Map<String, Value>) -> String {
    let masked: Map<String, Value> = args
        .iter()
        .map(|(k, v)| {
            if is_sensitive_key(k) {
                (k.clone(), Value::String("***".to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect();
    let rendered = Value::Object(masked).to_string();
    if rendered.chars().count() <= MAX_ARGS_SUMMARY_CHARS {
        rendered
    } else {
        let mut truncated: String = rendered.chars().take(MAX_ARGS_SUMMARY_CHARS).collect();
        truncated.push_str("...");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            command: format!("cmd-{}", n),
            args_summary: "{}".to_string(),
            timestamp: Utc::now(),
            duration_ms: 0,
            outcome: Outcome::Success,
        }
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let mut history = History::with_cap(3);
        for n in 0..10 {
            history.push(entry(n));
            assert!(history.len() <= 3);
        }
        let names: Vec<_> = history.snapshot(None).into_iter().map(|e| e.command).collect();
        assert_eq!(names, vec!["cmd-7", "cmd-8", "cmd-9"]);
    }

    #[test]
    fn test_snapshot_limit_takes_newest() {
        let mut history = History::with_cap(10);
        for n in 0..5 {
            history.push(entry(n));
        }
        let names: Vec<_> = history
            .snapshot(Some(2))
            .into_iter()
            .map(|e| e.command)
            .collect();
        assert_eq!(names, vec!["cmd-3", "cmd-4"]);
        assert_eq!(history.snapshot(Some(50)).len(), 5);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let mut history = History::with_cap(0);
        history.push(entry(1));
        history.push(entry(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.cap(), 1);
    }

    #[test]
    fn test_summary_masks_and_truncates() {
        let args = json!({"sql": "select 1", "password": "hunter2"});
        let summary = summarize_args(args.as_object().unwrap());
        assert!(summary.contains("select 1"));
        assert!(!summary.contains("hunter2"));

        let long = json!({"sql": "x".repeat(1000)});
        let summary = summarize_args(long.as_object().unwrap());
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), MAX_ARGS_SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = Outcome::from_result::<()>(&Err(BackplaneError::Exec("boom".into())));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "exec_error");
    }
}
