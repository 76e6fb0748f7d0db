// cr3restore/src/restore/report.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use super::key::{DocumentKey, Environment};
use super::versions::RestoreDecision;
use crate::errors::{ErrorKind, RestoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreAction {
    Restored,
    /// The copy landed but the read-back afterwards failed.
    RestoredUnverified,
    SkippedNotFound,
    WouldRestore,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RestoreError> for ItemError {
    fn from(err: &RestoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of the diagnostic metadata lookup for one crash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MetadataStatus {
    NotQueried,
    Empty,
    Found(Value),
    Unavailable(ItemError),
}

/// Terminal record for one input identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreOutcome {
    /// The identifier exactly as it appeared in the crashes file.
    pub crash: Value,
    pub key: Option<DocumentKey>,
    pub decision: Option<RestoreDecision>,
    pub action: RestoreAction,
    pub new_version_id: Option<String>,
    pub error: Option<ItemError>,
    pub metadata: MetadataStatus,
}

impl RestoreOutcome {
    pub fn failed(
        crash: Value,
        key: Option<DocumentKey>,
        decision: Option<RestoreDecision>,
        err: &RestoreError,
        metadata: MetadataStatus,
    ) -> Self {
        Self {
            crash,
            key,
            decision,
            action: RestoreAction::Failed,
            new_version_id: None,
            error: Some(ItemError::from(err)),
            metadata,
        }
    }

    pub fn decided(
        crash: Value,
        decision: RestoreDecision,
        action: RestoreAction,
        new_version_id: Option<String>,
        metadata: MetadataStatus,
    ) -> Self {
        Self {
            crash,
            key: Some(decision.key.clone()),
            decision: Some(decision),
            action,
            new_version_id,
            error: None,
            metadata,
        }
    }

    fn crash_label(&self) -> String {
        match &self.crash {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// One human-readable report line.
    pub fn render(&self) -> String {
        let crash = self.crash_label();
        let selected = self.decision.as_ref().and_then(|d| d.selected.as_ref());
        match (self.action, selected) {
            (RestoreAction::Restored, Some(v)) => format!(
                "✅ Crash {}: restored {} ({} bytes, {}) to {} as {}",
                crash,
                v.version_id,
                v.size_bytes,
                v.last_modified.to_rfc3339(),
                v.key,
                self.new_version_id.as_deref().unwrap_or("?")
            ),
            (RestoreAction::RestoredUnverified, Some(v)) => format!(
                "⚠️ Crash {}: restored {} to {} as {} but could not verify it: {}",
                crash,
                v.version_id,
                v.key,
                self.new_version_id.as_deref().unwrap_or("?"),
                self.error.as_ref().map_or("unknown error", |e| e.message.as_str())
            ),
            (RestoreAction::WouldRestore, Some(v)) => format!(
                "🔍 Crash {}: would restore {} ({} bytes, {}) to {}",
                crash,
                v.version_id,
                v.size_bytes,
                v.last_modified.to_rfc3339(),
                v.key
            ),
            (RestoreAction::SkippedNotFound, _) => {
                format!("ℹ️  Crash {}: no valid previous version found", crash)
            }
            (RestoreAction::Failed, _) => match &self.error {
                Some(err) => format!("❌ Crash {}: failed [{}] {}", crash, err.kind, err.message),
                None => format!("❌ Crash {}: failed", crash),
            },
            (action, None) => format!("❓ Crash {}: {:?} without a selected version", crash, action),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub restored: usize,
    pub restored_unverified: usize,
    pub would_restore: usize,
    pub skipped_not_found: usize,
    pub failed: usize,
}

/// Everything a batch run produced, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub environment: Environment,
    pub threshold_bytes: u64,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub outcomes: Vec<RestoreOutcome>,
}

impl BatchReport {
    pub fn new(
        environment: Environment,
        threshold_bytes: u64,
        dry_run: bool,
        started_at: DateTime<Utc>,
        outcomes: Vec<RestoreOutcome>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            environment,
            threshold_bytes,
            dry_run,
            started_at,
            finished_at: Utc::now(),
            summary: summarize(&outcomes),
            outcomes,
        }
    }

    pub fn print(&self) {
        println!();
        println!("📋 Restore report {} ({})", self.run_id, self.environment);
        for outcome in &self.outcomes {
            println!("{}", outcome.render());
            match &outcome.metadata {
                MetadataStatus::Found(metadata) => println!("   CR3 metadata: {}", metadata),
                MetadataStatus::Empty => println!("   CR3 metadata: none recorded"),
                MetadataStatus::Unavailable(err) => println!("   CR3 metadata unavailable: {}", err.message),
                MetadataStatus::NotQueried => {}
            }
        }
        let s = &self.summary;
        println!();
        println!(
            "Total: {}, restored: {}, restored unverified: {}, would restore: {}, no valid version: {}, failed: {}",
            s.total, s.restored, s.restored_unverified, s.would_restore, s.skipped_not_found, s.failed
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize restore report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write restore report to {}", path.display()))?;
        Ok(())
    }
}

pub fn summarize(outcomes: &[RestoreOutcome]) -> ReportSummary {
    outcomes.iter().fold(
        ReportSummary {
            total: outcomes.len(),
            ..ReportSummary::default()
        },
        |mut summary, outcome| {
            match outcome.action {
                RestoreAction::Restored => summary.restored += 1,
                RestoreAction::RestoredUnverified => summary.restored_unverified += 1,
                RestoreAction::WouldRestore => summary.would_restore += 1,
                RestoreAction::SkippedNotFound => summary.skipped_not_found += 1,
                RestoreAction::Failed => summary.failed += 1,
            }
            summary
        },
    )
}
