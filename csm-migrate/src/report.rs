//! Materialization report
//!
//! Summary of one run: a row per node (created, reused or failed), aggregate
//! counts, asset counts, the published URL, the primary error when the run
//! failed and any rollback that could not finish.

use crate::services::asset_resolver::AssetSummary;
use crate::services::rollback::{RollbackIncomplete, RollbackOutcome};
use crate::services::tree_materializer::{MaterializationResult, NodeStatus};
use crate::services::workflow_advancer::WorkflowStage;
use crate::types::EntryHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Root published, every node materialized
    Success,
    /// Root published, at least one failed subtree was omitted
    PartialFailure,
    /// Nothing published; created entries were rolled back
    Fatal,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Fatal => 1,
            RunOutcome::PartialFailure => 2,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialFailure => "partial failure",
            RunOutcome::Fatal => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub path: String,
    pub content_type: String,
    pub title: Option<String>,
    /// NEW, REUSED or FAILED
    pub status: String,
    pub uid: Option<String>,
    pub error: Option<String>,
    /// Entry was created and then deleted by rollback
    pub rolled_back: bool,
    pub asset_failures: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub nodes: usize,
    pub created: usize,
    pub reused: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

impl ReportCounts {
    pub fn from_rows(rows: &[ReportRow]) -> Self {
        let mut counts = ReportCounts {
            nodes: rows.len(),
            ..Default::default()
        };
        for row in rows {
            match row.status.as_str() {
                "NEW" => counts.created += 1,
                "REUSED" => counts.reused += 1,
                "FAILED" => counts.failed += 1,
                _ => {}
            }
            if row.rolled_back {
                counts.rolled_back += 1;
            }
        }
        counts
    }
}

fn status_label(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Created => "NEW",
        NodeStatus::Reused => "REUSED",
        NodeStatus::Failed => "FAILED",
        NodeStatus::Pending => "PENDING",
    }
}

/// One row per node, parents before children
pub fn rows_from_tree(result: &MaterializationResult, deleted: &HashSet<String>) -> Vec<ReportRow> {
    result
        .nodes()
        .into_iter()
        .map(|node| {
            let uid = node.entry.as_ref().map(|h| h.uid.clone());
            ReportRow {
                path: node.path.to_string(),
                content_type: node.content_type.clone(),
                title: node.title.clone(),
                status: status_label(node.status).to_string(),
                rolled_back: node.status == NodeStatus::Created
                    && uid.as_ref().map_or(false, |u| deleted.contains(u)),
                uid,
                error: node.error.as_ref().map(ToString::to_string),
                asset_failures: node
                    .assets
                    .iter()
                    .filter_map(|a| a.result.as_ref().err().map(|e| e.to_string()))
                    .collect(),
            }
        })
        .collect()
}

/// Content-store edit page for an entry
pub fn edit_url(app_url: &str, handle: &EntryHandle) -> String {
    format!(
        "{}/content-type/{}/{}/entry/{}/edit?branch=main",
        app_url.trim_end_matches('/'),
        handle.content_type,
        handle.locale,
        handle.uid
    )
}

/// Storefront URL of a published page
pub fn published_url(base: &str, page_path: &str) -> String {
    if base.ends_with('/') || page_path.starts_with('/') {
        format!("{}{}", base, page_path)
    } else {
        format!("{}/{}", base, page_path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializationReport {
    pub run_id: Uuid,
    pub environment: String,
    pub locale: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub root_uid: Option<String>,
    pub final_stage: Option<WorkflowStage>,
    pub published_url: Option<String>,
    pub edit_url: Option<String>,
    pub rows: Vec<ReportRow>,
    pub counts: ReportCounts,
    pub assets: AssetSummary,
    pub primary_error: Option<String>,
    pub rollback: RollbackOutcome,
    pub rollback_warning: Option<RollbackIncomplete>,
    pub warnings: Vec<String>,
}

impl MaterializationReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn rows_with_status(&self, status: &str) -> impl Iterator<Item = &ReportRow> {
        let status = status.to_string();
        self.rows.iter().filter(move |r| r.status == status)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for MaterializationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {} ({}, {}): {} in {:.1}s",
            self.run_id,
            self.environment,
            self.locale,
            self.outcome,
            self.duration_ms() as f64 / 1000.0
        )?;
        writeln!(f)?;
        writeln!(f, "{:<8} {:<22} {:<32} {:<24} PATH", "STATUS", "TYPE", "TITLE", "UID")?;
        for row in &self.rows {
            let status = if row.rolled_back { "ROLLBACK" } else { row.status.as_str() };
            writeln!(
                f,
                "{:<8} {:<22} {:<32} {:<24} {}",
                status,
                row.content_type,
                truncate(row.title.as_deref().unwrap_or("-"), 32),
                row.uid.as_deref().unwrap_or("-"),
                row.path
            )?;
            if let Some(error) = &row.error {
                writeln!(f, "         error: {}", error)?;
            }
            for failure in &row.asset_failures {
                writeln!(f, "         asset: {}", failure)?;
            }
        }
        writeln!(f)?;
        writeln!(
            f,
            "Entries: {} new, {} reused, {} failed, {} rolled back",
            self.counts.created, self.counts.reused, self.counts.failed, self.counts.rolled_back
        )?;
        writeln!(
            f,
            "Assets:  {} new, {} existing, {} skipped, {} failed",
            self.assets.new, self.assets.existing, self.assets.skipped, self.assets.failed
        )?;
        if let Some(url) = &self.published_url {
            writeln!(f, "Published: {}", url)?;
        }
        if let Some(url) = &self.edit_url {
            writeln!(f, "Edit:      {}", url)?;
        }
        if let Some(error) = &self.primary_error {
            writeln!(f, "Error:     {}", error)?;
        }
        for protected in &self.rollback.protected {
            writeln!(f, "Kept:      {} ({})", protected.handle, protected.reason)?;
        }
        if let Some(warning) = &self.rollback_warning {
            writeln!(f, "WARNING:   {}", warning)?;
        }
        for warning in &self.warnings {
            writeln!(f, "Warning:   {}", warning)?;
        }
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
