//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! plans, apply reports, and snapshots to the user.

use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::apply::{ApplyReport, ResourceOutcome};
use crate::graph::{DependencyResolver, ResourceGraph};
use crate::planner::{ChangeKind, Plan};
use crate::state::Snapshot;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Planned change row for table display.
#[derive(Tabled)]
struct PlanOpRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Attributes")]
    attributes: String,
}

/// Apply result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Snapshot resource row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an execution plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - resources match the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = write!(output, "\nExecution Plan\n");
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            &plan.config_hash[..8.min(plan.config_hash.len())]
        );

        let mut rows: Vec<PlanOpRow> = Vec::new();
        let mut index = 0;
        for delete in &plan.deletes {
            index += 1;
            rows.push(PlanOpRow {
                index,
                change: Self::format_change_kind(ChangeKind::Delete),
                resource: delete.name.clone(),
                resource_type: delete.resource_type.clone(),
                attributes: String::new(),
            });
        }
        for op in plan.ops.iter().filter(|op| op.kind != ChangeKind::NoOp) {
            index += 1;
            rows.push(PlanOpRow {
                index,
                change: Self::format_change_kind(op.kind),
                resource: op.name.clone(),
                resource_type: op.resource_type.clone(),
                attributes: Self::truncate(&op.changed_attrs.join(", "), 40),
            });
        }

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().yellow(),
            summary.delete.to_string().red(),
            summary.unchanged
        );

        if detailed {
            output.push_str("\nDependencies:\n");
            for op in plan.ops.iter().filter(|op| op.kind != ChangeKind::NoOp) {
                let deps = if op.dependencies.is_empty() {
                    "(none)".to_string()
                } else {
                    op.dependencies.join(", ")
                };
                let _ = writeln!(output, "   {} <- {deps}", op.name);
            }
        }

        output
    }

    /// Formats an apply report for display.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ReportJson::from(report)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &ApplyReport) -> String {
        let mut output = String::new();

        let status = if report.is_success() {
            format!("{} Apply complete", "✓".green())
        } else {
            format!("{} Apply finished with errors", "✗".red())
        };
        let _ = write!(output, "\n{status}\n\n");

        if !report.results.is_empty() {
            let rows: Vec<ResultRow> = report
                .results
                .iter()
                .map(|r| ResultRow {
                    resource: r.name.clone(),
                    resource_type: r.resource_type.clone(),
                    outcome: Self::format_outcome(&r.outcome),
                })
                .collect();
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nChanged: {}, failed: {}, skipped: {}, cancelled: {}\n",
            report.changed_count(),
            report.failed_count(),
            report.skipped_count(),
            report.cancelled_count()
        );

        if !report.exports.is_empty() {
            output.push_str("\nOutputs:\n");
            for (name, value) in &report.exports {
                let _ = writeln!(output, "   {name} = {value}");
            }
        }

        output
    }

    /// Formats exported outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, serde_json::Value>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outputs).unwrap_or_default(),
            OutputFormat::Text => {
                if outputs.is_empty() {
                    return "No outputs exported.\n".to_string();
                }
                let mut output = String::new();
                for (name, value) in outputs {
                    let _ = writeln!(output, "{name} = {value}");
                }
                output
            }
        }
    }

    /// Formats the dependency graph.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph, resolver: &DependencyResolver) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&GraphJson::new(graph, resolver)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nDependency order ({} resources):\n", graph.len());
                for (position, name) in resolver.order().iter().enumerate() {
                    let deps = resolver.dependencies_of(name);
                    if deps.is_empty() {
                        let _ = writeln!(output, "   {}. {name}", position + 1);
                    } else {
                        let _ = writeln!(
                            output,
                            "   {}. {name} <- {}",
                            position + 1,
                            deps.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats a state snapshot.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nSnapshot: {}/{}\n\n",
                    snapshot.project, snapshot.environment
                );
                let _ = writeln!(output, "   Serial: {}", snapshot.serial);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    &snapshot.config_hash[..8.min(snapshot.config_hash.len())]
                );
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", snapshot.resources.len());

                if !snapshot.resources.is_empty() {
                    let rows: Vec<RecordRow> = snapshot
                        .resources
                        .values()
                        .map(|r| RecordRow {
                            resource: r.name.clone(),
                            resource_type: r.resource_type.clone(),
                            provider_id: Self::truncate(&r.provider_id, 24),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    let table = Table::new(rows).to_string();
                    output.push_str(&table);
                    output.push('\n');
                }

                output
            }
        }
    }

    /// Formats snapshot run history.
    #[must_use]
    pub fn format_history(&self, snapshot: &Snapshot, limit: usize) -> String {
        match self.format {
            OutputFormat::Json => {
                let entries: Vec<_> = snapshot.history.iter().rev().take(limit).collect();
                serde_json::to_string_pretty(&entries).unwrap_or_default()
            }
            OutputFormat::Text => {
                if snapshot.history.is_empty() {
                    return "No run history recorded.\n".to_string();
                }
                let mut output = String::new();
                for entry in snapshot.history.iter().rev().take(limit) {
                    let status = if entry.success {
                        "✓".green().to_string()
                    } else {
                        "✗".red().to_string()
                    };
                    let _ = writeln!(
                        output,
                        "{status} {} {} - {} resource(s)",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        entry.operation,
                        entry.resources.len()
                    );
                    if let Some(error) = &entry.error {
                        let _ = writeln!(output, "   error: {error}");
                    }
                }
                output
            }
        }
    }

    /// Formats a change kind with color.
    fn format_change_kind(kind: ChangeKind) -> String {
        match kind {
            ChangeKind::Create => "+create".green().to_string(),
            ChangeKind::Update => "~update".yellow().to_string(),
            ChangeKind::Replace => "!replace".yellow().to_string(),
            ChangeKind::Delete => "-delete".red().to_string(),
            ChangeKind::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// Formats a resource outcome with color.
    fn format_outcome(outcome: &ResourceOutcome) -> String {
        match outcome {
            ResourceOutcome::Created { .. }
            | ResourceOutcome::Updated { .. }
            | ResourceOutcome::Replaced { .. }
            | ResourceOutcome::Deleted { .. } => outcome.to_string().green().to_string(),
            ResourceOutcome::Unchanged => outcome.to_string().dimmed().to_string(),
            ResourceOutcome::Failed { .. } => outcome.to_string().red().to_string(),
            ResourceOutcome::Skipped { .. } | ResourceOutcome::Cancelled => {
                outcome.to_string().yellow().to_string()
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    config_hash: String,
    create: usize,
    update: usize,
    replace: usize,
    delete: usize,
    unchanged: usize,
    changes: Vec<ChangeJson>,
}

#[derive(serde::Serialize)]
struct ChangeJson {
    change: String,
    resource: String,
    resource_type: String,
    changed_attrs: Vec<String>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        let summary = plan.summary();
        let mut changes: Vec<ChangeJson> = plan
            .deletes
            .iter()
            .map(|d| ChangeJson {
                change: ChangeKind::Delete.to_string(),
                resource: d.name.clone(),
                resource_type: d.resource_type.clone(),
                changed_attrs: Vec::new(),
            })
            .collect();
        changes.extend(
            plan.ops
                .iter()
                .filter(|op| op.kind != ChangeKind::NoOp)
                .map(|op| ChangeJson {
                    change: op.kind.to_string(),
                    resource: op.name.clone(),
                    resource_type: op.resource_type.clone(),
                    changed_attrs: op.changed_attrs.clone(),
                }),
        );
        Self {
            config_hash: plan.config_hash.clone(),
            create: summary.create,
            update: summary.update,
            replace: summary.replace,
            delete: summary.delete,
            unchanged: summary.unchanged,
            changes,
        }
    }
}

#[derive(serde::Serialize)]
struct ReportJson {
    success: bool,
    changed: usize,
    failed: usize,
    skipped: usize,
    cancelled: usize,
    results: Vec<ResultJson>,
    exports: BTreeMap<String, serde_json::Value>,
}

#[derive(serde::Serialize)]
struct ResultJson {
    resource: String,
    resource_type: String,
    outcome: String,
}

impl From<&ApplyReport> for ReportJson {
    fn from(report: &ApplyReport) -> Self {
        Self {
            success: report.is_success(),
            changed: report.changed_count(),
            failed: report.failed_count(),
            skipped: report.skipped_count(),
            cancelled: report.cancelled_count(),
            results: report
                .results
                .iter()
                .map(|r| ResultJson {
                    resource: r.name.clone(),
                    resource_type: r.resource_type.clone(),
                    outcome: r.outcome.to_string(),
                })
                .collect(),
            exports: report.exports.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_multibyte_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghij", 8), "abcde...");
        // Cutting inside a multi-byte character must not panic.
        assert_eq!(OutputFormatter::truncate("ממממממממממ", 8), "מממממ...");
    }
}

#[derive(serde::Serialize)]
struct GraphJson {
    order: Vec<String>,
    edges: BTreeMap<String, Vec<String>>,
}

impl GraphJson {
    fn new(graph: &ResourceGraph, resolver: &DependencyResolver) -> Self {
        let edges = graph
            .nodes()
            .iter()
            .map(|node| {
                (
                    node.id.name.clone(),
                    resolver.dependencies_of(&node.id.name).to_vec(),
                )
            })
            .collect();
        Self {
            order: resolver.order().to_vec(),
            edges,
        }
    }
}
