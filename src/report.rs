use std::sync::Mutex;

use colored::Colorize;
use indexmap::IndexMap;
use tracing::warn;

/// Everything that can degrade a run without failing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    MissingState,
    MissingPlan,
    VersionDowngrade,
    DependencyCycle,
    DroppedConsumer,
    SkippedVariable,
    InvalidPattern,
    LockFailed,
    StateHistory,
    MissingProject,
}

impl WarningKind {
    pub fn label(&self) -> &'static str {
        match self {
            WarningKind::MissingState => "missing state",
            WarningKind::MissingPlan => "missing plan",
            WarningKind::VersionDowngrade => "version downgrade",
            WarningKind::DependencyCycle => "dependency cycle",
            WarningKind::DroppedConsumer => "dropped consumer",
            WarningKind::SkippedVariable => "skipped variable",
            WarningKind::InvalidPattern => "invalid pattern",
            WarningKind::LockFailed => "lock failed",
            WarningKind::StateHistory => "state history",
            WarningKind::MissingProject => "missing project",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub workspace: Option<String>,
    pub message: String,
}

/// Terminal state of one workspace migration unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Done,
    Failed(String),
    /// Filtered out by the selection pattern or cancelled before launch.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct WorkspaceOutcome {
    pub name: String,
    pub status: UnitStatus,
    pub workspace_created: bool,
    pub variables_created: usize,
    pub variables_skipped: usize,
    pub state_serial: Option<u64>,
}

impl WorkspaceOutcome {
    pub fn skipped(name: &str, reason: &str) -> Self {
        WorkspaceOutcome {
            name: name.to_string(),
            status: UnitStatus::Skipped(reason.to_string()),
            workspace_created: false,
            variables_created: 0,
            variables_skipped: 0,
            state_serial: None,
        }
    }

    pub fn failed(name: &str, error: &str) -> Self {
        WorkspaceOutcome {
            name: name.to_string(),
            status: UnitStatus::Failed(error.to_string()),
            workspace_created: false,
            variables_created: 0,
            variables_skipped: 0,
            state_serial: None,
        }
    }
}

/// Append-only run journal shared by every component. Alongside the rate
/// limiter this is the only mutable state that crosses workspace units.
#[derive(Debug, Default)]
pub struct RunReport {
    warnings: Mutex<Vec<Warning>>,
    outcomes: Mutex<IndexMap<String, WorkspaceOutcome>>,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport::default()
    }

    pub fn warn(&self, kind: WarningKind, workspace: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        match workspace {
            Some(ws) => warn!("[{}] {}: {}", ws, kind.label(), message),
            None => warn!("{}: {}", kind.label(), message),
        }
        self.warnings
            .lock()
            .expect("warning log poisoned")
            .push(Warning {
                kind,
                workspace: workspace.map(str::to_string),
                message,
            });
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().expect("warning log poisoned").clone()
    }

    pub fn warnings_of_kind(&self, kind: WarningKind) -> Vec<Warning> {
        self.warnings()
            .into_iter()
            .filter(|w| w.kind == kind)
            .collect()
    }

    pub fn record(&self, outcome: WorkspaceOutcome) {
        self.outcomes
            .lock()
            .expect("outcome log poisoned")
            .insert(outcome.name.clone(), outcome);
    }

    pub fn outcomes(&self) -> Vec<WorkspaceOutcome> {
        self.outcomes
            .lock()
            .expect("outcome log poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn migrated(&self) -> Vec<WorkspaceOutcome> {
        self.outcomes()
            .into_iter()
            .filter(|o| o.status == UnitStatus::Done)
            .collect()
    }

    pub fn failed(&self) -> Vec<WorkspaceOutcome> {
        self.outcomes()
            .into_iter()
            .filter(|o| matches!(o.status, UnitStatus::Failed(_)))
            .collect()
    }

    pub fn skipped(&self) -> Vec<WorkspaceOutcome> {
        self.outcomes()
            .into_iter()
            .filter(|o| matches!(o.status, UnitStatus::Skipped(_)))
            .collect()
    }

    pub fn section(title: &str) {
        println!();
        println!("{}", title.bold());
        println!("{}", "=".repeat(title.len()).bold());
    }

    /// Structured end-of-run summary: per-workspace outcomes plus warning
    /// counts, enough to re-run against only the failed subset.
    pub fn print_summary(&self) {
        Self::section("Migration Summary");

        let migrated = self.migrated();
        let failed = self.failed();
        let skipped = self.skipped();

        println!(
            "{} {} workspace(s) migrated",
            "[OK]".green(),
            migrated.len()
        );
        for outcome in &migrated {
            let state = match outcome.state_serial {
                Some(serial) => format!("state serial {}", serial),
                None => "no state".to_string(),
            };
            println!(
                "  {} ({} variables migrated, {} skipped, {})",
                outcome.name, outcome.variables_created, outcome.variables_skipped, state
            );
        }

        if !skipped.is_empty() {
            let names: Vec<&str> = skipped.iter().map(|o| o.name.as_str()).collect();
            println!(
                "{} {} workspace(s) skipped: {}",
                "[SKIP]".yellow(),
                skipped.len(),
                names.join(", ")
            );
        }

        if !failed.is_empty() {
            println!("{} {} workspace(s) failed:", "[FAIL]".red(), failed.len());
            for outcome in &failed {
                if let UnitStatus::Failed(err) = &outcome.status {
                    println!("  {}: {}", outcome.name, err);
                }
            }
        }

        let warnings = self.warnings();
        if !warnings.is_empty() {
            println!("{} {} warning(s):", "[WARN]".yellow(), warnings.len());
            for warning in &warnings {
                match &warning.workspace {
                    Some(ws) => println!("  [{}] {}: {}", ws, warning.kind.label(), warning.message),
                    None => println!("  {}: {}", warning.kind.label(), warning.message),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_accumulate_in_order() {
        let report = RunReport::new();
        report.warn(WarningKind::MissingState, Some("prod-db"), "no state versions");
        report.warn(WarningKind::VersionDowngrade, None, "1.9.0 -> 1.5.7");

        let warnings = report.warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].kind, WarningKind::MissingState);
        assert_eq!(warnings[0].workspace.as_deref(), Some("prod-db"));
        assert_eq!(
            report.warnings_of_kind(WarningKind::VersionDowngrade).len(),
            1
        );
    }

    #[test]
    fn outcomes_partition_by_status() {
        let report = RunReport::new();
        report.record(WorkspaceOutcome {
            name: "prod-api".into(),
            status: UnitStatus::Done,
            workspace_created: true,
            variables_created: 3,
            variables_skipped: 1,
            state_serial: Some(12),
        });
        report.record(WorkspaceOutcome::failed("prod-db", "boom"));
        report.record(WorkspaceOutcome::skipped("staging-api", "not selected"));

        assert_eq!(report.migrated().len(), 1);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.skipped().len(), 1);
    }

    #[test]
    fn reinserting_outcome_replaces() {
        let report = RunReport::new();
        report.record(WorkspaceOutcome::skipped("prod-api", "pending"));
        report.record(WorkspaceOutcome::failed("prod-api", "later failure"));
        assert_eq!(report.outcomes().len(), 1);
        assert_eq!(report.failed().len(), 1);
    }
}
