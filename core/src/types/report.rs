//! Convergence report: per-resource outcome in plan order.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::ResourceId;

/// Terminal outcome of one resource in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Host already matched; nothing was applied.
    #[serde(rename = "noop")]
    NoOp,
    /// Resource was absent and has been brought into existence.
    Created,
    /// Resource existed but differed and has been changed.
    Updated,
    Failed,
    /// Not attempted because an earlier resource failed fatally.
    Skipped,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::NoOp => "noop",
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Failed => "failed",
            Action::Skipped => "skipped",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Action::NoOp | Action::Created | Action::Updated)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub id: ResourceId,
    pub action: Action,
    /// Number of `Apply` calls issued. Zero for no-ops and skipped resources.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceOutcome {
    pub fn new(id: ResourceId, action: Action, attempts: u32) -> Self {
        ResourceOutcome {
            id,
            action,
            attempts,
            error: None,
        }
    }

    pub fn failed(id: ResourceId, attempts: u32, error: String) -> Self {
        ResourceOutcome {
            id,
            action: Action::Failed,
            attempts,
            error: Some(error),
        }
    }
}

/// Counts of each action in a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub noop: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub outcomes: Vec<ResourceOutcome>,
}

impl ConvergenceReport {
    pub fn new() -> Self {
        ConvergenceReport::default()
    }

    pub fn push(&mut self, outcome: ResourceOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.action.is_ok())
    }

    /// Process exit status: 0 when every resource is a no-op or applied.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// The fatal failure that stopped the run, if any.
    pub fn first_failure(&self) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.action == Action::Failed)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut s = ReportSummary::default();
        for o in &self.outcomes {
            match o.action {
                Action::NoOp => s.noop += 1,
                Action::Created => s.created += 1,
                Action::Updated => s.updated += 1,
                Action::Failed => s.failed += 1,
                Action::Skipped => s.skipped += 1,
            }
        }
        s
    }

    /// Plain-text table, one line per resource, followed by a summary line.
    pub fn render_text(&self) -> String {
        let width = self
            .outcomes
            .iter()
            .map(|o| o.id.to_string().len())
            .max()
            .unwrap_or(0);
        let mut out = String::new();
        for o in &self.outcomes {
            let id = o.id.to_string();
            out.push_str(&format!("{:<width$}  {:<8} {}", id, o.action.as_str(), o.attempts, width = width));
            if let Some(err) = &o.error {
                out.push_str(&format!("  {}", err));
            }
            out.push('\n');
        }
        let s = self.summary();
        out.push_str(&format!(
            "{} noop, {} created, {} updated, {} failed, {} skipped",
            s.noop, s.created, s.updated, s.failed, s.skipped
        ));
        out
    }
}
