// Response models shared by the wizard surface and the unattended runner.

use super::state::{AttemptId, WizardState};
use super::steps::{FieldSet, StepKind, StepNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

// =========================
// Generic wrapper
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.into()),
        }
    }

    /// Failure that still carries the data describing it (e.g. a failed checklist).
    pub fn fail_with_data(data: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
            message: None,
        }
    }
}

// =========================
// Preflight
// =========================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckItem {
    pub label: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checklist {
    pub items: Vec<CheckItem>,
}

impl Checklist {
    pub fn push(&mut self, label: impl Into<String>, passed: bool, detail: Option<String>) {
        self.items.push(CheckItem {
            label: label.into(),
            passed,
            detail,
        });
    }

    pub fn all_passed(&self) -> bool {
        self.items.iter().all(|i| i.passed)
    }

    pub fn failed_labels(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| !i.passed)
            .map(|i| i.label.as_str())
            .collect()
    }
}

// =========================
// Finalization
// =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    WriteConfig,
    GenerateSecrets,
    RunMigrations,
    CreateAdmin,
    SetPermissions,
    ClearCaches,
}

impl ActionKind {
    pub const ORDER: [ActionKind; 6] = [
        ActionKind::WriteConfig,
        ActionKind::GenerateSecrets,
        ActionKind::RunMigrations,
        ActionKind::CreateAdmin,
        ActionKind::SetPermissions,
        ActionKind::ClearCaches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::WriteConfig => "write_config",
            ActionKind::GenerateSecrets => "generate_secrets",
            ActionKind::RunMigrations => "run_migrations",
            ActionKind::CreateAdmin => "create_admin",
            ActionKind::SetPermissions => "set_permissions",
            ActionKind::ClearCaches => "clear_caches",
        }
    }

    /// Mandatory actions decide overall success; the rest are best-effort.
    pub fn is_mandatory(&self) -> bool {
        matches!(
            self,
            ActionKind::WriteConfig | ActionKind::GenerateSecrets | ActionKind::CreateAdmin
        )
    }

    /// A failure of this action stops the sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionKind::WriteConfig | ActionKind::GenerateSecrets)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one target inside an action (a directory, a cache command).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub target: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub action: ActionKind,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemOutcome>,
}

impl ActionOutcome {
    pub fn ok(action: ActionKind, detail: impl Into<String>) -> Self {
        Self {
            action,
            succeeded: true,
            detail: Some(detail.into()),
            items: Vec::new(),
        }
    }

    pub fn failed(action: ActionKind, detail: impl Into<String>) -> Self {
        Self {
            action,
            succeeded: false,
            detail: Some(detail.into()),
            items: Vec::new(),
        }
    }

    /// Aggregate per-target outcomes; the action succeeds only if every item did.
    pub fn from_items(action: ActionKind, items: Vec<ItemOutcome>) -> Self {
        let failed = items.iter().filter(|i| !i.succeeded).count();
        let detail = if failed == 0 {
            format!("{} of {} succeeded", items.len(), items.len())
        } else {
            format!("{} of {} failed", failed, items.len())
        };
        Self {
            action,
            succeeded: failed == 0,
            detail: Some(detail),
            items,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationSummary {
    Completed,
    CompletedWithWarnings,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationResult {
    pub outcomes: Vec<ActionOutcome>,
    pub success: bool,
}

impl FinalizationResult {
    /// Build from ordered outcomes; `success` is the AND of the mandatory actions, and an
    /// absent mandatory action (sequence aborted before it) counts as failed.
    pub fn from_outcomes(outcomes: Vec<ActionOutcome>) -> Self {
        let success = ActionKind::ORDER
            .iter()
            .filter(|k| k.is_mandatory())
            .all(|k| {
                outcomes
                    .iter()
                    .find(|o| o.action == *k)
                    .map(|o| o.succeeded)
                    .unwrap_or(false)
            });
        Self { outcomes, success }
    }

    pub fn outcome(&self, action: ActionKind) -> Option<&ActionOutcome> {
        self.outcomes.iter().find(|o| o.action == action)
    }

    /// Failed best-effort actions, surfaced to the operator as warnings.
    pub fn warnings(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded && !o.action.is_mandatory())
            .map(|o| match &o.detail {
                Some(d) => format!("{} failed: {}", o.action, d),
                None => format!("{} failed", o.action),
            })
            .collect()
    }

    /// First failed mandatory action, as a user-facing reason.
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }
        let failed = self
            .outcomes
            .iter()
            .find(|o| !o.succeeded && o.action.is_mandatory());
        Some(match failed {
            Some(o) => match &o.detail {
                Some(d) => format!("{} failed: {}", o.action, d),
                None => format!("{} failed", o.action),
            },
            None => "Installation did not complete.".to_string(),
        })
    }

    pub fn summary(&self) -> FinalizationSummary {
        if !self.success {
            FinalizationSummary::Failed
        } else if self.outcomes.iter().any(|o| !o.succeeded) {
            FinalizationSummary::CompletedWithWarnings
        } else {
            FinalizationSummary::Completed
        }
    }
}

// =========================
// Wizard views
// =========================

/// Everything a page needs to display step `n` (rendering itself is not done here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step: StepNumber,
    pub kind: StepKind,
    pub title: String,
    pub is_terminal: bool,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    /// Previously stored values; secret values are blanked.
    pub fields: FieldSet,
    pub state: WizardState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Checklist>,
}

// =========================
// /install
// =========================

/// Result of one `/install` request, independent of any web framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallResponse {
    /// Show a step (first visit, back-navigation, or re-render with an error).
    Render {
        attempt: AttemptId,
        view: StepView,
        #[serde(skip_serializing_if = "Option::is_none")]
        finalization: Option<FinalizationResult>,
    },
    Redirect {
        attempt: AttemptId,
        step: StepNumber,
        location: String,
    },
    AlreadyInstalled { message: String },
    Completed {
        attempt: AttemptId,
        summary: FinalizationSummary,
        warnings: Vec<String>,
        result: FinalizationResult,
    },
    Error { status: u16, message: String },
}

impl InstallResponse {
    /// HTTP status a host framework should use.
    pub fn status(&self) -> u16 {
        match self {
            InstallResponse::Render { .. } | InstallResponse::Completed { .. } => 200,
            InstallResponse::Redirect { .. } => 303,
            InstallResponse::AlreadyInstalled { .. } => 403,
            InstallResponse::Error { status, .. } => *status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(action: ActionKind, ok: bool) -> ActionOutcome {
        if ok {
            ActionOutcome::ok(action, "ok")
        } else {
            ActionOutcome::failed(action, "boom")
        }
    }

    #[test]
    fn best_effort_failure_keeps_success() {
        let r = FinalizationResult::from_outcomes(vec![
            outcome(ActionKind::WriteConfig, true),
            outcome(ActionKind::GenerateSecrets, true),
            outcome(ActionKind::RunMigrations, false),
            outcome(ActionKind::CreateAdmin, true),
            outcome(ActionKind::SetPermissions, true),
            outcome(ActionKind::ClearCaches, false),
        ]);
        assert!(r.success);
        assert_eq!(r.summary(), FinalizationSummary::CompletedWithWarnings);
        assert_eq!(r.warnings().len(), 2);
        assert!(r.failure_reason().is_none());
    }

    #[test]
    fn mandatory_failure_flips_success() {
        let r = FinalizationResult::from_outcomes(vec![
            outcome(ActionKind::WriteConfig, true),
            outcome(ActionKind::GenerateSecrets, true),
            outcome(ActionKind::RunMigrations, true),
            outcome(ActionKind::CreateAdmin, false),
            outcome(ActionKind::SetPermissions, true),
            outcome(ActionKind::ClearCaches, true),
        ]);
        assert!(!r.success);
        assert_eq!(r.summary(), FinalizationSummary::Failed);
        assert_eq!(
            r.failure_reason().as_deref(),
            Some("create_admin failed: boom")
        );
    }

    #[test]
    fn aborted_sequence_is_not_successful() {
        let r = FinalizationResult::from_outcomes(vec![outcome(ActionKind::WriteConfig, false)]);
        assert!(!r.success);
        assert_eq!(r.outcomes.len(), 1);
    }

    #[test]
    fn items_aggregate_into_action() {
        let o = ActionOutcome::from_items(
            ActionKind::SetPermissions,
            vec![
                ItemOutcome {
                    target: "storage".into(),
                    succeeded: true,
                    detail: None,
                },
                ItemOutcome {
                    target: "bootstrap/cache".into(),
                    succeeded: false,
                    detail: Some("denied".into()),
                },
            ],
        );
        assert!(!o.succeeded);
        assert_eq!(o.detail.as_deref(), Some("1 of 2 failed"));
    }

    #[test]
    fn checklist_reports_failed_labels() {
        let mut c = Checklist::default();
        c.push("PHP Version >= 8.1", true, None);
        c.push("GD Extension", false, Some("not loaded".into()));
        assert!(!c.all_passed());
        assert_eq!(c.failed_labels(), vec!["GD Extension"]);
    }

    #[test]
    fn action_kind_serializes_snake_case() {
        let s = serde_json::to_string(&ActionKind::RunMigrations).unwrap();
        assert_eq!(s, "\"run_migrations\"");
    }
}
