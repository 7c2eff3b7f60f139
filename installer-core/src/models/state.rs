// Installation attempt state
//
// One `InstallationAttempt` is the aggregate root of a wizard run. It is keyed by an opaque
// `AttemptId` (the session identity of the operator) and lives in a StepStore until the run
// completes or is reset.

use super::steps::{FieldSet, StepData, StepNumber, STEP_COUNT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque attempt identifier. Restricted to `[A-Za-z0-9_-]{1,64}` so it can name a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttemptId(String);

impl AttemptId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        AttemptId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        if s.is_empty() || s.len() > 64 {
            return Err("Attempt id must be 1-64 characters.".to_string());
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("Attempt id may only contain letters, digits, '-' and '_'.".to_string());
        }
        Ok(AttemptId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AttemptId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AttemptId::parse(&value)
    }
}

impl From<AttemptId> for String {
    fn from(value: AttemptId) -> Self {
        value.0
    }
}

/// Error detail attached to the step that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub step: StepNumber,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationAttempt {
    pub id: AttemptId,
    /// Furthest step the operator may work on; never decreases.
    pub current_step: StepNumber,
    /// Highest step whose validator passed (0 = none yet).
    pub highest_validated: StepNumber,
    #[serde(default)]
    pub steps: StepData,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub last_error: Option<StepError>,
    /// Set when the attempt was started with `force` over an existing installation.
    #[serde(default)]
    pub forced: bool,
    /// Set once this attempt's finalization has written the configuration artifact.
    #[serde(default)]
    pub owns_artifact: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstallationAttempt {
    pub fn new(id: AttemptId) -> Self {
        let now = Utc::now();
        Self {
            id,
            current_step: 1,
            highest_validated: 0,
            steps: StepData::new(),
            completed: false,
            last_error: None,
            forced: false,
            owns_artifact: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether step `n` may be shown or submitted (no skipping ahead).
    pub fn can_reach(&self, n: StepNumber) -> bool {
        n >= 1 && n <= STEP_COUNT && n <= self.highest_validated.saturating_add(1)
    }

    /// Record a step whose validator passed and advance progress.
    pub fn accept_step(&mut self, n: StepNumber, fields: FieldSet) {
        self.steps.insert(n, fields);
        self.highest_validated = self.highest_validated.max(n);
        let next = n.saturating_add(1).min(STEP_COUNT);
        self.current_step = self.current_step.max(next);
        self.last_error = None;
        self.touch();
    }

    pub fn reject_step(&mut self, n: StepNumber, message: impl Into<String>) {
        self.last_error = Some(StepError {
            step: n,
            message: message.into(),
        });
        self.touch();
    }

    pub fn error_for(&self, n: StepNumber) -> Option<&str> {
        self.last_error
            .as_ref()
            .filter(|e| e.step == n)
            .map(|e| e.message.as_str())
    }

    /// Whether this attempt may (re)write an existing configuration artifact.
    pub fn may_overwrite_artifact(&self) -> bool {
        self.forced || self.owns_artifact
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Externally visible wizard state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum WizardState {
    Step(StepNumber),
    Completed,
    Failed(String),
}

impl WizardState {
    pub fn of(attempt: &InstallationAttempt) -> Self {
        if attempt.completed {
            return WizardState::Completed;
        }
        match attempt.error_for(STEP_COUNT) {
            Some(reason) => WizardState::Failed(reason.to_string()),
            None => WizardState::Step(attempt.current_step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn attempt_id_rejects_path_characters() {
        assert!(AttemptId::parse("abc-123_X").is_ok());
        assert!(AttemptId::parse("../etc").is_err());
        assert!(AttemptId::parse("").is_err());
        assert!(AttemptId::parse(&"a".repeat(65)).is_err());
    }

    #[test]
    fn attempt_id_serde_validates() {
        let ok: AttemptId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<AttemptId>("\"a/b\"").is_err());
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = AttemptId::generate();
        let b = AttemptId::generate();
        assert_ne!(a, b);
        assert!(AttemptId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn accept_step_advances_by_one() {
        let mut a = InstallationAttempt::new(AttemptId::generate());
        assert!(a.can_reach(1));
        assert!(!a.can_reach(2));
        a.accept_step(1, FieldSet::new());
        assert_eq!(a.current_step, 2);
        assert!(a.can_reach(2));
        assert!(!a.can_reach(3));
    }

    #[test]
    fn resubmitting_earlier_step_never_moves_progress_back() {
        let mut a = InstallationAttempt::new(AttemptId::generate());
        for n in 1..=4 {
            a.accept_step(n, FieldSet::new());
        }
        assert_eq!(a.current_step, 5);
        a.accept_step(2, fields(&[("db_host", "other")]));
        assert_eq!(a.current_step, 5);
        assert_eq!(a.highest_validated, 4);
        assert_eq!(a.steps[&2]["db_host"], "other");
    }

    #[test]
    fn state_reflects_terminal_failure() {
        let mut a = InstallationAttempt::new(AttemptId::generate());
        a.reject_step(2, "bad host");
        assert_eq!(WizardState::of(&a), WizardState::Step(1));
        a.reject_step(STEP_COUNT, "admin failed");
        assert_eq!(WizardState::of(&a), WizardState::Failed("admin failed".into()));
        a.completed = true;
        assert_eq!(WizardState::of(&a), WizardState::Completed);
    }

    #[test]
    fn attempt_round_trips_through_json() {
        let mut a = InstallationAttempt::new(AttemptId::generate());
        a.accept_step(2, fields(&[("db_host", "localhost")]));
        let json = serde_json::to_string(&a).unwrap();
        let back: InstallationAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
