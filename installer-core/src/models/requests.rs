// Request models for the wizard surface and the unattended answers file.

use super::state::AttemptId;
use super::steps::{step_of, FieldSet, StepKind, StepNumber};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =========================
// /install
// =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

/// One hit on `/install?step=n[&force=1]`. The attempt id stands in for the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub method: Method,
    /// Absent means "wherever the attempt currently is".
    #[serde(default)]
    pub step: Option<StepNumber>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub attempt: Option<AttemptId>,
    /// Submitted form fields (POST only).
    #[serde(default)]
    pub form: FieldSet,
}

impl InstallRequest {
    pub fn get(attempt: Option<AttemptId>, step: Option<StepNumber>) -> Self {
        Self {
            method: Method::Get,
            step,
            force: false,
            attempt,
            form: FieldSet::new(),
        }
    }

    pub fn post(attempt: Option<AttemptId>, step: StepNumber, form: FieldSet) -> Self {
        Self {
            method: Method::Post,
            step: Some(step),
            force: false,
            attempt,
            form,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Build from a raw query string (`step=2&force=1`). Unparseable `step` values are kept as
    /// `None`; the handler then falls back to the attempt's current step.
    pub fn from_query(
        method: Method,
        query: &str,
        attempt: Option<AttemptId>,
        form: FieldSet,
    ) -> Self {
        let mut step = None;
        let mut force = false;
        for (k, v) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match k.as_ref() {
                "step" => step = v.trim().parse::<StepNumber>().ok(),
                "force" => force = matches!(v.trim(), "1" | "true" | "yes"),
                _ => {}
            }
        }
        Self {
            method,
            step,
            force,
            attempt,
            form,
        }
    }
}

// =========================
// Unattended answers (TOML)
// =========================

/// Answers for an unattended run, one table per data-collecting step:
///
/// ```toml
/// [database]
/// db_host = "localhost"
/// db_port = 3306
/// ```
///
/// Scalars of any TOML type are accepted and stringified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WizardAnswers {
    #[serde(default)]
    database: BTreeMap<String, toml::Value>,
    #[serde(default)]
    site: BTreeMap<String, toml::Value>,
    #[serde(default)]
    admin: BTreeMap<String, toml::Value>,
    #[serde(default)]
    additional: BTreeMap<String, toml::Value>,
}

fn scalar_to_string(key: &str, value: &toml::Value) -> Result<String> {
    Ok(match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => anyhow::bail!("'{}' must be a scalar, got {}", key, other.type_str()),
    })
}

impl WizardAnswers {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let answers: WizardAnswers =
            toml::from_str(text).context("Failed to parse answers file")?;
        for kind in [
            StepKind::Database,
            StepKind::Site,
            StepKind::Admin,
            StepKind::Additional,
        ] {
            answers.fields_for(kind)?;
        }
        Ok(answers)
    }

    /// Form fields for `kind`'s step; empty for steps that collect nothing.
    pub fn fields_for(&self, kind: StepKind) -> Result<FieldSet> {
        let table = match kind {
            StepKind::Database => &self.database,
            StepKind::Site => &self.site,
            StepKind::Admin => &self.admin,
            StepKind::Additional => &self.additional,
            StepKind::Requirements | StepKind::Finalize => return Ok(FieldSet::new()),
        };
        let def = step_of(kind);
        let mut fields = FieldSet::new();
        for (k, v) in table {
            if !def.owns_field(k) {
                anyhow::bail!("[{}] has no field named '{}'", kind.as_str(), k);
            }
            fields.insert(k.clone(), scalar_to_string(k, v)?);
        }
        Ok(fields)
    }
}
