// Per-step field validators.
//
// These are pure checks over the submitted fields. External preconditions (environment
// checklist, database probe) are run by the controller after the fields pass.

use crate::database::connection::ConnectionParams;
use crate::database::provisioning::validate_db_name;
use crate::models::steps::{fields, supplied, FieldSet, StepDefinition, StepKind};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAIL_ENCRYPTIONS: [&str; 3] = ["tls", "ssl", "none"];

fn human(field: &str) -> String {
    field.replace('_', " ")
}

/// Keep only the fields the step declares (drops CSRF tokens, buttons and the like).
pub fn retain_owned(def: &StepDefinition, submitted: &FieldSet) -> FieldSet {
    submitted
        .iter()
        .filter(|(k, _)| def.owns_field(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// First required field that is missing or blank.
pub fn missing_required(def: &StepDefinition, submitted: &FieldSet) -> Option<&'static str> {
    def.required
        .iter()
        .copied()
        .find(|f| supplied(submitted, f).is_none())
}

fn email_pattern() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid e-mail regex"))
}

fn check_email(field: &str, value: &str) -> Result<(), String> {
    if email_pattern().is_match(value) {
        Ok(())
    } else {
        Err(format!("The {} must be a valid email address.", human(field)))
    }
}

fn check_http_url(field: &str, value: &str) -> Result<(), String> {
    match Url::parse(value) {
        Ok(u) if (u.scheme() == "http" || u.scheme() == "https") && u.host().is_some() => Ok(()),
        _ => Err(format!(
            "The {} must be a valid http or https URL.",
            human(field)
        )),
    }
}

fn optional_amount(f: &FieldSet, field: &str) -> Result<Option<f64>, String> {
    match supplied(f, field) {
        None => Ok(None),
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
            _ => Err(format!(
                "The {} must be a non-negative number.",
                human(field)
            )),
        },
    }
}

fn validate_database(f: &FieldSet) -> Result<(), String> {
    let params = ConnectionParams::from_fields(f)?;
    validate_db_name(&params.database)
}

fn validate_site(f: &FieldSet) -> Result<(), String> {
    if let Some(url) = supplied(f, fields::APP_URL) {
        check_http_url(fields::APP_URL, url)?;
    }
    if let Some(email) = supplied(f, fields::SUPPORT_EMAIL) {
        check_email(fields::SUPPORT_EMAIL, email)?;
    }
    optional_amount(f, fields::COMMISSION_RATE)?;
    optional_amount(f, fields::SEARCH_RADIUS)?;
    let min = optional_amount(f, fields::MIN_TRIP_AMOUNT)?;
    let max = optional_amount(f, fields::MAX_TRIP_AMOUNT)?;
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err("The min trip amount must not exceed the max trip amount.".to_string());
        }
    }
    Ok(())
}

fn validate_admin(f: &FieldSet) -> Result<(), String> {
    if let Some(email) = supplied(f, fields::ADMIN_EMAIL) {
        check_email(fields::ADMIN_EMAIL, email)?;
    }
    // Passwords are taken verbatim, surrounding whitespace included.
    let password = f.get(fields::ADMIN_PASSWORD).map(String::as_str).unwrap_or("");
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "The password must be at least {} characters.",
            MIN_PASSWORD_LEN
        ));
    }
    if let Some(confirmation) = f
        .get(fields::ADMIN_PASSWORD_CONFIRMATION)
        .filter(|c| !c.is_empty())
    {
        if confirmation != password {
            return Err("The password confirmation does not match.".to_string());
        }
    }
    Ok(())
}

fn validate_additional(f: &FieldSet) -> Result<(), String> {
    if let Some(port) = supplied(f, fields::MAIL_PORT) {
        if port.parse::<u16>().ok().filter(|p| *p > 0).is_none() {
            return Err("The mail port must be a number between 1 and 65535.".to_string());
        }
    }
    if let Some(enc) = supplied(f, fields::MAIL_ENCRYPTION) {
        if !MAIL_ENCRYPTIONS.contains(&enc.to_ascii_lowercase().as_str()) {
            return Err(format!(
                "The mail encryption must be one of: {}.",
                MAIL_ENCRYPTIONS.join(", ")
            ));
        }
    }
    Ok(())
}

/// Required-field presence, then the step's own shape checks. The message is operator-facing.
pub fn validate_fields(def: &StepDefinition, submitted: &FieldSet) -> Result<(), String> {
    if let Some(field) = missing_required(def, submitted) {
        return Err(format!("The {} field is required.", human(field)));
    }
    match def.kind {
        StepKind::Database => validate_database(submitted),
        StepKind::Site => validate_site(submitted),
        StepKind::Admin => validate_admin(submitted),
        StepKind::Additional => validate_additional(submitted),
        StepKind::Requirements | StepKind::Finalize => Ok(()),
    }
}
