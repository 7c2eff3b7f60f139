// Static wizard step catalogue.
//
// Step numbers are contiguous 1..=STEP_COUNT and exactly one step is terminal.
// Each step owns a disjoint set of field names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type StepNumber = u8;

/// Submitted fields of one step (field name -> raw string value).
pub type FieldSet = BTreeMap<String, String>;

/// Accumulated step data of one attempt (step number -> fields).
pub type StepData = BTreeMap<StepNumber, FieldSet>;

pub const STEP_COUNT: StepNumber = 6;

/// Form field names, as submitted by the wizard pages.
pub mod fields {
    pub const DB_HOST: &str = "db_host";
    pub const DB_PORT: &str = "db_port";
    pub const DB_DATABASE: &str = "db_database";
    pub const DB_USERNAME: &str = "db_username";
    pub const DB_PASSWORD: &str = "db_password";

    pub const APP_NAME: &str = "app_name";
    pub const APP_URL: &str = "app_url";
    pub const SUPPORT_PHONE: &str = "support_phone";
    pub const SUPPORT_EMAIL: &str = "support_email";
    pub const COMMISSION_RATE: &str = "commission_rate";
    pub const MIN_TRIP_AMOUNT: &str = "min_trip_amount";
    pub const MAX_TRIP_AMOUNT: &str = "max_trip_amount";
    pub const SEARCH_RADIUS: &str = "search_radius";

    pub const ADMIN_NAME: &str = "name";
    pub const ADMIN_EMAIL: &str = "email";
    pub const ADMIN_PASSWORD: &str = "password";
    pub const ADMIN_PASSWORD_CONFIRMATION: &str = "password_confirmation";

    pub const MAIL_HOST: &str = "mail_host";
    pub const MAIL_PORT: &str = "mail_port";
    pub const MAIL_USERNAME: &str = "mail_username";
    pub const MAIL_PASSWORD: &str = "mail_password";
    pub const MAIL_ENCRYPTION: &str = "mail_encryption";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Requirements,
    Database,
    Site,
    Admin,
    Additional,
    Finalize,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Requirements => "requirements",
            StepKind::Database => "database",
            StepKind::Site => "site",
            StepKind::Admin => "admin",
            StepKind::Additional => "additional",
            StepKind::Finalize => "finalize",
        }
    }

    pub fn from_name(name: &str) -> Option<StepKind> {
        STEPS
            .iter()
            .map(|s| s.kind)
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub number: StepNumber,
    pub kind: StepKind,
    pub title: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub is_terminal: bool,
}

impl StepDefinition {
    pub fn owns_field(&self, name: &str) -> bool {
        self.required.contains(&name) || self.optional.contains(&name)
    }
}

pub const STEPS: [StepDefinition; STEP_COUNT as usize] = [
    StepDefinition {
        number: 1,
        kind: StepKind::Requirements,
        title: "System Requirements",
        required: &[],
        optional: &[],
        is_terminal: false,
    },
    StepDefinition {
        number: 2,
        kind: StepKind::Database,
        title: "Database Settings",
        required: &[
            fields::DB_HOST,
            fields::DB_PORT,
            fields::DB_DATABASE,
            fields::DB_USERNAME,
        ],
        optional: &[fields::DB_PASSWORD],
        is_terminal: false,
    },
    StepDefinition {
        number: 3,
        kind: StepKind::Site,
        title: "Site Information",
        required: &[
            fields::APP_NAME,
            fields::APP_URL,
            fields::SUPPORT_PHONE,
            fields::SUPPORT_EMAIL,
        ],
        optional: &[
            fields::COMMISSION_RATE,
            fields::MIN_TRIP_AMOUNT,
            fields::MAX_TRIP_AMOUNT,
            fields::SEARCH_RADIUS,
        ],
        is_terminal: false,
    },
    StepDefinition {
        number: 4,
        kind: StepKind::Admin,
        title: "Administrator Account",
        required: &[
            fields::ADMIN_NAME,
            fields::ADMIN_EMAIL,
            fields::ADMIN_PASSWORD,
        ],
        optional: &[fields::ADMIN_PASSWORD_CONFIRMATION],
        is_terminal: false,
    },
    StepDefinition {
        number: 5,
        kind: StepKind::Additional,
        title: "Additional Settings",
        required: &[],
        optional: &[
            fields::MAIL_HOST,
            fields::MAIL_PORT,
            fields::MAIL_USERNAME,
            fields::MAIL_PASSWORD,
            fields::MAIL_ENCRYPTION,
            "pusher_app_id",
            "pusher_app_key",
            "pusher_app_secret",
            "google_maps_key",
            "google_places_key",
            "google_directions_key",
            "google_geocoding_key",
            "fcm_server_key",
            "fcm_sender_id",
            "fcm_project_id",
            "nexmo_key",
            "nexmo_secret",
            "sms_misr_username",
            "sms_misr_password",
            "paymob_api_key",
            "paymob_integration_id",
            "paymob_iframe_id",
            "paymob_hmac_secret",
            "paymob_public_key",
        ],
        is_terminal: false,
    },
    StepDefinition {
        number: 6,
        kind: StepKind::Finalize,
        title: "Final Installation",
        required: &[],
        optional: &[],
        is_terminal: true,
    },
];

/// Look up a step by number.
pub fn step(number: StepNumber) -> Option<&'static StepDefinition> {
    STEPS.iter().find(|s| s.number == number)
}

/// Look up a step by kind.
pub fn step_of(kind: StepKind) -> &'static StepDefinition {
    // STEPS holds every StepKind exactly once.
    STEPS
        .iter()
        .find(|s| s.kind == kind)
        .unwrap_or(&STEPS[0])
}

pub fn terminal_step() -> &'static StepDefinition {
    step_of(StepKind::Finalize)
}

/// A field value that was actually supplied: present and not blank.
pub fn supplied<'a>(fields: &'a FieldSet, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Fields of `kind` from accumulated step data (empty when the step was never submitted).
pub fn fields_of(data: &StepData, kind: StepKind) -> FieldSet {
    data.get(&step_of(kind).number).cloned().unwrap_or_default()
}
