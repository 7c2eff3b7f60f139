// ConfigBuilder: wizard step data -> ConfigurationDocument -> dotenv text.
//
// Each step owns a disjoint set of keys, so the merge is order-independent. Optional values
// that are missing or blank fall back to the defaults below.

use super::{
    ConfigEntry, ConfigSection, ConfigValue, ConfigurationDocument, EnvFile, SecretOrigin,
    APP_KEY, JWT_SECRET, SECRET_KEYS,
};
use crate::models::steps::{fields, fields_of, supplied, FieldSet, StepData, StepKind};
use crate::security::crypto;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_COMMISSION_RATE: &str = "0.15";
pub const DEFAULT_SEARCH_RADIUS: &str = "10";
pub const DEFAULT_MIN_TRIP_AMOUNT: &str = "10";
pub const DEFAULT_MAX_TRIP_AMOUNT: &str = "1000";
pub const DEFAULT_MAIL_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_MAIL_PORT: &str = "587";
pub const DEFAULT_MAIL_ENCRYPTION: &str = "tls";

/// Keys that must be non-empty before the document may be written.
pub const REQUIRED_KEYS: [&str; 9] = [
    "APP_NAME",
    "APP_URL",
    "DB_HOST",
    "DB_PORT",
    "DB_DATABASE",
    "DB_USERNAME",
    "MAIL_FROM_ADDRESS",
    "SUPPORT_PHONE",
    "SUPPORT_EMAIL",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Required settings are missing: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
    #[error("Secret generation failed: {0}")]
    Secrets(String),
}

fn text(f: &FieldSet, name: &str) -> String {
    supplied(f, name).unwrap_or_default().to_string()
}

fn text_or(f: &FieldSet, name: &str, default: &str) -> String {
    supplied(f, name).unwrap_or(default).to_string()
}

/// Credentials are taken verbatim (surrounding spaces can be significant).
fn credential(f: &FieldSet, name: &str) -> String {
    match f.get(name) {
        Some(v) if !v.trim().is_empty() => v.clone(),
        _ => String::new(),
    }
}

struct SectionBuilder {
    title: &'static str,
    entries: Vec<ConfigEntry>,
}

impl SectionBuilder {
    fn new(title: &'static str) -> Self {
        Self {
            title,
            entries: Vec::new(),
        }
    }

    fn lit(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.push(ConfigEntry {
            key: key.to_string(),
            value: ConfigValue::literal(value),
        });
        self
    }

    fn reference(mut self, key: &str, target: &str) -> Self {
        self.entries.push(ConfigEntry {
            key: key.to_string(),
            value: ConfigValue::reference(target),
        });
        self
    }

    fn done(self) -> ConfigSection {
        ConfigSection {
            title: self.title.to_string(),
            entries: self.entries,
        }
    }
}

/// Merge all step data into a document. Secret slots are left empty; see `ensure_secrets`.
pub fn build_settings(steps: &StepData) -> Result<ConfigurationDocument, BuildError> {
    let db = fields_of(steps, StepKind::Database);
    let site = fields_of(steps, StepKind::Site);
    let extra = fields_of(steps, StepKind::Additional);

    let support_email = text(&site, fields::SUPPORT_EMAIL);

    let sections = vec![
        SectionBuilder::new("Application")
            .lit("APP_NAME", text(&site, fields::APP_NAME))
            .lit("APP_ENV", "production")
            .lit(APP_KEY, "")
            .lit("APP_DEBUG", "false")
            .lit("APP_URL", text(&site, fields::APP_URL))
            .lit("APP_TIMEZONE", "Africa/Cairo")
            .lit("APP_LOCALE", "ar")
            .lit("APP_FALLBACK_LOCALE", "en")
            .lit("APP_CURRENCY", "EGP")
            .done(),
        SectionBuilder::new("Logging")
            .lit("LOG_CHANNEL", "stack")
            .lit("LOG_DEPRECATIONS_CHANNEL", "null")
            .lit("LOG_LEVEL", "error")
            .done(),
        SectionBuilder::new("Database Configuration")
            .lit("DB_CONNECTION", "mysql")
            .lit("DB_HOST", text(&db, fields::DB_HOST))
            .lit("DB_PORT", text(&db, fields::DB_PORT))
            .lit("DB_DATABASE", text(&db, fields::DB_DATABASE))
            .lit("DB_USERNAME", text(&db, fields::DB_USERNAME))
            .lit("DB_PASSWORD", credential(&db, fields::DB_PASSWORD))
            .done(),
        SectionBuilder::new("Drivers")
            .lit("BROADCAST_DRIVER", "pusher")
            .lit("CACHE_DRIVER", "file")
            .lit("FILESYSTEM_DISK", "local")
            .lit("QUEUE_CONNECTION", "database")
            .lit("SESSION_DRIVER", "file")
            .lit("SESSION_LIFETIME", "120")
            .done(),
        SectionBuilder::new("Redis Configuration (Optional)")
            .lit("REDIS_HOST", "127.0.0.1")
            .lit("REDIS_PASSWORD", "null")
            .lit("REDIS_PORT", "6379")
            .done(),
        SectionBuilder::new("Mail Configuration")
            .lit("MAIL_MAILER", "smtp")
            .lit("MAIL_HOST", text_or(&extra, fields::MAIL_HOST, DEFAULT_MAIL_HOST))
            .lit("MAIL_PORT", text_or(&extra, fields::MAIL_PORT, DEFAULT_MAIL_PORT))
            .lit("MAIL_USERNAME", text(&extra, fields::MAIL_USERNAME))
            .lit("MAIL_PASSWORD", credential(&extra, fields::MAIL_PASSWORD))
            .lit(
                "MAIL_ENCRYPTION",
                text_or(&extra, fields::MAIL_ENCRYPTION, DEFAULT_MAIL_ENCRYPTION),
            )
            .lit("MAIL_FROM_ADDRESS", support_email.clone())
            .reference("MAIL_FROM_NAME", "APP_NAME")
            .done(),
        SectionBuilder::new("JWT Configuration")
            .lit(JWT_SECRET, "")
            .lit("JWT_TTL", "1440")
            .lit("JWT_REFRESH_TTL", "20160")
            .lit("JWT_ALGO", "HS256")
            .done(),
        SectionBuilder::new("Pusher Configuration (Real-time updates)")
            .lit("PUSHER_APP_ID", text(&extra, "pusher_app_id"))
            .lit("PUSHER_APP_KEY", credential(&extra, "pusher_app_key"))
            .lit("PUSHER_APP_SECRET", credential(&extra, "pusher_app_secret"))
            .lit("PUSHER_HOST", "")
            .lit("PUSHER_PORT", "443")
            .lit("PUSHER_SCHEME", "https")
            .lit("PUSHER_APP_CLUSTER", "mt1")
            .done(),
        SectionBuilder::new("Google Maps API")
            .lit("GOOGLE_MAPS_API_KEY", credential(&extra, "google_maps_key"))
            .lit("GOOGLE_PLACES_API_KEY", credential(&extra, "google_places_key"))
            .lit(
                "GOOGLE_DIRECTIONS_API_KEY",
                credential(&extra, "google_directions_key"),
            )
            .lit(
                "GOOGLE_GEOCODING_API_KEY",
                credential(&extra, "google_geocoding_key"),
            )
            .done(),
        SectionBuilder::new("Firebase Cloud Messaging (Push Notifications)")
            .lit("FCM_SERVER_KEY", credential(&extra, "fcm_server_key"))
            .lit("FCM_SENDER_ID", text(&extra, "fcm_sender_id"))
            .lit("FCM_PROJECT_ID", text(&extra, "fcm_project_id"))
            .done(),
        SectionBuilder::new("SMS Services")
            .lit("NEXMO_KEY", credential(&extra, "nexmo_key"))
            .lit("NEXMO_SECRET", credential(&extra, "nexmo_secret"))
            .lit("NEXMO_SMS_FROM", "Waslne")
            .lit("SMS_MISR_USERNAME", text(&extra, "sms_misr_username"))
            .lit("SMS_MISR_PASSWORD", credential(&extra, "sms_misr_password"))
            .lit("SMS_MISR_SENDER", "Waslne")
            .lit("SMS_MISR_BASE_URL", "https://smsmisr.com/api")
            .done(),
        SectionBuilder::new("Payment Gateways - Paymob")
            .lit("PAYMOB_API_KEY", credential(&extra, "paymob_api_key"))
            .lit("PAYMOB_INTEGRATION_ID", text(&extra, "paymob_integration_id"))
            .lit("PAYMOB_IFRAME_ID", text(&extra, "paymob_iframe_id"))
            .lit("PAYMOB_HMAC_SECRET", credential(&extra, "paymob_hmac_secret"))
            .lit("PAYMOB_PUBLIC_KEY", credential(&extra, "paymob_public_key"))
            .lit("PAYMOB_BASE_URL", "https://accept.paymob.com/api")
            .done(),
        SectionBuilder::new("Application Business Logic")
            .lit(
                "PLATFORM_COMMISSION_RATE",
                text_or(&site, fields::COMMISSION_RATE, DEFAULT_COMMISSION_RATE),
            )
            .lit(
                "DRIVER_SEARCH_RADIUS",
                text_or(&site, fields::SEARCH_RADIUS, DEFAULT_SEARCH_RADIUS),
            )
            .lit("OFFER_EXPIRY_MINUTES", "10")
            .lit("TRIP_TIMEOUT_MINUTES", "30")
            .lit("MAX_OFFERS_PER_TRIP", "10")
            .lit(
                "MIN_TRIP_AMOUNT",
                text_or(&site, fields::MIN_TRIP_AMOUNT, DEFAULT_MIN_TRIP_AMOUNT),
            )
            .lit(
                "MAX_TRIP_AMOUNT",
                text_or(&site, fields::MAX_TRIP_AMOUNT, DEFAULT_MAX_TRIP_AMOUNT),
            )
            .done(),
        SectionBuilder::new("Support Contact")
            .lit("SUPPORT_PHONE", text(&site, fields::SUPPORT_PHONE))
            .lit("SUPPORT_EMAIL", support_email)
            .done(),
        SectionBuilder::new("Vite Configuration")
            .reference("VITE_APP_NAME", "APP_NAME")
            .reference("VITE_PUSHER_APP_KEY", "PUSHER_APP_KEY")
            .reference("VITE_PUSHER_HOST", "PUSHER_HOST")
            .reference("VITE_PUSHER_PORT", "PUSHER_PORT")
            .reference("VITE_PUSHER_SCHEME", "PUSHER_SCHEME")
            .reference("VITE_PUSHER_APP_CLUSTER", "PUSHER_APP_CLUSTER")
            .done(),
    ];

    let doc = ConfigurationDocument { sections };
    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|k| doc.get(k).map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(BuildError::MissingRequired(missing));
    }
    Ok(doc)
}

fn prior_secret<'a>(prior: Option<&'a EnvFile>, key: &str) -> Option<&'a str> {
    prior
        .and_then(|p| p.get(key))
        .filter(|v| !v.trim().is_empty())
}

/// Copy non-empty secrets from an existing artifact into `doc`. Returns the keys carried.
pub fn carry_over_secrets(
    doc: &mut ConfigurationDocument,
    prior: Option<&EnvFile>,
) -> Vec<&'static str> {
    let mut carried = Vec::new();
    for key in SECRET_KEYS {
        if let Some(v) = prior_secret(prior, key) {
            doc.set(key, ConfigValue::literal(v));
            carried.push(key);
        }
    }
    carried
}

/// Fill every secret slot: preserved from `prior` when it has one, generated otherwise.
pub fn ensure_secrets(
    doc: &mut ConfigurationDocument,
    prior: Option<&EnvFile>,
) -> Result<BTreeMap<&'static str, SecretOrigin>, BuildError> {
    let mut origins = BTreeMap::new();
    for key in SECRET_KEYS {
        if let Some(v) = prior_secret(prior, key) {
            doc.set(key, ConfigValue::literal(v));
            origins.insert(key, SecretOrigin::Preserved);
            continue;
        }
        let fresh = match key {
            APP_KEY => crypto::generate_app_key(),
            _ => crypto::generate_jwt_secret(),
        }
        .map_err(|e| BuildError::Secrets(e.to_string()))?;
        doc.set(key, ConfigValue::literal(fresh));
        origins.insert(key, SecretOrigin::Generated);
    }
    Ok(origins)
}

/// Full build: settings plus secrets.
pub fn build(
    steps: &StepData,
    prior: Option<&EnvFile>,
) -> Result<ConfigurationDocument, BuildError> {
    let mut doc = build_settings(steps)?;
    ensure_secrets(&mut doc, prior)?;
    Ok(doc)
}

fn is_bare_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '@' | '+' | ',' | '-')
}

pub(crate) fn encode_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Reference(r) => format!("\"{}\"", r),
        ConfigValue::Literal(v) if v.chars().all(is_bare_char) => v.clone(),
        ConfigValue::Literal(v) => {
            let mut out = String::with_capacity(v.len() + 2);
            out.push('"');
            for c in v.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '$' => out.push_str("\\$"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    other => out.push(other),
                }
            }
            out.push('"');
            out
        }
    }
}

/// Dotenv text: one `KEY=value` per line, sections separated by a blank line and headed by a
/// `# Title` comment.
pub fn serialize(doc: &ConfigurationDocument) -> String {
    let mut out = String::new();
    for (i, section) in doc.sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str("# ");
        out.push_str(&section.title);
        out.push('\n');
        for entry in &section.entries {
            out.push_str(&entry.key);
            out.push('=');
            out.push_str(&encode_value(&entry.value));
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envfile::parse;
    use crate::models::steps::step_of;

    fn set(pairs: &[(&str, &str)]) -> FieldSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_steps() -> StepData {
        let mut data = StepData::new();
        data.insert(1, FieldSet::new());
        data.insert(
            step_of(StepKind::Database).number,
            set(&[
                ("db_host", "localhost"),
                ("db_port", "3306"),
                ("db_database", "app_db"),
                ("db_username", "root"),
                ("db_password", ""),
            ]),
        );
        data.insert(
            step_of(StepKind::Site).number,
            set(&[
                ("app_name", "Waslne Rides"),
                ("app_url", "https://rides.example.com"),
                ("support_phone", "+20 100 000 0000"),
                ("support_email", "support@example.com"),
                ("commission_rate", "   "),
            ]),
        );
        data.insert(
            step_of(StepKind::Admin).number,
            set(&[
                ("name", "Admin"),
                ("email", "admin@example.com"),
                ("password", "password123"),
            ]),
        );
        data.insert(step_of(StepKind::Additional).number, FieldSet::new());
        data
    }

    fn without_secrets(text: &str) -> String {
        text.lines()
            .filter(|l| !SECRET_KEYS.iter().any(|k| l.starts_with(&format!("{}=", k))))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn fresh_builds_differ_only_in_secrets() {
        let a = serialize(&build(&sample_steps(), None).unwrap());
        let b = serialize(&build(&sample_steps(), None).unwrap());
        assert_ne!(a, b);
        assert_eq!(without_secrets(&a), without_secrets(&b));
    }

    #[test]
    fn rebuild_against_prior_artifact_preserves_secrets() {
        let first = serialize(&build(&sample_steps(), None).unwrap());
        let prior = parse(&first).unwrap();
        let second = serialize(&build(&sample_steps(), Some(&prior)).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_prior_secret_is_regenerated() {
        let prior = parse("APP_KEY=\nJWT_SECRET=keepme\n").unwrap();
        let mut doc = build_settings(&sample_steps()).unwrap();
        let origins = ensure_secrets(&mut doc, Some(&prior)).unwrap();
        assert_eq!(origins[APP_KEY], SecretOrigin::Generated);
        assert_eq!(origins[JWT_SECRET], SecretOrigin::Preserved);
        assert!(doc.get(APP_KEY).unwrap().starts_with("base64:"));
        assert_eq!(doc.get(JWT_SECRET), Some("keepme"));
    }

    #[test]
    fn carry_over_leaves_missing_secrets_empty() {
        let prior = parse("JWT_SECRET=abc\n").unwrap();
        let mut doc = build_settings(&sample_steps()).unwrap();
        assert_eq!(carry_over_secrets(&mut doc, Some(&prior)), vec![JWT_SECRET]);
        assert_eq!(doc.get(APP_KEY), Some(""));
        assert_eq!(doc.get(JWT_SECRET), Some("abc"));
    }

    #[test]
    fn blank_optional_values_fall_back_to_defaults() {
        let doc = build_settings(&sample_steps()).unwrap();
        assert_eq!(doc.get("PLATFORM_COMMISSION_RATE"), Some("0.15"));
        assert_eq!(doc.get("DRIVER_SEARCH_RADIUS"), Some("10"));
        assert_eq!(doc.get("MAIL_HOST"), Some("smtp.gmail.com"));
        assert_eq!(doc.get("MAIL_PORT"), Some("587"));
        assert_eq!(doc.get("MAIL_ENCRYPTION"), Some("tls"));
        assert_eq!(doc.get("GOOGLE_MAPS_API_KEY"), Some(""));
        assert_eq!(doc.get("MAIL_FROM_ADDRESS"), Some("support@example.com"));
    }

    #[test]
    fn missing_required_values_are_reported_together() {
        let mut steps = sample_steps();
        steps.remove(&step_of(StepKind::Site).number);
        match build_settings(&steps) {
            Err(BuildError::MissingRequired(keys)) => {
                assert!(keys.contains(&"APP_NAME".to_string()));
                assert!(keys.contains(&"SUPPORT_EMAIL".to_string()));
                assert!(!keys.contains(&"DB_HOST".to_string()));
            }
            other => panic!("expected MissingRequired, got {:?}", other),
        }
    }

    #[test]
    fn keys_are_unique() {
        let doc = build(&sample_steps(), None).unwrap();
        let keys = doc.keys();
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());
    }

    #[test]
    fn serialized_layout() {
        let text = serialize(&build(&sample_steps(), None).unwrap());
        assert!(text.starts_with("# Application\nAPP_NAME=\"Waslne Rides\"\n"));
        assert!(text.contains("\nDB_DATABASE=app_db\n"));
        assert!(text.contains("\nDB_PASSWORD=\n"));
        assert!(text.contains("\nMAIL_FROM_NAME=\"${APP_NAME}\"\n"));
        assert!(text.contains("\n\n# JWT Configuration\nJWT_SECRET="));
        assert_eq!(text.matches("FILESYSTEM_DISK=").count(), 1);
    }

    #[test]
    fn awkward_values_round_trip_through_parser() {
        let mut steps = sample_steps();
        let db = steps.get_mut(&step_of(StepKind::Database).number).unwrap();
        db.insert("db_password".into(), " p@ss \"w$rd\"\\ #1 ".into());
        let site = steps.get_mut(&step_of(StepKind::Site).number).unwrap();
        site.insert("app_name".into(), "وصلني Rides".into());

        let doc = build(&steps, None).unwrap();
        let parsed = parse(&serialize(&doc)).unwrap();
        for entry in doc.entries() {
            assert_eq!(
                parsed.get(&entry.key),
                Some(entry.value.as_str()),
                "key {}",
                entry.key
            );
        }
        assert_eq!(parsed.get("DB_PASSWORD"), Some(" p@ss \"w$rd\"\\ #1 "));
    }
}
