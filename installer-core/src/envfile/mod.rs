// Configuration artifact (dotenv) model.
//
// `builder` merges wizard step data into a `ConfigurationDocument` and serializes it;
// `parser` reads an existing artifact back (secret carry-over, verification).

pub mod builder;
pub mod parser;

pub use builder::{
    build, build_settings, carry_over_secrets, ensure_secrets, serialize, BuildError,
};
pub use parser::{parse, EnvFile, ParseError};

use serde::{Deserialize, Serialize};

pub const APP_KEY: &str = "APP_KEY";
pub const JWT_SECRET: &str = "JWT_SECRET";

/// Generated secrets. Never rotated once an artifact carries them.
pub const SECRET_KEYS: [&str; 2] = [APP_KEY, JWT_SECRET];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    Literal(String),
    /// Interpolation reference (`${APP_NAME}`), resolved by the running application.
    Reference(String),
}

impl ConfigValue {
    pub fn literal(v: impl Into<String>) -> Self {
        ConfigValue::Literal(v.into())
    }

    pub fn reference(key: &str) -> Self {
        ConfigValue::Reference(format!("${{{}}}", key))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConfigValue::Literal(s) | ConfigValue::Reference(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: ConfigValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSection {
    pub title: String,
    pub entries: Vec<ConfigEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretOrigin {
    Generated,
    /// Carried forward from an existing artifact.
    Preserved,
}

/// Final settings artifact, grouped into commented sections. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    pub sections: Vec<ConfigSection>,
}

impl ConfigurationDocument {
    pub fn entries(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.sections.iter().flat_map(|s| s.entries.iter())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries().map(|e| e.key.as_str()).collect()
    }

    /// Replace the value of an existing key. Returns false if the key is unknown.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> bool {
        for section in self.sections.iter_mut() {
            if let Some(entry) = section.entries.iter_mut().find(|e| e.key == key) {
                entry.value = value;
                return true;
            }
        }
        false
    }
}
