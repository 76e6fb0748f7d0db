// cr3restore/src/restore/key.rs
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::errors::{RestoreError, Result};

/// Path segment shared by every CR3 object, below the environment prefix.
pub const CR3_PATH_SEGMENT: &str = "cris-cr3-files";
pub const CR3_EXTENSION: &str = "pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub fn from_production_flag(production: bool) -> Self {
        if production {
            Environment::Production
        } else {
            Environment::Staging
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }

    /// Prefix under which all CR3 files of this environment live, e.g. `staging/cris-cr3-files/`.
    pub fn prefix(&self) -> String {
        format!("{}/{}/", self.as_str(), CR3_PATH_SEGMENT)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated crash identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CrashId(u64);

impl CrashId {
    pub fn new(id: u64) -> Result<Self> {
        if id == 0 {
            return Err(RestoreError::InvalidIdentifier(
                "crash id must be a positive integer, got 0".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Accepts a JSON integer or a string of ASCII digits from the crashes file.
    pub fn parse(raw: &Value) -> Result<Self> {
        match raw {
            Value::Number(number) => match number.as_u64() {
                Some(id) => Self::new(id),
                None => Err(RestoreError::InvalidIdentifier(format!(
                    "`{}` is not a positive integer crash id",
                    number
                ))),
            },
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(RestoreError::InvalidIdentifier(format!(
                        "`{}` is not a numeric crash id",
                        text
                    )));
                }
                let id = trimmed.parse::<u64>().map_err(|e| {
                    RestoreError::InvalidIdentifier(format!("`{}` is out of range: {}", text, e))
                })?;
                Self::new(id)
            }
            other => Err(RestoreError::InvalidIdentifier(format!(
                "expected a crash id, found `{}`",
                other
            ))),
        }
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CrashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key of a crash's CR3 PDF, e.g. `production/cris-cr3-files/18597808.pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn derive(environment: Environment, crash_id: CrashId) -> Self {
        Self(format!(
            "{}{}.{}",
            environment.prefix(),
            crash_id,
            CR3_EXTENSION
        ))
    }

    /// Wraps a key exactly as the store reported it.
    pub fn from_store(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_derive_key_per_environment() {
        let id = CrashId::new(18597808).unwrap();
        assert_eq!(
            DocumentKey::derive(Environment::Production, id).as_str(),
            "production/cris-cr3-files/18597808.pdf"
        );
        assert_eq!(
            DocumentKey::derive(Environment::Staging, id).as_str(),
            "staging/cris-cr3-files/18597808.pdf"
        );
    }

    #[test]
    fn test_environment_from_flag() {
        assert_eq!(Environment::from_production_flag(true), Environment::Production);
        assert_eq!(Environment::from_production_flag(false), Environment::Staging);
        assert_eq!(Environment::Staging.prefix(), "staging/cris-cr3-files/");
    }

    #[test]
    fn test_parse_accepts_integers_and_digit_strings() {
        assert_eq!(CrashId::parse(&json!(14683802)).unwrap().get(), 14683802);
        assert_eq!(CrashId::parse(&json!("18597755")).unwrap().get(), 18597755);
        assert_eq!(CrashId::parse(&json!(" 42 ")).unwrap().get(), 42);
    }

    #[test]
    fn test_parse_rejects_malformed_identifiers() {
        let bad = vec![
            json!(0),
            json!(-5),
            json!(12.5),
            json!(""),
            json!("12a"),
            json!("../etc/passwd"),
            json!(null),
            json!(true),
            json!([1]),
            json!({"id": 1}),
            json!("99999999999999999999999"),
        ];

        for raw in bad {
            let err = CrashId::parse(&raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "input {}", raw);
        }
    }
}
