//! Whitelisted telemetry chokepoint.
//!
//! Everything the kernel reports to the outside world goes through
//! [`ExternalLog::emit`]. Only whitelisted field names pass; string values are
//! stripped of control characters and truncated. In strict mode a foreign
//! field is an error; in permissive mode it is dropped and the attempt is
//! recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::ExternalLogConfig;

/// Longest string value written externally.
const MAX_VALUE_CHARS: usize = 256;

/// Behaviour on a non-whitelisted field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakMode {
    /// Raise [`LogLeakError`].
    #[default]
    Strict,
    /// Drop the field and record the attempt.
    Permissive,
}

impl FromStr for LeakMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(format!("unknown leak mode: {other}")),
        }
    }
}

/// A field outside the whitelist was written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field `{field}` is not whitelisted for external event `{event}`")]
pub struct LogLeakError {
    /// Event being emitted.
    pub event: String,
    /// Offending field name.
    pub field: String,
}

/// A blocked or dropped field, kept for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakAttempt {
    /// Event being emitted.
    pub event: String,
    /// Offending field name (sanitized).
    pub field: String,
    /// Mode in force at the time.
    pub mode: LeakMode,
}

/// Sanitized external log writer.
#[derive(Debug)]
pub struct ExternalLog {
    kernel_id: Uuid,
    mode: LeakMode,
    whitelist: BTreeSet<String>,
    attempts: Vec<LeakAttempt>,
    emitted: u64,
    field_name: Option<Regex>,
    control: Option<Regex>,
}

impl ExternalLog {
    /// Create a guard for `kernel_id` with the configured whitelist.
    #[must_use]
    pub fn new(kernel_id: Uuid, config: &ExternalLogConfig) -> Self {
        Self {
            kernel_id,
            mode: config.mode,
            whitelist: config.whitelist.iter().cloned().collect(),
            attempts: Vec::new(),
            emitted: 0,
            field_name: Regex::new(r"^[a-z][a-z0-9_]{0,63}$").ok(),
            control: Regex::new(r"[\x00-\x1f\x7f]").ok(),
        }
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> LeakMode {
        self.mode
    }

    /// Recorded blocked or dropped fields.
    #[must_use]
    pub fn attempts(&self) -> &[LeakAttempt] {
        &self.attempts
    }

    /// Number of records emitted.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn allowed(&self, field: &str) -> bool {
        let well_formed = self.field_name.as_ref().is_some_and(|re| re.is_match(field));
        well_formed && self.whitelist.contains(field)
    }

    fn sanitize_str(&self, s: &str) -> String {
        let cleaned = match &self.control {
            Some(re) => re.replace_all(s, "").into_owned(),
            None => s.chars().filter(|c| !c.is_control()).collect(),
        };
        cleaned.chars().take(MAX_VALUE_CHARS).collect()
    }

    fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_str(s)),
            Value::Array(_) | Value::Object(_) => Value::String(self.sanitize_str(&value.to_string())),
            scalar => scalar.clone(),
        }
    }

    /// Emit one event.
    ///
    /// Returns the record as written.
    ///
    /// # Errors
    ///
    /// Returns [`LogLeakError`] in strict mode when any field is not
    /// whitelisted; nothing is written in that case.
    pub fn emit(
        &mut self,
        event: &str,
        fields: &[(&str, Value)],
    ) -> Result<BTreeMap<String, Value>, LogLeakError> {
        let event = self.sanitize_str(event);
        let mut record = BTreeMap::new();
        record.insert("event".to_owned(), Value::String(event.clone()));
        record.insert("kernel_id".to_owned(), Value::String(self.kernel_id.to_string()));

        for (field, value) in fields {
            if self.allowed(field) {
                record.insert((*field).to_owned(), self.sanitize(value));
                continue;
            }
            let attempt = LeakAttempt {
                event: event.clone(),
                field: self.sanitize_str(field),
                mode: self.mode,
            };
            tracing::warn!(event = %attempt.event, field = %attempt.field, "external log field blocked");
            self.attempts.push(attempt.clone());
            if self.mode == LeakMode::Strict {
                return Err(LogLeakError {
                    event: attempt.event,
                    field: attempt.field,
                });
            }
        }

        self.emitted = self.emitted.saturating_add(1);
        let rendered = serde_json::to_string(&record).unwrap_or_default();
        tracing::info!(target: "actuation_kernel::external", record = %rendered, "external event");
        Ok(record)
    }
}
