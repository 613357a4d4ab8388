//! Structured validation warnings.
//!
//! Warnings are produced by table driver construction, by the pipeline's
//! ordering check and by coprocesses running in `--validate` mode, where
//! they arrive as one JSON object per stdout line.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    #[default]
    Warning,
    Info,
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ValidationWarning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn add_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.msg)?;
        if !self.meta.is_empty() {
            let meta = serde_json::to_string(&self.meta).map_err(|_| fmt::Error)?;
            write!(f, " {meta}")?;
        }
        Ok(())
    }
}

/// An ordered collection of warnings. Fatal if any warning is an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationWarnings(Vec<ValidationWarning>);

impl ValidationWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: ValidationWarning) {
        self.0.push(warning);
    }

    pub fn extend(&mut self, other: ValidationWarnings) {
        self.0.extend(other.0);
    }

    pub fn is_fatal(&self) -> bool {
        self.0.iter().any(ValidationWarning::is_fatal)
    }

    pub fn fatal_count(&self) -> usize {
        self.0.iter().filter(|w| w.is_fatal()).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationWarning> {
        self.0.iter()
    }

    /// Emits every warning as a tracing event at a level matching its
    /// severity.
    pub fn log(&self, source: &str) {
        for w in &self.0 {
            match w.severity {
                Severity::Error => tracing::error!(source, warning = %w, "validation error"),
                Severity::Warning => tracing::warn!(source, warning = %w, "validation warning"),
                Severity::Info => tracing::info!(source, warning = %w, "validation notice"),
                Severity::Debug => tracing::debug!(source, warning = %w, "validation notice"),
            }
        }
    }
}

impl FromIterator<ValidationWarning> for ValidationWarnings {
    fn from_iter<I: IntoIterator<Item = ValidationWarning>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ValidationWarnings {
    type Item = ValidationWarning;
    type IntoIter = std::vec::IntoIter<ValidationWarning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationWarnings {
    type Item = &'a ValidationWarning;
    type IntoIter = std::slice::Iter<'a, ValidationWarning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
