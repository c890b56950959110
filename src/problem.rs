//! Compiler diagnostics buffered through the callback.

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warn,
    Info,
}

impl Severity {
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position a diagnostic points at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Path of the offending source. Diagnostics without one cannot be
    /// attributed and are dropped by the callback.
    pub source: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SourcePosition {
    pub fn new(source: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self { source: Some(source.into()), line: Some(line), column: Some(column) }
    }

    pub fn unpositioned() -> Self {
        Self::default()
    }
}

/// A single compiler diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub category: String,
    pub position: SourcePosition,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(source) = &self.position.source {
            write!(f, " ({}", source.display())?;
            if let (Some(line), Some(column)) = (self.position.line, self.position.column) {
                write!(f, ":{line}:{column}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}
