//! Load-time and runtime error types.
//!
//! The engine has two distinct error regimes:
//!
//! - [`Errata`]: accumulated, hierarchical load-time diagnostics. Parsing a
//!   rule file never panics and never bails out on the first problem — it
//!   collects as many notes as it can and lets the caller decide whether any
//!   of them are fatal via [`Errata::is_ok`].
//! - [`RuntimeError`]: returned from `Directive::invoke`. The hook
//!   dispatcher logs these and continues with the rest of the hook's
//!   directives unless the failing directive is marked terminal.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A location in a rule file, recovered on a best-effort basis by the YAML
/// loader (see `yaml.rs`). `serde_yaml`'s value tree does not carry spans,
/// so lines are recovered by searching the original source text for the
/// offending key; when that search fails `line` is `None` rather than lying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMark {
    pub file: PathBuf,
    pub line: Option<usize>,
}

impl fmt::Display for SourceMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file.display()),
            None => write!(f, "{}", self.file.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ErrataNote {
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceMark>,
}

impl fmt::Display for ErrataNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.location {
            Some(loc) => write!(f, "{tag}: {} ({loc})", self.message),
            None => write!(f, "{tag}: {}", self.message),
        }
    }
}

/// Accumulated load-time diagnostics, in the order they were recorded.
///
/// Notes are hierarchical only in the sense that callers attach context by
/// pushing additional notes ("while parsing directive X at line Y") after a
/// lower-level note — there is no nested tree, just an ordered list that
/// reads top-down as "root cause, then each enclosing context".
#[derive(Debug, Clone, Default)]
pub struct Errata {
    notes: Vec<ErrataNote>,
}

impl Errata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.notes.push(ErrataNote {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        });
        self
    }

    pub fn push_error_at(&mut self, message: impl Into<String>, location: SourceMark) -> &mut Self {
        self.notes.push(ErrataNote {
            severity: Severity::Error,
            message: message.into(),
            location: Some(location),
        });
        self
    }

    pub fn push_warning(&mut self, message: impl Into<String>) -> &mut Self {
        self.notes.push(ErrataNote {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        });
        self
    }

    /// Attach a contextual note to the *end* of the list, describing the
    /// enclosing scope of whatever was just recorded ("while loading
    /// directive 'with' at line 12").
    pub fn note(&mut self, message: impl Into<String>) -> &mut Self {
        self.notes.push(ErrataNote {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        });
        self
    }

    pub fn is_ok(&self) -> bool {
        !self.notes.iter().any(|n| n.severity == Severity::Error)
    }

    pub fn notes(&self) -> &[ErrataNote] {
        &self.notes
    }

    pub fn extend(&mut self, other: Errata) {
        self.notes.extend(other.notes);
    }

    pub fn merge(mut self, other: Errata) -> Self {
        self.extend(other);
        self
    }
}

impl fmt::Display for Errata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, note) in self.notes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errata {}

/// Error returned by a directive's `invoke`. Logged by the hook dispatcher
/// and otherwise swallowed — a failing directive never aborts the
/// transaction.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("directive '{directive}' failed: {message}")]
    Directive {
        directive: &'static str,
        message: String,
    },

    #[error("extractor '{name}' failed: {message}")]
    Extraction { name: &'static str, message: String },

    #[error("regex match failed: {0}")]
    Regex(String),

    #[error("host adaptor call failed: {0}")]
    Adaptor(String),
}

impl RuntimeError {
    pub fn directive(directive: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Directive {
            directive,
            message: message.into(),
        }
    }
}

pub type LoadResult<T> = Result<T, Errata>;
pub type RunResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errata_accumulates_and_reports_ok() {
        let mut e = Errata::new();
        assert!(e.is_ok());
        e.push_warning("looks odd");
        assert!(e.is_ok());
        e.push_error("bad directive");
        assert!(!e.is_ok());
        assert_eq!(e.notes().len(), 2);
    }

    #[test]
    fn errata_merge_preserves_order() {
        let mut a = Errata::new();
        a.push_error("first");
        let mut b = Errata::new();
        b.push_error("second");
        let merged = a.merge(b);
        let msgs: Vec<_> = merged.notes().iter().map(|n| n.message.as_str()).collect();
        assert_eq!(msgs, vec!["first", "second"]);
    }
}
