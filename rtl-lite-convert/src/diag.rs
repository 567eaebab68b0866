//! Conversion diagnostics.
//!
//! One diagnostic type across analysis, annotation and emission. All
//! per-process analyses run to the end before anything is reported, so a
//! user sees every problem in one pass.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Failure kinds of the conversion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvCode {
    // signal flow
    UndrivenSignal,
    MultipleDriven,
    OutputPortRead,
    UnreadSignal,
    UnusedPort,
    // typing
    UndefinedBitWidth,
    ModularRange,
    TypeMismatch,
    NrBitsMismatch,
    // structure
    ListAsPort,
    SignalInMultipleLists,
    ShadowingVar,
    EmptySensitivity,
    LoopForm,
    NegativeIndex,
    UnboundLocal,
    UnsupportedConstruct,
    SkippedInstance,
}

/// A single finding, attributed to a process and/or signal when known.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ConvCode,
    pub message: String,
    pub process: Option<String>,
    pub signal: Option<String>,
}

impl Diagnostic {
    pub fn error(code: ConvCode, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            code,
            message: message.into(),
            process: None,
            signal: None,
        }
    }

    pub fn warning(code: ConvCode, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            code,
            message: message.into(),
            process: None,
            signal: None,
        }
    }

    pub fn in_process(mut self, process: impl Into<String>) -> Diagnostic {
        self.process = Some(process.into());
        self
    }

    pub fn on_signal(mut self, signal: impl Into<String>) -> Diagnostic {
        self.signal = Some(signal.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        if let Some(p) = &self.process {
            write!(f, " (process {p})")?;
        }
        if let Some(s) = &self.signal {
            write!(f, " (signal {s})")?;
        }
        Ok(())
    }
}

/// Accumulator shared by all pipeline stages.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.items.push(d);
    }

    pub fn error(&mut self, code: ConvCode, message: impl Into<String>) {
        self.push(Diagnostic::error(code, message));
    }

    pub fn warning(&mut self, code: ConvCode, message: impl Into<String>) {
        self.push(Diagnostic::warning(code, message));
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.is_error())
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_errors() {
        let mut diags = Diagnostics::new();
        diags.error(ConvCode::UndrivenSignal, "sig x is not driven");
        diags.warning(ConvCode::UnreadSignal, "sig y is never read");
        assert_eq!(diags.error_count(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn display_includes_attribution() {
        let d = Diagnostic::error(ConvCode::MultipleDriven, "two drivers")
            .in_process("seq_0")
            .on_signal("count");
        let s = d.to_string();
        assert!(s.contains("MultipleDriven"));
        assert!(s.contains("seq_0"));
        assert!(s.contains("count"));
    }
}
