#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const HMR_MISSING_BINDING: &str = "HMR001";
pub const HMR_TEMPLATE_PARSE: &str = "HMR002";
pub const HMR_UNSUPPORTED_OPTIONS: &str = "HMR003";
pub const HMR_KEYWORD_ARGUMENT: &str = "HMR004";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        HMR_MISSING_BINDING => "Only names backed by an import declaration are hot-swappable.",
        HMR_TEMPLATE_PARSE => "A template that cannot be parsed is emitted unchanged.",
        HMR_UNSUPPORTED_OPTIONS => {
            "A template is only rewritten when the indirection variable can be put in its scope."
        }
        HMR_KEYWORD_ARGUMENT => {
            "component/helper/modifier targets are only rewritten when given as a static name."
        }
        _ => "Unknown diagnostic.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// A non-fatal finding. The affected binding or template is simply not made
/// hot-swappable; the rest of the file is still transformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct HmrDiagnostic {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl HmrDiagnostic {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        HmrDiagnostic {
            code: code.to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
        }
    }

    /// Diagnostic located at a byte offset of `source`.
    pub fn at_offset(code: &str, message: &str, file: &str, source: &str, offset: u32) -> Self {
        let (line, column) = line_column(source, offset);
        Self::new(code, message, file, line, column)
    }

    /// Emits the diagnostic through `tracing` and returns it for collection.
    pub fn report(self) -> Self {
        tracing::warn!(
            code = %self.code,
            file = %self.file,
            line = self.line,
            column = self.column,
            "{}",
            self.message
        );
        self
    }
}

/// 1-based line and column of a byte offset.
pub fn line_column(source: &str, offset: u32) -> (u32, u32) {
    let offset = (offset as usize).min(source.len());
    let before = &source.as_bytes()[..offset];
    let line = before.iter().filter(|b| **b == b'\n').count() as u32 + 1;
    let column = match before.iter().rposition(|b| *b == b'\n') {
        Some(nl) => (offset - nl) as u32,
        None => offset as u32 + 1,
    };
    (line, column)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures that abort processing of a file. These are host-integration
/// problems, never properties of a user template.
#[derive(Debug, Error)]
pub enum HmrError {
    #[error("failed to parse host module {file}: {message}")]
    ProgramParse { file: String, message: String },

    #[error("{operation} called while the transformer is {phase}")]
    PhaseViolation {
        operation: &'static str,
        phase: &'static str,
    },

    #[error("cannot resolve '{specifier}' from {importer}: {reason}")]
    Resolve {
        specifier: String,
        importer: String,
        reason: String,
    },

    #[error("invalid hmr configuration: {0}")]
    Config(#[from] serde_json::Error),
}

#[cfg(feature = "napi")]
impl From<HmrError> for napi::Error {
    fn from(err: HmrError) -> Self {
        napi::Error::from_reason(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column_first_line() {
        assert_eq!(line_column("abc", 0), (1, 1));
        assert_eq!(line_column("abc", 2), (1, 3));
    }

    #[test]
    fn test_line_column_after_newlines() {
        let src = "a\nbc\ndef";
        assert_eq!(line_column(src, 2), (2, 1));
        assert_eq!(line_column(src, 6), (3, 2));
    }

    #[test]
    fn test_diagnostic_carries_guarantee() {
        let d = HmrDiagnostic::new(HMR_MISSING_BINDING, "x", "a.gjs", 1, 1);
        assert_eq!(d.code, "HMR001");
        assert!(d.guarantee.contains("import declaration"));
    }
}
