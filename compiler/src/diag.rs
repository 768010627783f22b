// diag.rs — Unified error model for code generation
//
// Every fatal condition raised by the generator (configuration, adapter
// resolution, macro expansion, model loading, I/O, subprocesses) surfaces
// as a single `CgError` carrying a category, a stable code, a message and
// the chain of underlying causes.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::path::Path;

use crate::lexer::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable error code (e.g., `E0300`).
///
/// Codes are grouped by hundreds: `E01xx` configuration, `E02xx`
/// resolution, `E03xx` macro/template, `E04xx` model and expression,
/// `E05xx` I/O, `E06xx` subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // ── Configuration ──
    pub const E0100: DiagCode = DiagCode("E0100"); // empty adapter package list
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown language or dialect
    pub const E0102: DiagCode = DiagCode("E0102"); // malformed option value
    pub const E0103: DiagCode = DiagCode("E0103"); // run requested, no commands known

    // ── Resolution ──
    pub const E0200: DiagCode = DiagCode("E0200"); // no adapter for component
    pub const E0201: DiagCode = DiagCode("E0201"); // adapter of the wrong role

    // ── Macro / template ──
    pub const E0300: DiagCode = DiagCode("E0300"); // `$` without open paren
    pub const E0301: DiagCode = DiagCode("E0301"); // macro replacement failed
    pub const E0302: DiagCode = DiagCode("E0302"); // malformed macro arguments
    pub const E0303: DiagCode = DiagCode("E0303"); // user macro failed
    pub const E0304: DiagCode = DiagCode("E0304"); // malformed code block header
    pub const E0305: DiagCode = DiagCode("E0305"); // duplicate code block signature
    pub const E0306: DiagCode = DiagCode("E0306"); // missing mandatory code block
    pub const E0307: DiagCode = DiagCode("E0307"); // `${` without `}`
    pub const E0308: DiagCode = DiagCode("E0308"); // `${name}` not in scope

    // ── Model / expression ──
    pub const E0400: DiagCode = DiagCode("E0400"); // malformed model description
    pub const E0401: DiagCode = DiagCode("E0401"); // unknown port or parameter
    pub const E0402: DiagCode = DiagCode("E0402"); // expression parse failure
    pub const E0403: DiagCode = DiagCode("E0403"); // expression evaluation failure

    // ── I/O ──
    pub const E0500: DiagCode = DiagCode("E0500"); // read failure
    pub const E0501: DiagCode = DiagCode("E0501"); // write failure
    pub const E0502: DiagCode = DiagCode("E0502"); // code directory is a file
    pub const E0503: DiagCode = DiagCode("E0503"); // output exists, overwrite refused

    // ── Subprocess ──
    pub const E0600: DiagCode = DiagCode("E0600"); // failed to spawn
    pub const E0601: DiagCode = DiagCode("E0601"); // timed out
}

// ── Error category ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Resolution,
    Macro,
    TypeConversion,
    Model,
    Expression,
    Io,
    Subprocess,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::Resolution => "resolution error",
            ErrorKind::Macro => "macro error",
            ErrorKind::TypeConversion => "type conversion error",
            ErrorKind::Model => "model error",
            ErrorKind::Expression => "expression error",
            ErrorKind::Io => "I/O error",
            ErrorKind::Subprocess => "subprocess error",
        };
        f.write_str(s)
    }
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── CgError ──────────────────────────────────────────────────────────────

/// A fatal code-generation failure.
#[derive(Debug)]
pub struct CgError {
    pub kind: ErrorKind,
    pub code: Option<DiagCode>,
    pub message: String,
    pub span: Option<Span>,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, CgError>;

impl CgError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            span: None,
            hint: None,
            cause_chain: Vec::new(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message).with_code(codes::E0200)
    }

    pub fn macro_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Macro, message)
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Model, message)
    }

    /// Wrap an I/O failure with the operation attempted and the path involved.
    pub fn io(operation: &str, path: &Path, err: std::io::Error) -> Self {
        let code = if operation.starts_with("read") {
            codes::E0500
        } else {
            codes::E0501
        };
        Self::new(
            ErrorKind::Io,
            format!("failed to {} {}: {}", operation, path.display(), err),
        )
        .with_code(code)
        .with_source(err)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach the byte range inside the code block being processed.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }

    /// Attach an underlying error as `std::error::Error::source`.
    pub fn with_source(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(err));
        self
    }

    /// Chain `inner` below this error: its message and causes become
    /// this error's cause chain, and its source is carried over.
    pub fn caused_by(mut self, inner: CgError) -> Self {
        self.cause_chain.push(CauseRecord {
            message: inner.message,
            span: inner.span,
        });
        self.cause_chain.extend(inner.cause_chain);
        if self.source.is_none() {
            self.source = inner.source;
        }
        if self.hint.is_none() {
            self.hint = inner.hint;
        }
        self
    }

    /// The innermost message in the chain (the original failure).
    pub fn root_message(&self) -> &str {
        self.cause_chain
            .last()
            .map(|c| c.message.as_str())
            .unwrap_or(&self.message)
    }
}

impl fmt::Display for CgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", self.kind, code, self.message)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  caused by: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for CgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let e = CgError::model("unknown component 'A'");
        assert_eq!(format!("{e}"), "model error: unknown component 'A'");
    }

    #[test]
    fn display_with_code_and_hint() {
        let e = CgError::config("empty package list")
            .with_code(codes::E0100)
            .with_hint("set --generator-package-list");
        assert_eq!(
            format!("{e}"),
            "configuration error[E0100]: empty package list\n  hint: set --generator-package-list"
        );
    }

    #[test]
    fn caused_by_flattens_chain() {
        let inner = CgError::macro_error("bad arity")
            .with_cause("innermost", None)
            .with_hint("use $get(port, channel)");
        let outer = CgError::macro_error("failed to replace").caused_by(inner);

        assert_eq!(outer.cause_chain.len(), 2);
        assert_eq!(outer.cause_chain[0].message, "bad arity");
        assert_eq!(outer.root_message(), "innermost");
        assert_eq!(outer.hint.as_deref(), Some("use $get(port, channel)"));
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as _;
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = CgError::io("read template", Path::new("/tmp/x.c"), err);
        assert_eq!(e.code, Some(codes::E0500));
        assert!(e.source().is_some());
        assert!(e.message.contains("/tmp/x.c"));
    }
}
