use std::fmt;

use thiserror::Error;

/// A 0-based position in source text (markup or an expression).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 0-based line number
    pub line: usize,
    /// 0-based column (character offset within the line)
    pub column: usize,
    /// 0-based absolute byte offset from the start of input
    pub offset: usize,
}

impl Position {
    /// Compute the position of byte `offset` within `input`.
    pub fn at(input: &str, offset: usize) -> Self {
        let consumed = &input[..offset];
        let line = consumed.matches('\n').count();
        let last_newline = consumed.rfind('\n').map(|i| i + 1).unwrap_or(0);
        Position {
            line,
            column: consumed[last_newline..].chars().count(),
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A markup syntax error with span information (begin..end).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{begin}: {message}")]
pub struct MarkupError {
    pub message: String,
    /// Start of the offending region
    pub begin: Position,
    /// End of the offending region (exclusive)
    pub end: Position,
}

/// An expression syntax error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("column {offset}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

/// Runtime failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("{0} is not defined")]
    UnknownIdentifier(String),
    #[error("cannot read property '{property}' of {target}")]
    NullAccess { property: String, target: &'static str },
}

/// Failure of a path-addressed read or write against the state graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("path '{0}' does not resolve")]
    NotFound(String),
    #[error("'{0}' is not an object or array")]
    NotContainer(String),
    #[error("'{0}' is not an array")]
    NotAnArray(String),
    #[error("index {index} out of range for '{path}' (length {len})")]
    IndexOutOfRange { path: String, index: usize, len: usize },
    #[error("the root of the state graph cannot be replaced")]
    RootWrite,
    #[error("length {len} for '{path}' exceeds the maximum of {max}")]
    LengthTooLarge { path: String, len: u64, max: usize },
}

/// Top-level error for operations that can fail hard.
#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Markup(#[from] MarkupError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("node {0} is not an element of the mounted document")]
    UnknownNode(usize),
    #[error("no document is mounted")]
    NotMounted,
}

/// A non-fatal problem found while scanning, rendering or dispatching.
///
/// Diagnostics never abort the operation that produced them; the affected
/// binding degrades to a stale or unresolved token instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Machine-readable code, e.g. `expression-failed`.
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Collector for diagnostics. Every pushed diagnostic is also logged.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, code: &'static str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(code, "{}", message);
        self.items.push(Diagnostic { code, message });
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        for d in other {
            self.push(d.code, d.message);
        }
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
