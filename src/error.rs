//! Error taxonomy of the command-language engine.
//!
//! Lexical and binding errors carry source positions so the dispatch loop can
//! print a caret under the offending token; execution errors are attributed to
//! a request and only logged.

use std::any::Any;

use thiserror::Error;

use crate::config::ConfigError;
use crate::parse::Span;
use crate::repl::ReadError;

/// Failure while tokenizing or building the command tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated quote")]
    UnterminatedQuote(Span),
    #[error("unpaired braces")]
    UnpairedBraces(Span),
    #[error("invalid escape sequence {seq:?}")]
    InvalidEscape { seq: String, span: Span },
    #[error("unexpected characters after file redirection")]
    StrayAfterFileRedirection(Span),
    #[error("missing file name after '>'")]
    MissingFileName(Span),
    #[error("missing redirection name after '|'")]
    MissingRedirection(Span),
    #[error("missing shell command")]
    MissingShellCommand(Span),
    #[error("unexpected end of input after '\\'")]
    DanglingEscape(Span),
    #[error("block underflow: '}}' without matching '{{'")]
    BlockUnderflow(Span),
    #[error("empty command head")]
    EmptyCommandHead(Span),
    #[error("argument after block")]
    ArgumentAfterBlock(Span),
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnterminatedQuote(s)
            | LexError::UnpairedBraces(s)
            | LexError::StrayAfterFileRedirection(s)
            | LexError::MissingFileName(s)
            | LexError::MissingRedirection(s)
            | LexError::MissingShellCommand(s)
            | LexError::DanglingEscape(s)
            | LexError::BlockUnderflow(s)
            | LexError::EmptyCommandHead(s)
            | LexError::ArgumentAfterBlock(s) => *s,
            LexError::InvalidEscape { span, .. } => *span,
        }
    }
}

/// Why a raw value could not be stored in a destination field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoerceError {
    #[error("not a valid {0}")]
    Syntax(&'static str),
    #[error("value out of range for {0}")]
    Range(&'static str),
    #[error("{0} fields cannot be counted")]
    NotCountable(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindErrorKind {
    #[error("unknown option {0}")]
    UnknownOption(String),
    #[error("unexpected option after arguments: {0}")]
    OptionAfterArguments(String),
    #[error("unexpected argument #{0}")]
    UnexpectedArgument(usize),
    #[error("option {0} requires a value (end of line)")]
    MissingValue(String),
    #[error("empty value for option {0}")]
    EmptyValue(String),
    #[error("option or argument already specified: {0}")]
    AlreadySpecified(String),
    #[error("invalid value {value:?} for {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: CoerceError,
    },
    #[error("missing one of the options: {0}")]
    MissingOption(String),
    #[error("missing argument #{0}")]
    MissingArgument(usize),
    #[error("interpolation failed: {0}")]
    Interpolation(String),
}

/// Failure while binding a command's arguments to its option struct.
///
/// `token` is the absolute index of the offending token in the script, or
/// `None` when the problem is an omission (reported at the command name).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}")]
pub struct BindError {
    pub kind: BindErrorKind,
    pub token: Option<usize>,
}

impl BindError {
    pub fn at(kind: BindErrorKind, token: usize) -> Self {
        Self {
            kind,
            token: Some(token),
        }
    }

    pub fn missing(kind: BindErrorKind) -> Self {
        Self { kind, token: None }
    }
}

/// A command or redirection that cannot be resolved in the current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{name}: not found or not applicable")]
    NotFound { name: String, token: usize },
    #[error("{name}: no pipe, formatter or sink with this name")]
    UnknownRedirection { name: String, token: usize },
    #[error("{name}: a {kind} cannot follow a {previous}")]
    Misplaced {
        name: String,
        kind: &'static str,
        previous: &'static str,
        token: usize,
    },
    /// `token` is the block's `{`.
    #[error("{name}: a redirection takes no {{ … }} block")]
    UnexpectedBlock { name: String, token: usize },
}

impl DispatchError {
    pub fn token(&self) -> usize {
        match self {
            DispatchError::NotFound { token, .. }
            | DispatchError::UnknownRedirection { token, .. }
            | DispatchError::Misplaced { token, .. }
            | DispatchError::UnexpectedBlock { token, .. } => *token,
        }
    }
}

/// Failure raised by a running command or one of its pipeline stages.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    Failed(String),
    #[error("panic: {0}")]
    Panic(String),
    #[error("cancelled")]
    Cancelled,
    #[error("output pipeline closed")]
    PipelineClosed,
    #[error("nested block failed")]
    Block,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExecError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecError::Failed(message.into())
    }

    /// Convert a payload caught by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        ExecError::Panic(message)
    }
}

/// Umbrella error for the public entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Read(#[from] ReadError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
