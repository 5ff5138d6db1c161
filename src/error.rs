//! Structured diagnostics (spec.md §4.9/§7). Nothing in this crate panics on
//! user input; every fallible operation returns a `Result` or accumulates
//! into an [`ErrorChannel`], mirroring `why_lib::typechecker::error` and the
//! process-global accumulator in `original_source/src/errors.cpp`.

use std::fmt::{self, Display};

use crate::span::Span;
use crate::types::Type;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    FileNotFound { path: String },
    ParseError { message: String },
    UndefinedVariable { name: String },
    UndefinedFunction { name: String },
    UndefinedType { name: String },
    AmbiguousCall { name: String, candidates: usize },
    ReassigningImmutable { name: String },
    IncompatibleTypes { expected: Type, actual: Type },
    UnhandledReturnValue { return_type: Type },
    RedefinedType { name: String },
    GenericOverloadConflict { name: String },
    NotAllFieldsInitialized { type_name: String, missing: Vec<String> },
    MissingField { type_name: String, field: String },
    IncompatibleReturnType { expected: Type, actual: Type },
    ConstraintFailed { interface: String, found: Type },
    MissingMainFunction,
    InvalidMainSignature,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::FileNotFound { path } => write!(f, "file not found: {path}"),
            ErrorKind::ParseError { message } => write!(f, "parse error: {message}"),
            ErrorKind::UndefinedVariable { name } => write!(f, "undefined variable '{name}'"),
            ErrorKind::UndefinedFunction { name } => write!(f, "undefined function '{name}'"),
            ErrorKind::UndefinedType { name } => write!(f, "undefined type '{name}'"),
            ErrorKind::AmbiguousCall { name, candidates } => write!(
                f,
                "ambiguous call to '{name}': {candidates} overloads match"
            ),
            ErrorKind::ReassigningImmutable { name } => {
                write!(f, "cannot reassign immutable binding '{name}'")
            }
            ErrorKind::IncompatibleTypes { expected, actual } => {
                write!(f, "expected type '{expected}' but got '{actual}'")
            }
            ErrorKind::UnhandledReturnValue { return_type } => write!(
                f,
                "unhandled return value of type '{return_type}'; use it or bind it"
            ),
            ErrorKind::RedefinedType { name } => write!(f, "type '{name}' is already defined"),
            ErrorKind::GenericOverloadConflict { name } => write!(
                f,
                "cannot mix a generic declaration of '{name}' with other overloads"
            ),
            ErrorKind::NotAllFieldsInitialized { type_name, missing } => write!(
                f,
                "not all fields of '{type_name}' were initialized: missing {}",
                missing.join(", ")
            ),
            ErrorKind::MissingField { type_name, field } => {
                write!(f, "'{type_name}' has no field '{field}'")
            }
            ErrorKind::IncompatibleReturnType { expected, actual } => write!(
                f,
                "function declared to return '{expected}' but body yields '{actual}'"
            ),
            ErrorKind::ConstraintFailed { interface, found } => write!(
                f,
                "type '{found}' does not satisfy interface '{interface}'"
            ),
            ErrorKind::MissingMainFunction => write!(f, "no 'main' function defined"),
            ErrorKind::InvalidMainSignature => write!(f, "'main' has an invalid signature"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaError {
    pub span: Span,
    pub kind: ErrorKind,
}

impl SemaError {
    pub fn new(span: Span, kind: ErrorKind) -> SemaError {
        SemaError { span, kind }
    }
}

impl Display for SemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.span.render(&self.kind))
    }
}

impl std::error::Error for SemaError {}

pub type SemaResult<T> = Result<T, SemaError>;

/// Accumulates diagnostics for one analysis run without aborting (spec.md
/// §4.9/§7: collection errors never abort; the caller decides when to
/// stop).
#[derive(Debug, Default)]
pub struct ErrorChannel {
    errors: Vec<SemaError>,
}

impl ErrorChannel {
    pub fn push(&mut self, error: SemaError) {
        log::debug!("recorded diagnostic: {error}");
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SemaError> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<SemaError> {
        self.errors
    }
}
