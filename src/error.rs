//! Error taxonomy for the factor engine.
//!
//! Mirrors the severity split in the spec: parsing errors are fatal to the
//! caller, dataset-level errors abort one dataset, and per-factor errors are
//! collected and reported alongside whatever factors did succeed.

use std::fmt;

/// Why the parser rejected a factor string.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    UnexpectedToken,
    ArityMismatch { operator: String, expected: String, found: usize },
    UnknownOperator,
    InvalidWindow { reason: String },
    InvalidQuantile,
    ExpectedLiteral,
    TrailingInput,
    UnterminatedList,
    KindMismatch { expected: &'static str },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::UnexpectedToken => write!(f, "unexpected token"),
            ParseErrorKind::ArityMismatch { operator, expected, found } => write!(
                f,
                "operator {operator} expects {expected} argument(s), found {found}"
            ),
            ParseErrorKind::UnknownOperator => write!(f, "unknown operator"),
            ParseErrorKind::InvalidWindow { reason } => write!(f, "invalid window: {reason}"),
            ParseErrorKind::InvalidQuantile => write!(f, "quantile level must be within [0, 1]"),
            ParseErrorKind::ExpectedLiteral => write!(f, "expected a numeric literal"),
            ParseErrorKind::TrailingInput => write!(f, "trailing input after factor expression"),
            ParseErrorKind::UnterminatedList => write!(f, "unterminated '('"),
            ParseErrorKind::KindMismatch { expected } => write!(f, "expected a {expected} expression"),
        }
    }
}

/// A factor string failed to parse.
///
/// Carries the offending substring and its byte offset in the source, so a
/// caller can point a user at the exact spot that went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: usize,
    pub snippet: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {} (near {:?})", self.kind, self.position, self.snippet)
    }
}

impl std::error::Error for ParseError {}

/// A factor referenced a column absent from the dataset being replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaError {
    pub column: String,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column {:?} is not present in this dataset", self.column)
    }
}

impl std::error::Error for SchemaError {}

/// An operator detected a fatal runtime condition.
///
/// In practice this is unreachable for any factor that passed parsing,
/// since the parser already rejects the one known fatal condition (a
/// zero-width rolling window) before a `Factor` can be built. It remains
/// part of the taxonomy because the evaluator must still have somewhere to
/// route a `step` failure if an operator implementation ever raises one.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeError {
    pub reason: String,
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ComputeError {}

/// The predicate factor failed; fatal for the whole dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateError {
    pub reason: String,
}

impl fmt::Display for PredicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "predicate failed: {}", self.reason)
    }
}

impl std::error::Error for PredicateError {}

/// Propagated unchanged from the external reader abstraction.
#[derive(Debug, Clone, PartialEq)]
pub struct IoError {
    pub reason: String,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io error: {}", self.reason)
    }
}

impl std::error::Error for IoError {}

/// Why a single factor's output is all-`NaN` for a dataset.
///
/// Not fatal: the evaluator records one of these per failing factor and
/// continues with its siblings.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorFailure {
    Schema(SchemaError),
    Compute(ComputeError),
}

impl fmt::Display for FactorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorFailure::Schema(e) => e.fmt(f),
            FactorFailure::Compute(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for FactorFailure {}

/// A dataset-fatal failure surfaced from `replay`/`replay_iter`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayError {
    Predicate(PredicateError),
    Io(IoError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Predicate(e) => e.fmt(f),
            ReplayError::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<PredicateError> for ReplayError {
    fn from(e: PredicateError) -> Self {
        ReplayError::Predicate(e)
    }
}

impl From<IoError> for ReplayError {
    fn from(e: IoError) -> Self {
        ReplayError::Io(e)
    }
}
