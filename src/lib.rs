//! A small engine for evaluating prefix s-expression factors against
//! columnar time-series data, streaming row by row with incremental rolling
//! operators and an optional thread-pool fan-out across factors and datasets.
//!
//! The public surface is deliberately narrow: [`Factor::parse`] builds a
//! tree from source text, and [`scheduler::replay`] / [`scheduler::replay_iter`]
//! drive one or more [`column::DatasetSource`] implementations through a set
//! of factors, returning one output [`column::Table`] per dataset.

pub mod column;
pub mod error;
pub mod eval;
pub mod factor;
pub mod lexer;
pub mod node;
pub mod ops;
pub mod options;
pub mod parser;
pub mod scheduler;

pub use column::{Batch, Column, DatasetSource, InMemoryDataset, Table};
pub use error::{ComputeError, FactorFailure, IoError, ParseError, ParseErrorKind, PredicateError, ReplayError, SchemaError};
pub use eval::ReplayOutcome;
pub use factor::Factor;
pub use options::ReplayOptions;
pub use scheduler::{replay, replay_iter, DatasetReplay, Executor};
