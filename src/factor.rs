//! `Factor`: the public handle on a parsed factor tree (spec §4.3).

use std::collections::BTreeSet;

use crate::column::Batch;
use crate::error::ParseError;
use crate::node::Node;
use crate::parser;

/// A parsed, evaluable expression tree mapping tabular input columns to one
/// output column.
///
/// `Factor` is cheap to `clone` (the tree is copied, but every node's
/// streaming state comes back fresh, as if freshly parsed) and cheap to
/// `reset` in place. See spec Invariants 3 and 6.
#[derive(Debug, Clone)]
pub struct Factor {
    root: Node,
    source: String,
}

impl Factor {
    /// Parses a factor from its prefix s-expression source.
    pub fn parse(source: &str) -> Result<Factor, ParseError> {
        let root = parser::parse(source)?;
        let canonical = root.to_string_canonical();
        Ok(Factor { root, source: canonical })
    }

    /// The smallest row index from which this factor can produce a
    /// non-`NaN` output.
    pub fn ready_offset(&self) -> usize {
        self.root.ready_offset
    }

    /// The set of leaf column names this factor references.
    pub fn columns_needed(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.columns_needed(&mut out);
        out
    }

    /// Restores the factor to the same observable state as a freshly-parsed
    /// clone: every ring buffer cleared, every counter zeroed.
    pub fn reset(&mut self) {
        self.root.reset();
    }

    /// Steps every row in `[0, batch.len)` through the tree, writing one
    /// output scalar per row into `out` starting at `out_offset`.
    pub fn step_batch(&mut self, batch: &Batch, out: &mut [f64], out_offset: usize) {
        for local in 0..batch.len {
            out[out_offset + local] = self.root.step(batch, local);
        }
    }
}

impl std::fmt::Display for Factor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl PartialEq for Factor {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Batch, Column, DatasetSource, InMemoryDataset};

    fn run(factor: &mut Factor, x: &[f64]) -> Vec<f64> {
        let batch = Batch::new(vec![("x".to_string(), x.to_vec())]);
        let mut out = vec![0.0; x.len()];
        factor.step_batch(&batch, &mut out, 0);
        out
    }

    #[test]
    fn round_trips_canonical_string() {
        let f = Factor::parse("(> (TSStd 60 (TSLogReturn 120 (+ :price_bid :price_ask))) 0.0005)").unwrap();
        let reparsed = Factor::parse(&f.to_string()).unwrap();
        assert_eq!(reparsed.to_string(), f.to_string());
    }

    #[test]
    fn sum_matches_spec_scenario() {
        let mut f = Factor::parse("(TSSum 3 :x)").unwrap();
        let x: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let out = run(&mut f, &x);
        let expected = [f64::NAN, f64::NAN, 6., 9., 12., 15., 18., 21., 24., 27.];
        for (got, want) in out.iter().zip(expected.iter()) {
            if want.is_nan() {
                assert!(got.is_nan());
            } else {
                assert!((got - want).abs() < 1e-9);
            }
        }
        assert_eq!(f.ready_offset(), 2);
    }

    #[test]
    fn delay_matches_spec_scenario() {
        let mut f = Factor::parse("(Delay 2 :x)").unwrap();
        let x: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let out = run(&mut f, &x);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(&out[2..], &[1., 2., 3., 4., 5., 6., 7., 8.]);
        assert_eq!(f.ready_offset(), 2);
    }

    #[test]
    fn reset_restores_fresh_clone_behavior() {
        let mut f = Factor::parse("(TSMean 3 :x)").unwrap();
        let x: Vec<f64> = (1..=6).map(|v| v as f64).collect();
        let first = run(&mut f, &x);
        f.reset();
        let second = run(&mut f, &x);
        assert_eq!(first, second);
    }

    #[test]
    fn columns_needed_collects_all_leaves() {
        let f = Factor::parse("(TSCorr 5 :a :b)").unwrap();
        let cols = f.columns_needed();
        assert!(cols.contains("a") && cols.contains("b"));
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn clone_has_fresh_state() {
        let mut f = Factor::parse("(TSSum 3 :x)").unwrap();
        let x: Vec<f64> = (1..=5).map(|v| v as f64).collect();
        let _ = run(&mut f, &x);
        let mut cloned = f.clone();
        let out = run(&mut cloned, &x);
        assert!(out[0].is_nan() && out[1].is_nan());
    }

    #[test]
    fn dataset_smoke() {
        let ds = InMemoryDataset::new("t", vec![Column::new("x", vec![1.0, 2.0, 3.0])]);
        assert_eq!(ds.row_count().unwrap(), 3);
    }
}
