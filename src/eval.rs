//! Batch evaluator (spec §4.4): drives one dataset through a set of factors,
//! applying schema validation, trimming, and predicate filtering.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::column::{Batch, Column, DatasetSource, Table};
use crate::error::{FactorFailure, PredicateError, ReplayError, SchemaError};
use crate::factor::Factor;
use crate::options::ReplayOptions;
use crate::scheduler::Executor;

/// The result of replaying one dataset: the output table plus any factors
/// that referenced a column the dataset does not have. A schema failure
/// never aborts the whole replay and never removes the factor's column —
/// it stays in place, filled with `NaN` for every row.
pub struct ReplayOutcome {
    pub table: Table,
    pub factor_failures: Vec<(String, FactorFailure)>,
}

pub fn replay_dataset(
    factors: &[(String, Factor)],
    predicate: Option<&Factor>,
    dataset: &mut dyn DatasetSource,
    options: &ReplayOptions,
    factor_exec: Option<&Executor>,
) -> Result<ReplayOutcome, ReplayError> {
    let available: BTreeSet<String> = dataset.columns()?.into_iter().collect();

    let mut factor_failures = Vec::new();
    let mut failed: BTreeSet<String> = BTreeSet::new();
    let mut active: Vec<(String, Factor)> = Vec::with_capacity(factors.len());
    for (name, factor) in factors {
        match factor.columns_needed().into_iter().find(|c| !available.contains(c)) {
            Some(missing) => {
                factor_failures.push((name.clone(), FactorFailure::Schema(SchemaError { column: missing })));
                failed.insert(name.clone());
            }
            None => active.push((name.clone(), factor.clone())),
        }
    }

    let mut predicate_factor = match predicate {
        Some(p) => {
            if let Some(missing) = p.columns_needed().into_iter().find(|c| !available.contains(c)) {
                return Err(ReplayError::Predicate(PredicateError {
                    reason: format!("predicate references column {missing:?}, absent from dataset {:?}", dataset.name()),
                }));
            }
            Some(p.clone())
        }
        None => None,
    };

    let row_count = dataset.row_count()?;

    let mut needed: BTreeSet<String> = BTreeSet::new();
    for (_, factor) in &active {
        needed.extend(factor.columns_needed());
    }
    if let Some(p) = &predicate_factor {
        needed.extend(p.columns_needed());
    }
    let needed: Vec<String> = needed.into_iter().collect();

    let mut outputs: Vec<Vec<f64>> = active.iter().map(|_| vec![f64::NAN; row_count]).collect();
    let mut predicate_values: Vec<f64> = Vec::with_capacity(row_count);
    let mut index_values: Vec<f64> = Vec::new();

    let mut offset = 0usize;
    let batches = dataset.batches(&needed, options.index_col.as_deref(), options.batch_size)?;
    for batch in batches {
        let batch = batch?;

        if let Some(idx) = &options.index_col {
            if let Some(col) = batch.get(idx) {
                index_values.extend_from_slice(col);
            }
        }

        match factor_exec {
            Some(exec) if options.n_factor_jobs > 1 => step_batch_parallel(exec, &mut active, &batch, &mut outputs, offset),
            _ => step_batch_serial(&mut active, &batch, &mut outputs, offset),
        }

        match predicate_factor.as_mut() {
            Some(p) => {
                let mut pred_out = vec![f64::NAN; batch.len];
                p.step_batch(&batch, &mut pred_out, 0);
                predicate_values.extend_from_slice(&pred_out);
            }
            None => predicate_values.extend(std::iter::repeat(1.0).take(batch.len)),
        }

        offset += batch.len;
    }

    let trim_from = if options.trim { active.iter().map(|(_, f)| f.ready_offset()).max().unwrap_or(0) } else { 0 };

    let keep: Vec<usize> = (trim_from..row_count)
        .filter(|&row| crate::ops::truthy(predicate_values[row]).unwrap_or(false))
        .collect();

    let mut columns = Vec::with_capacity(factors.len() + 1);
    if let Some(idx) = &options.index_col {
        if !index_values.is_empty() {
            let kept: Vec<f64> = keep.iter().map(|&row| index_values[row]).collect();
            columns.push(Column::new(idx.clone(), kept));
        }
    }

    // Walk the caller's original factor order, pulling computed values for
    // every factor that survived schema validation and filling in all-`NaN`
    // for one that didn't, so a failure neither drops a column nor reorders
    // the ones around it.
    let mut computed = active.iter().map(|(name, _)| name.clone()).zip(outputs.into_iter());
    let mut next_computed = computed.next();
    for (name, _) in factors {
        if failed.contains(name) {
            columns.push(Column::new(name.clone(), vec![f64::NAN; keep.len()]));
            continue;
        }
        let (computed_name, values) = next_computed.take().expect("every non-failed factor has computed output");
        debug_assert_eq!(&computed_name, name);
        let kept: Vec<f64> = keep.iter().map(|&row| values[row]).collect();
        columns.push(Column::new(name.clone(), kept));
        next_computed = computed.next();
    }

    Ok(ReplayOutcome { table: Table { row_count: keep.len(), columns }, factor_failures })
}

fn step_batch_serial(active: &mut [(String, Factor)], batch: &Batch, outputs: &mut [Vec<f64>], offset: usize) {
    for ((_, factor), out) in active.iter_mut().zip(outputs.iter_mut()) {
        factor.step_batch(batch, out, offset);
    }
}

fn step_batch_parallel(exec: &Executor, active: &mut Vec<(String, Factor)>, batch: &Batch, outputs: &mut [Vec<f64>], offset: usize) {
    let shared_batch = Arc::new(batch.clone());
    let len = batch.len;
    let drained: Vec<(String, Factor)> = active.drain(..).collect();
    let mut promises = Vec::with_capacity(drained.len());
    let mut names = Vec::with_capacity(drained.len());
    for (name, mut factor) in drained {
        names.push(name);
        let b = shared_batch.clone();
        promises.push(exec.exec(len, move || {
            let mut out = vec![0.0f64; len];
            factor.step_batch(&b, &mut out, 0);
            (factor, out)
        }));
    }
    for (i, (promise, name)) in promises.into_iter().zip(names.into_iter()).enumerate() {
        let (factor, out) = promise.wait();
        outputs[i][offset..offset + len].copy_from_slice(&out);
        active.push((name, factor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::InMemoryDataset;

    #[test]
    fn schema_failure_is_non_fatal_to_siblings() {
        let ok = Factor::parse("(TSSum 2 :x)").unwrap();
        let missing = Factor::parse("(TSSum 2 :y)").unwrap();
        let mut ds = InMemoryDataset::new("t", vec![Column::new("x", vec![1.0, 2.0, 3.0])]);
        let factors = vec![("ok".to_string(), ok), ("missing".to_string(), missing)];
        let outcome = replay_dataset(&factors, None, &mut ds, &ReplayOptions::default(), None).unwrap();
        assert_eq!(outcome.factor_failures.len(), 1);
        assert_eq!(outcome.factor_failures[0].0, "missing");
        // The failing factor keeps its place in the output, all-`NaN`.
        assert_eq!(outcome.table.columns.len(), 2);
        assert_eq!(outcome.table.columns[0].name, "ok");
        assert!(outcome.table.columns[0].values.iter().all(|v| !v.is_nan()));
        assert_eq!(outcome.table.columns[1].name, "missing");
        assert!(outcome.table.columns[1].values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn trim_drops_leading_unready_rows() {
        let f = Factor::parse("(TSSum 3 :x)").unwrap();
        let mut ds = InMemoryDataset::new("t", vec![Column::new("x", (1..=6).map(|v| v as f64).collect())]);
        let mut options = ReplayOptions::default();
        options.trim = true;
        let factors = vec![("s".to_string(), f)];
        let outcome = replay_dataset(&factors, None, &mut ds, &options, None).unwrap();
        assert_eq!(outcome.table.row_count, 4);
        assert!(outcome.table.columns[0].values.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn predicate_filters_rows() {
        let f = Factor::parse(":x").unwrap();
        let pred = Factor::parse("(> :x 3)").unwrap();
        let mut ds = InMemoryDataset::new("t", vec![Column::new("x", (1..=6).map(|v| v as f64).collect())]);
        let factors = vec![("x".to_string(), f)];
        let outcome = replay_dataset(&factors, Some(&pred), &mut ds, &ReplayOptions::default(), None).unwrap();
        assert_eq!(outcome.table.columns[0].values, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn factor_parallel_matches_serial() {
        let mut ds_serial = InMemoryDataset::new("t", vec![Column::new("x", (1..=20).map(|v| v as f64).collect())]);
        let mut ds_parallel = InMemoryDataset::new("t", vec![Column::new("x", (1..=20).map(|v| v as f64).collect())]);
        let factors = vec![
            ("sum".to_string(), Factor::parse("(TSSum 4 :x)").unwrap()),
            ("mean".to_string(), Factor::parse("(TSMean 4 :x)").unwrap()),
        ];
        let serial = replay_dataset(&factors, None, &mut ds_serial, &ReplayOptions::default(), None).unwrap();

        let mut options = ReplayOptions::default();
        options.n_factor_jobs = 3;
        let exec = Executor::new(3);
        let parallel = replay_dataset(&factors, None, &mut ds_parallel, &options, Some(&exec)).unwrap();

        for (a, b) in serial.table.columns.iter().zip(parallel.table.columns.iter()) {
            assert_eq!(a.values, b.values);
        }
    }
}
