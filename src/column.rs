//! Columnar data model: scalars, columns, batches, and the external reader
//! abstraction the evaluator pulls from.
//!
//! The on-disk file format is explicitly out of scope (spec §1); this module
//! only defines the shapes an external reader must produce, plus a small
//! in-memory implementation used by tests, the CLI demo, and callers who
//! already hold their data in process.

use crate::error::IoError;

/// A single double-precision value; `NaN` is the universal missing marker.
pub type Scalar = f64;

/// A named, fixed-length sequence of scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Column { name: name.into(), values }
    }
}

/// A contiguous row-slice of a dataset's columns. All columns in a batch
/// share the same length.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    columns: Vec<(String, Vec<Scalar>)>,
    pub len: usize,
}

impl Batch {
    pub fn new(columns: Vec<(String, Vec<Scalar>)>) -> Self {
        let len = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        debug_assert!(columns.iter().all(|(_, v)| v.len() == len));
        Batch { columns, len }
    }

    pub fn get(&self, name: &str) -> Option<&[Scalar]> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }
}

/// A complete, named, in-order output table: one column per requested
/// factor (plus an optional echoed index column), all of length `row_count`.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub row_count: usize,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// External input abstraction: a dataset exposes its row count and an
/// iterator of aligned column batches, delivered in file order with no
/// gaps, restricted to the columns the caller asked for.
pub trait DatasetSource {
    /// A human-readable name for this dataset, used as the key in
    /// `replay_iter`'s output stream.
    fn name(&self) -> &str;

    /// Total row count of the dataset.
    fn row_count(&self) -> Result<usize, IoError>;

    /// Names of every column this dataset can serve, used by the evaluator to
    /// tell a factor referencing a missing column (non-fatal, spec §7's
    /// `SchemaError`) apart from a dataset that cannot be read at all.
    fn columns(&self) -> Result<Vec<String>, IoError>;

    /// Deliver batches covering exactly `columns` (plus `index_col` if set),
    /// each of length at most `batch_size`, in ascending row order with no
    /// gaps or overlaps.
    fn batches(
        &mut self,
        columns: &[String],
        index_col: Option<&str>,
        batch_size: usize,
    ) -> Result<Box<dyn Iterator<Item = Result<Batch, IoError>> + '_>, IoError>;
}

/// An in-memory dataset, useful for tests, the CLI demo, and any caller that
/// already has its data as plain `Vec<f64>` columns.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    name: String,
    columns: Vec<Column>,
    row_count: usize,
}

impl InMemoryDataset {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        InMemoryDataset { name: name.into(), columns, row_count }
    }
}

impl DatasetSource for InMemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn row_count(&self) -> Result<usize, IoError> {
        Ok(self.row_count)
    }

    fn columns(&self) -> Result<Vec<String>, IoError> {
        Ok(self.columns.iter().map(|c| c.name.clone()).collect())
    }

    fn batches(
        &mut self,
        columns: &[String],
        index_col: Option<&str>,
        batch_size: usize,
    ) -> Result<Box<dyn Iterator<Item = Result<Batch, IoError>> + '_>, IoError> {
        let mut wanted: Vec<String> = columns.to_vec();
        if let Some(idx) = index_col {
            if !wanted.iter().any(|c| c == idx) {
                wanted.push(idx.to_string());
            }
        }
        let mut selected = Vec::with_capacity(wanted.len());
        for name in &wanted {
            let col = self
                .columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| IoError { reason: format!("column {name:?} not found in dataset {:?}", self.name) })?;
            selected.push(col.clone());
        }
        let row_count = self.row_count;
        let batch_size = batch_size.max(1);
        let iter = (0..row_count).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(row_count);
            let cols: Vec<(String, Vec<Scalar>)> =
                selected.iter().map(|c| (c.name.clone(), c.values[start..end].to_vec())).collect();
            Ok(Batch::new(cols))
        });
        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_dataset_batches_in_order() {
        let mut ds = InMemoryDataset::new(
            "t",
            vec![Column::new("x", (0..10).map(|v| v as f64).collect())],
        );
        let names = vec!["x".to_string()];
        let batches: Vec<_> =
            ds.batches(&names, None, 4).unwrap().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len, 4);
        assert_eq!(batches[2].len, 2);
        assert_eq!(batches[0].get("x").unwrap(), &[0.0, 1.0, 2.0, 3.0]);
    }
}
