//! Dense local matrices and vectors handed to patch callbacks.
use crate::error::PatchError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Whether values overwrite or accumulate into existing entries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertMode {
    Insert,
    Add,
}

/// A small dense matrix addressed by local (patch) indices.
///
/// Insertion skips negative row and column indices, which mark constrained or inactive
/// degrees of freedom.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMatrix {
    values: DMatrix<f64>,
    assembled: bool,
}

impl LocalMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            values: DMatrix::zeros(nrows, ncols),
            assembled: false,
        }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Inserts a row-major block of values at the given rows and columns.
    pub fn set_values(&mut self, rows: &[i32], cols: &[i32], block: &[f64], mode: InsertMode) -> eyre::Result<()> {
        if block.len() != rows.len() * cols.len() {
            return Err(PatchError::invariant(format!(
                "Block of {} values does not match {} rows and {} columns",
                block.len(),
                rows.len(),
                cols.len()
            )));
        }
        let (nrows, ncols) = self.values.shape();
        let out_of_bounds = rows.iter().any(|&r| r >= 0 && r as usize >= nrows)
            || cols.iter().any(|&c| c >= 0 && c as usize >= ncols);
        if out_of_bounds {
            return Err(PatchError::invariant(format!(
                "Block at rows {:?} and columns {:?} is out of bounds for {}x{} local matrix",
                rows, cols, nrows, ncols
            )));
        }
        for (i, &r) in rows.iter().enumerate().filter(|&(_, &r)| r >= 0) {
            for (j, &c) in cols.iter().enumerate().filter(|&(_, &c)| c >= 0) {
                let value = block[i * cols.len() + j];
                let entry = &mut self.values[(r as usize, c as usize)];
                match mode {
                    InsertMode::Insert => *entry = value,
                    InsertMode::Add => *entry += value,
                }
            }
        }
        self.assembled = false;
        Ok(())
    }

    pub fn zero_entries(&mut self) {
        self.values.fill(0.0);
        self.assembled = false;
    }

    /// Finalizes the matrix after insertion.
    pub fn assemble(&mut self) {
        self.assembled = true;
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn into_values(self) -> DMatrix<f64> {
        self.values
    }
}

/// A dense vector addressed by local (patch) indices.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVector {
    values: DVector<f64>,
    assembled: bool,
}

impl LocalVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            values: DVector::zeros(len),
            assembled: false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrites all entries.
    pub fn set(&mut self, values: &[f64]) -> eyre::Result<()> {
        if values.len() != self.len() {
            return Err(PatchError::invariant(format!(
                "Cannot set local vector of length {} from {} values",
                self.len(),
                values.len()
            )));
        }
        self.values.copy_from_slice(values);
        self.assembled = false;
        Ok(())
    }

    pub fn zero_entries(&mut self) {
        self.values.fill(0.0);
        self.assembled = false;
    }

    pub fn as_slice(&self) -> &[f64] {
        self.values.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        self.assembled = false;
        self.values.as_mut_slice()
    }

    /// Marks the vector as final. Values are left untouched.
    pub fn assemble(&mut self) {
        self.assembled = true;
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }
}
