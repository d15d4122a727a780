//! Binary wire format between the driver and the compiled binary.
//!
//! A table file is a `u64` little-endian row count followed by
//! `n_rows * n_cols` contiguous little-endian IEEE-754 `f64` values in
//! row-major order - exactly `8 + n * k * 8` bytes, no padding. Integer
//! and bool fields are cast to `f64` on write and back on read; integers
//! beyond 2^53 lose precision.

use std::io::{self, Read, Write};

use crate::value::{Row, Value};

/// A dense row-major f64 table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    /// Zero-filled matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Matrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Wrap an existing row-major buffer. `data.len()` must equal
    /// `rows * cols`.
    pub fn from_vec(data: Vec<f64>, rows: usize, cols: usize) -> Option<Self> {
        if data.len() == rows * cols {
            Some(Matrix { data, rows, cols })
        } else {
            None
        }
    }

    /// Build from per-row slices; every row must have the same width.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        Some(Matrix {
            data: rows.iter().flatten().copied().collect(),
            rows: rows.len(),
            cols,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows
    }

    pub fn n_cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy out one column.
    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.cols.max(1)).take(self.rows)
    }
}

/// Encode dict-shaped rows into a wire matrix, one column per declared
/// field in schema order. Missing or non-numeric cells encode as `0.0`.
pub fn encode_rows(rows: &[Row], fields: &[String]) -> Matrix {
    let mut data = Vec::with_capacity(rows.len() * fields.len());
    for row in rows {
        for field in fields {
            data.push(
                row.get(field)
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
            );
        }
    }
    Matrix {
        data,
        rows: rows.len(),
        cols: fields.len(),
    }
}

/// Write a count-prefixed table.
pub fn write_table(writer: &mut impl Write, matrix: &Matrix) -> io::Result<()> {
    writer.write_all(&(matrix.rows as u64).to_le_bytes())?;
    for value in &matrix.data {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Read a count-prefixed table with a known column width.
pub fn read_table(reader: &mut impl Read, cols: usize) -> io::Result<Matrix> {
    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    let rows = u64::from_le_bytes(buf8) as usize;

    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        reader.read_exact(&mut buf8)?;
        data.push(f64::from_le_bytes(buf8));
    }

    Ok(Matrix { data, rows, cols })
}
