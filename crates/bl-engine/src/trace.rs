//! Plain-text evaluation traces: one `x_1 .. x_d y` row per evaluation.

use std::fs;
use std::path::Path;

use bl_types::{validation_error, BlResult, Dataset};

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationTrace {
    rows: Vec<Vec<f64>>,
}

impl EvaluationTrace {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            rows: dataset.to_rows(),
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> BlResult<Self> {
        if let Some(first) = rows.first() {
            if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != first.len()) {
                return Err(validation_error!(
                    "row {i} has {} columns, expected {}",
                    row.len(),
                    first.len()
                ));
            }
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }

    /// Space separated, `%.18e` formatted rows.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|v| format_scientific(*v)).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> BlResult<Self> {
        let mut rows = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>()
                        .map_err(|e| validation_error!("line {}: bad number {tok:?}: {e}", n + 1))
                })
                .collect::<BlResult<Vec<f64>>>()?;
            rows.push(row);
        }
        Self::from_rows(rows)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> BlResult<()> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> BlResult<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Largest absolute elementwise difference, `None` if shapes differ.
    pub fn max_abs_diff(&self, other: &Self) -> Option<f64> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.rows
                .iter()
                .zip(&other.rows)
                .flat_map(|(a, b)| a.iter().zip(b).map(|(p, q)| (p - q).abs()))
                .fold(0.0, f64::max),
        )
    }

    pub fn within(&self, other: &Self, tolerance: f64) -> bool {
        self.max_abs_diff(other).is_some_and(|d| d <= tolerance)
    }
}

/// C-style `%.18e`: two-digit signed exponent.
fn format_scientific(v: f64) -> String {
    let s = format!("{v:.18e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(e) => format!(
                "{mantissa}e{}{:02}",
                if e < 0 { '-' } else { '+' },
                e.unsigned_abs()
            ),
            Err(_) => s,
        },
        // inf and NaN carry no exponent
        None => s,
    }
}
