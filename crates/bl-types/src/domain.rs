//! Domain definitions: the ordered variables an objective is optimized over.

use serde::{Deserialize, Serialize};

use crate::errors::{BlError, BlResult};

/// Absolute slack allowed when checking a point against its bounds.
const BOUNDS_TOLERANCE: f64 = 1e-9;

/// Describes the admissible values of one variable copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableKind {
    /// Continuous range [low, high].
    Continuous { low: f64, high: f64 },
    /// Finite set of numeric values.
    Discrete { values: Vec<f64> },
    /// Unordered choices, one-hot encoded in the model space.
    Categorical { values: Vec<serde_json::Value> },
}

impl VariableKind {
    /// Number of model-space columns a single copy occupies.
    pub fn columns(&self) -> usize {
        match self {
            Self::Categorical { values } => values.len(),
            _ => 1,
        }
    }
}

/// A named variable, repeated `dimensionality` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Human-readable name (e.g. "var_1").
    pub name: String,
    pub kind: VariableKind,
    pub dimensionality: usize,
}

impl Variable {
    pub fn columns(&self) -> usize {
        self.kind.columns() * self.dimensionality
    }
}

/// The full domain: an ordered list of variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub variables: Vec<Variable>,
}

impl Domain {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
        }
    }

    pub fn add_continuous(
        mut self,
        name: impl Into<String>,
        low: f64,
        high: f64,
        dimensionality: usize,
    ) -> Self {
        self.variables.push(Variable {
            name: name.into(),
            kind: VariableKind::Continuous { low, high },
            dimensionality,
        });
        self
    }

    pub fn add_discrete(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
        dimensionality: usize,
    ) -> Self {
        self.variables.push(Variable {
            name: name.into(),
            kind: VariableKind::Discrete { values },
            dimensionality,
        });
        self
    }

    pub fn add_categorical(
        mut self,
        name: impl Into<String>,
        values: Vec<serde_json::Value>,
        dimensionality: usize,
    ) -> Self {
        self.variables.push(Variable {
            name: name.into(),
            kind: VariableKind::Categorical { values },
            dimensionality,
        });
        self
    }

    /// Length of every input vector in the model space.
    pub fn dimension(&self) -> usize {
        self.variables.iter().map(Variable::columns).sum()
    }

    /// True when every variable is continuous, so no rounding is needed.
    pub fn is_continuous(&self) -> bool {
        self.variables
            .iter()
            .all(|v| matches!(v.kind, VariableKind::Continuous { .. }))
    }

    /// Check the domain definition itself.
    pub fn validate(&self) -> BlResult<()> {
        if self.variables.is_empty() {
            return Err(BlError::Validation("domain has no variables".into()));
        }
        for var in &self.variables {
            if var.dimensionality == 0 {
                return Err(BlError::Validation(format!(
                    "variable '{}' has zero dimensionality",
                    var.name
                )));
            }
            match &var.kind {
                VariableKind::Continuous { low, high } => {
                    if !low.is_finite() || !high.is_finite() || low >= high {
                        return Err(BlError::Validation(format!(
                            "variable '{}' has invalid range [{low}, {high}]",
                            var.name
                        )));
                    }
                }
                VariableKind::Discrete { values } => {
                    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
                        return Err(BlError::Validation(format!(
                            "variable '{}' needs a non-empty set of finite values",
                            var.name
                        )));
                    }
                }
                VariableKind::Categorical { values } => {
                    if values.is_empty() {
                        return Err(BlError::Validation(format!(
                            "variable '{}' has no categories",
                            var.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-column box used by the acquisition optimizer.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = Vec::with_capacity(self.dimension());
        for var in &self.variables {
            for _ in 0..var.dimensionality {
                match &var.kind {
                    VariableKind::Continuous { low, high } => bounds.push((*low, *high)),
                    VariableKind::Discrete { values } => {
                        let low = values.iter().copied().fold(f64::INFINITY, f64::min);
                        let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        bounds.push((low, high));
                    }
                    VariableKind::Categorical { values } => {
                        bounds.extend(std::iter::repeat((0.0, 1.0)).take(values.len()));
                    }
                }
            }
        }
        bounds
    }

    /// Reject points whose shape or values do not belong to the domain.
    pub fn validate_point(&self, x: &[f64]) -> BlResult<()> {
        let expected = self.dimension();
        if x.len() != expected {
            return Err(BlError::domain_mismatch(format!(
                "expected {expected} columns, got {}",
                x.len()
            )));
        }
        if let Some(i) = x.iter().position(|v| !v.is_finite()) {
            return Err(BlError::domain_mismatch(format!(
                "column {i} is not finite"
            )));
        }

        let mut col = 0;
        for var in &self.variables {
            for _ in 0..var.dimensionality {
                match &var.kind {
                    VariableKind::Continuous { low, high } => {
                        let v = x[col];
                        if v < low - BOUNDS_TOLERANCE || v > high + BOUNDS_TOLERANCE {
                            return Err(BlError::domain_mismatch(format!(
                                "'{}' value {v} outside [{low}, {high}]",
                                var.name
                            )));
                        }
                        col += 1;
                    }
                    VariableKind::Discrete { values } => {
                        let v = x[col];
                        if !values.iter().any(|d| (d - v).abs() <= BOUNDS_TOLERANCE) {
                            return Err(BlError::domain_mismatch(format!(
                                "'{}' value {v} is not an admissible discrete value",
                                var.name
                            )));
                        }
                        col += 1;
                    }
                    VariableKind::Categorical { values } => {
                        let block = &x[col..col + values.len()];
                        let ones = block.iter().filter(|v| (*v - 1.0).abs() <= BOUNDS_TOLERANCE).count();
                        let zeros = block.iter().filter(|v| v.abs() <= BOUNDS_TOLERANCE).count();
                        if ones != 1 || ones + zeros != block.len() {
                            return Err(BlError::domain_mismatch(format!(
                                "'{}' block is not one-hot",
                                var.name
                            )));
                        }
                        col += values.len();
                    }
                }
            }
        }
        Ok(())
    }

    /// Project a point onto the domain box.
    pub fn clip(&self, x: &mut [f64]) {
        for (v, (low, high)) in x.iter_mut().zip(self.bounds()) {
            *v = v.clamp(low, high);
        }
    }

    /// Snap a relaxed point to the nearest admissible point.
    ///
    /// Never panics; on a domain that fails [`Domain::validate`] the result
    /// may still be inadmissible.
    ///
    /// Continuous columns are clipped; discrete columns move to the nearest
    /// value; categorical blocks become the one-hot vector of their largest
    /// entry (first wins on ties).
    pub fn round(&self, x: &[f64]) -> Vec<f64> {
        let mut out = x.to_vec();
        let mut col = 0;
        for var in &self.variables {
            for _ in 0..var.dimensionality {
                match &var.kind {
                    VariableKind::Continuous { low, high } => {
                        out[col] = out[col].clamp(*low, *high);
                        col += 1;
                    }
                    VariableKind::Discrete { values } => {
                        let v = out[col];
                        // An empty value set (unvalidated domain) leaves the column as is.
                        if let Some((&first, rest)) = values.split_first() {
                            let mut best = first;
                            for &candidate in rest {
                                if (candidate - v).abs() < (best - v).abs() {
                                    best = candidate;
                                }
                            }
                            out[col] = best;
                        }
                        col += 1;
                    }
                    VariableKind::Categorical { values } => {
                        let width = values.len();
                        let block = &mut out[col..col + width];
                        let mut arg = 0;
                        for i in 1..width {
                            if block[i] > block[arg] {
                                arg = i;
                            }
                        }
                        for (i, v) in block.iter_mut().enumerate() {
                            *v = if i == arg { 1.0 } else { 0.0 };
                        }
                        col += width;
                    }
                }
            }
        }
        out
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}
