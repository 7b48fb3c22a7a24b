//! Stationary isotropic kernels and their input gradients.

use serde::{Deserialize, Serialize};

const SQRT_5: f64 = 2.236_067_977_499_79;

/// Kernel function types for the Gaussian process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelType {
    /// Radial Basis Function (Squared Exponential)
    Rbf,
    /// Matern kernel with nu = 5/2
    Matern52,
}

impl Default for KernelType {
    fn default() -> Self {
        KernelType::Matern52
    }
}

/// Signal variance and lengthscale of an isotropic kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    pub kind: KernelType,
    pub variance: f64,
    pub lengthscale: f64,
}

impl Kernel {
    pub fn new(kind: KernelType, variance: f64, lengthscale: f64) -> Self {
        Self {
            kind,
            variance,
            lengthscale,
        }
    }

    /// k(a, b).
    pub fn value(&self, a: &[f64], b: &[f64]) -> f64 {
        let r2 = squared_distance(a, b);
        let l = self.lengthscale;
        match self.kind {
            KernelType::Rbf => self.variance * (-0.5 * r2 / (l * l)).exp(),
            KernelType::Matern52 => {
                let r = r2.sqrt() / l;
                self.variance * (1.0 + SQRT_5 * r + 5.0 / 3.0 * r * r) * (-SQRT_5 * r).exp()
            }
        }
    }

    /// k(x, x) for a stationary kernel.
    pub fn diagonal(&self) -> f64 {
        self.variance
    }

    /// Gradient of k(x, b) with respect to x, written into `out`.
    ///
    /// Both kernels reduce to `-c(r) * (x - b)`, which is finite at r = 0.
    pub fn gradient(&self, x: &[f64], b: &[f64], out: &mut [f64]) {
        let r2 = squared_distance(x, b);
        let l2 = self.lengthscale * self.lengthscale;
        let c = match self.kind {
            KernelType::Rbf => self.variance * (-0.5 * r2 / l2).exp() / l2,
            KernelType::Matern52 => {
                let r = r2.sqrt() / self.lengthscale;
                self.variance * 5.0 / (3.0 * l2) * (1.0 + SQRT_5 * r) * (-SQRT_5 * r).exp()
            }
        };
        for ((o, xi), bi) in out.iter_mut().zip(x).zip(b) {
            *o = -c * (xi - bi);
        }
    }
}

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum()
}
