//! Synthetic objectives with known structure, used by scenarios and tests.

use std::f64::consts::PI;

use bl_types::{BlError, BlResult, Domain, Objective};

fn check_len(name: &str, x: &[f64], expected: usize) -> BlResult<()> {
    if x.len() != expected {
        return Err(BlError::domain_mismatch(format!(
            "{name} expects {expected} inputs, got {}",
            x.len()
        )));
    }
    Ok(())
}

/// Sobol G function: `prod_i (|4 x_i - 2| + a_i) / (1 + a_i)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GSobol {
    a: Vec<f64>,
    evaluations: usize,
}

impl GSobol {
    pub fn new(a: Vec<f64>) -> BlResult<Self> {
        if a.is_empty() {
            return Err(BlError::Config("gSobol needs at least one coefficient".into()));
        }
        if let Some(bad) = a.iter().find(|a| !(**a > -1.0) || !a.is_finite()) {
            return Err(BlError::Config(format!("gSobol coefficient {bad} must be > -1")));
        }
        Ok(Self { a, evaluations: 0 })
    }

    /// All coefficients one, in `dimension` inputs.
    pub fn unit(dimension: usize) -> BlResult<Self> {
        Self::new(vec![1.0; dimension])
    }

    pub fn dimension(&self) -> usize {
        self.a.len()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// The conventional `[-5, 5]` box in every input.
    pub fn domain(&self) -> Domain {
        Domain::new().add_continuous("var_1", -5.0, 5.0, self.dimension())
    }
}

impl Objective for GSobol {
    fn evaluate(&mut self, x: &[f64]) -> BlResult<f64> {
        check_len("gSobol", x, self.a.len())?;
        self.evaluations += 1;
        Ok(x.iter()
            .zip(&self.a)
            .map(|(xi, ai)| ((4.0 * xi - 2.0).abs() + ai) / (1.0 + ai))
            .product())
    }
}

/// `sum_i x_i^2`, minimum 0 at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Sphere {
    dimension: usize,
}

impl Sphere {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn domain(&self) -> Domain {
        Domain::new().add_continuous("x", -1.0, 1.0, self.dimension)
    }
}

impl Objective for Sphere {
    fn evaluate(&mut self, x: &[f64]) -> BlResult<f64> {
        check_len("sphere", x, self.dimension)?;
        Ok(x.iter().map(|v| v * v).sum())
    }
}

/// Branin-Hoo on `[-5, 10] x [0, 15]`, global minimum about 0.397887.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Branin;

impl Branin {
    pub const MINIMUM: f64 = 0.397_887_357_729_738;

    pub fn domain(&self) -> Domain {
        Domain::new()
            .add_continuous("x1", -5.0, 10.0, 1)
            .add_continuous("x2", 0.0, 15.0, 1)
    }
}

impl Objective for Branin {
    fn evaluate(&mut self, x: &[f64]) -> BlResult<f64> {
        check_len("branin", x, 2)?;
        let b = 5.1 / (4.0 * PI * PI);
        let c = 5.0 / PI;
        let t = 1.0 / (8.0 * PI);
        let inner = x[1] - b * x[0] * x[0] + c * x[0] - 6.0;
        Ok(inner * inner + 10.0 * (1.0 - t) * x[0].cos() + 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gsobol_values() {
        let mut f = GSobol::unit(5).unwrap();
        // |4 * 0.5 - 2| = 0, so each factor is 1 / 2.
        let y = f.evaluate(&[0.5; 5]).unwrap();
        assert!((y - 0.5f64.powi(5)).abs() < 1e-15);
        // At x = 0 every factor is (2 + 1) / 2.
        let y = f.evaluate(&[0.0; 5]).unwrap();
        assert!((y - 1.5f64.powi(5)).abs() < 1e-12);
        assert_eq!(f.evaluations(), 2);
        assert_eq!(f.domain().bounds(), vec![(-5.0, 5.0); 5]);
    }

    #[test]
    fn gsobol_rejects_bad_coefficients() {
        assert!(GSobol::new(vec![]).is_err());
        assert!(GSobol::new(vec![1.0, -1.0]).is_err());
        assert!(GSobol::new(vec![f64::NAN]).is_err());
    }

    #[test]
    fn wrong_length_is_a_domain_mismatch() {
        let mut f = GSobol::unit(3).unwrap();
        assert!(matches!(f.evaluate(&[0.0; 2]), Err(BlError::DomainMismatch { .. })));
        assert!(matches!(Sphere::new(2).evaluate(&[0.0]), Err(BlError::DomainMismatch { .. })));
        assert!(matches!(Branin.evaluate(&[0.0; 3]), Err(BlError::DomainMismatch { .. })));
    }

    #[test]
    fn branin_minima() {
        for x in [[-PI, 12.275], [PI, 2.275], [9.42478, 2.475]] {
            let y = Branin.evaluate(&x).unwrap();
            assert!((y - Branin::MINIMUM).abs() < 1e-4, "{x:?} -> {y}");
        }
    }

    #[test]
    fn sphere_zero_at_origin() {
        let mut f = Sphere::new(3);
        assert_eq!(f.evaluate(&[0.0; 3]).unwrap(), 0.0);
        assert!((f.evaluate(&[1.0, -1.0, 0.5]).unwrap() - 2.25).abs() < 1e-15);
    }
}
