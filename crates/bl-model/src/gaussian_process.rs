//! Gaussian Process surrogate for Bayesian optimization
//!
//! GP regression with output normalization, jittered Cholesky factorization,
//! grid-based marginal-likelihood hyperparameter selection and analytic
//! predictive gradients.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bl_types::{BlError, BlResult, Dataset, SurrogateModel};

use crate::kernel::{squared_distance, Kernel, KernelType};

const LN_2PI: f64 = 1.837_877_066_409_345_5;
/// Noise used when the objective is declared noise-free.
const EXACT_NOISE: f64 = 1e-8;
const NOISE_GRID: [f64; 4] = [1e-6, 1e-4, 1e-2, 1e-1];
const MAX_JITTER_TRIES: usize = 5;

/// Settings for [`GaussianProcess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpConfig {
    pub kernel: KernelType,
    /// Standardize outputs before fitting.
    pub normalize_y: bool,
    /// Treat observations as noise-free.
    pub exact_feval: bool,
    /// Number of lengthscale candidates tried per fit.
    pub lengthscale_grid: usize,
}

impl Default for GpConfig {
    fn default() -> Self {
        Self {
            kernel: KernelType::Matern52,
            normalize_y: true,
            exact_feval: false,
            lengthscale_grid: 13,
        }
    }
}

/// Selected hyperparameters of a fitted GP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparameters {
    pub lengthscale: f64,
    pub signal_variance: f64,
    pub noise: f64,
    pub log_marginal_likelihood: f64,
}

#[derive(Debug, Clone)]
struct Fitted {
    kernel: Kernel,
    noise: f64,
    x_train: Array2<f64>,
    /// Cholesky factor of K + noise*I
    l_chol: Array2<f64>,
    /// Alpha = K^-1 y
    alpha: Array1<f64>,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

/// Gaussian Process model for regression
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    config: GpConfig,
    fitted: Option<Fitted>,
}

impl GaussianProcess {
    pub fn new(config: GpConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn config(&self) -> &GpConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn hyperparameters(&self) -> Option<Hyperparameters> {
        self.fitted.as_ref().map(|f| Hyperparameters {
            lengthscale: f.kernel.lengthscale,
            signal_variance: f.kernel.variance,
            noise: f.noise,
            log_marginal_likelihood: f.log_marginal_likelihood,
        })
    }

    /// Fit on raw arrays. `x` is n x d, `y` has length n.
    pub fn fit_arrays(&mut self, x: Array2<f64>, y: &Array1<f64>) -> BlResult<()> {
        let n = y.len();
        if n == 0 || x.nrows() != n {
            return Err(BlError::model_fit(format!(
                "need matching non-empty inputs, got {} rows and {n} targets",
                x.nrows()
            )));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(BlError::model_fit("training data contains non-finite values"));
        }

        let (y_mean, y_std) = if self.config.normalize_y {
            let mean = y.sum() / n as f64;
            let var = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
            let std = var.sqrt();
            (mean, if std < 1e-10 { 1.0 } else { std })
        } else {
            (0.0, 1.0)
        };
        let y_norm: Array1<f64> = y.mapv(|v| (v - y_mean) / y_std);

        let signal_variance = if self.config.normalize_y {
            1.0
        } else {
            (y_norm.iter().map(|v| v * v).sum::<f64>() / n as f64).max(1e-6)
        };

        let scale = median_pairwise_distance(&x);
        let noises: &[f64] = if self.config.exact_feval {
            &[EXACT_NOISE]
        } else {
            &NOISE_GRID
        };

        let mut best: Option<Fitted> = None;
        for lengthscale in lengthscale_candidates(scale, self.config.lengthscale_grid) {
            let kernel = Kernel::new(self.config.kernel, signal_variance, lengthscale);
            for &noise in noises {
                let Some((l_chol, alpha, lml)) = factorize(&kernel, noise, &x, &y_norm) else {
                    continue;
                };
                let better = best
                    .as_ref()
                    .map_or(true, |b| lml > b.log_marginal_likelihood);
                if better {
                    best = Some(Fitted {
                        kernel,
                        noise,
                        x_train: x.clone(),
                        l_chol,
                        alpha,
                        y_mean,
                        y_std,
                        log_marginal_likelihood: lml,
                    });
                }
            }
        }

        let fitted = best.ok_or_else(|| {
            BlError::model_fit("covariance is not positive definite for any hyperparameter candidate")
        })?;
        debug!(
            "GP fitted on {n} points: lengthscale={:.4}, noise={:.2e}, lml={:.4}",
            fitted.kernel.lengthscale, fitted.noise, fitted.log_marginal_likelihood
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    fn fitted(&self, x: &[f64]) -> BlResult<&Fitted> {
        let fitted = self.fitted.as_ref().ok_or(BlError::ModelNotFitted)?;
        if x.len() != fitted.x_train.ncols() {
            return Err(BlError::domain_mismatch(format!(
                "model expects {} columns, got {}",
                fitted.x_train.ncols(),
                x.len()
            )));
        }
        Ok(fitted)
    }
}

impl Default for GaussianProcess {
    fn default() -> Self {
        Self::new(GpConfig::default())
    }
}

impl SurrogateModel for GaussianProcess {
    fn fit(&mut self, dataset: &Dataset) -> BlResult<()> {
        let observations = dataset.observations();
        let d = observations.first().map(|o| o.x.len()).unwrap_or(0);
        if observations.iter().any(|o| o.x.len() != d) {
            return Err(BlError::domain_mismatch("observations have inconsistent lengths"));
        }
        let flat: Vec<f64> = observations.iter().flat_map(|o| o.x.iter().copied()).collect();
        let x = Array2::from_shape_vec((observations.len(), d), flat)
            .map_err(|e| BlError::model_fit(e.to_string()))?;
        let y: Array1<f64> = observations.iter().map(|o| o.y).collect();
        self.fit_arrays(x, &y)
    }

    fn predict(&self, x: &[f64]) -> BlResult<(f64, f64)> {
        let f = self.fitted(x)?;
        let k_star = cross_covariance(&f.kernel, x, &f.x_train);

        let mean = k_star.dot(&f.alpha) * f.y_std + f.y_mean;

        // var = k** - v^T v with L v = k*
        let v = solve_lower_triangular(&f.l_chol, &k_star);
        let var = (f.kernel.diagonal() - v.dot(&v)).max(0.0) * f.y_std * f.y_std;
        Ok((mean, var))
    }

    fn predict_gradients(&self, x: &[f64]) -> BlResult<(Vec<f64>, Vec<f64>)> {
        let f = self.fitted(x)?;
        let n = f.x_train.nrows();
        let d = x.len();

        let k_star = cross_covariance(&f.kernel, x, &f.x_train);
        // w = K^-1 k*
        let w = solve_cholesky(&f.l_chol, &k_star);

        let mut dmean = vec![0.0; d];
        let mut dvar = vec![0.0; d];
        let mut dk = vec![0.0; d];
        for i in 0..n {
            let xi = f.x_train.row(i).to_vec();
            f.kernel.gradient(x, &xi, &mut dk);
            for j in 0..d {
                dmean[j] += dk[j] * f.alpha[i];
                dvar[j] += dk[j] * w[i];
            }
        }
        let s2 = f.y_std * f.y_std;
        for j in 0..d {
            dmean[j] *= f.y_std;
            dvar[j] *= -2.0 * s2;
        }
        Ok((dmean, dvar))
    }

    fn name(&self) -> &str {
        "gaussian_process"
    }
}

/// Log-spaced lengthscale candidates spanning [scale/10, scale*10].
fn lengthscale_candidates(scale: f64, count: usize) -> Vec<f64> {
    let count = count.max(1);
    if count == 1 {
        return vec![scale];
    }
    (0..count)
        .map(|i| {
            let t = i as f64 / (count - 1) as f64;
            scale * 10f64.powf(-1.0 + 2.0 * t)
        })
        .collect()
}

fn median_pairwise_distance(x: &Array2<f64>) -> f64 {
    let n = x.nrows();
    let mut distances = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let a = x.row(i).to_vec();
            let b = x.row(j).to_vec();
            distances.push(squared_distance(&a, &b).sqrt());
        }
    }
    distances.retain(|d| *d > 0.0);
    if distances.is_empty() {
        return 1.0;
    }
    distances.sort_by(|a, b| a.total_cmp(b));
    distances[distances.len() / 2]
}

fn covariance(kernel: &Kernel, x: &Array2<f64>, noise: f64) -> Array2<f64> {
    let n = x.nrows();
    let rows: Vec<Vec<f64>> = (0..n).map(|i| x.row(i).to_vec()).collect();
    let mut k = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let v = kernel.value(&rows[i], &rows[j]);
            k[[i, j]] = v;
            k[[j, i]] = v;
        }
        k[[i, i]] += noise;
    }
    k
}

fn cross_covariance(kernel: &Kernel, x: &[f64], x_train: &Array2<f64>) -> Array1<f64> {
    (0..x_train.nrows())
        .map(|i| kernel.value(x, &x_train.row(i).to_vec()))
        .collect()
}

/// Cholesky-factor the noisy covariance and return (L, alpha, log marginal likelihood).
fn factorize(
    kernel: &Kernel,
    noise: f64,
    x: &Array2<f64>,
    y: &Array1<f64>,
) -> Option<(Array2<f64>, Array1<f64>, f64)> {
    let k = covariance(kernel, x, noise);
    let l = jittered_cholesky(k)?;
    let alpha = solve_cholesky(&l, y);
    let n = y.len() as f64;
    let log_det: f64 = l.diag().iter().map(|v| v.ln()).sum();
    let lml = -0.5 * y.dot(&alpha) - log_det - 0.5 * n * LN_2PI;
    lml.is_finite().then_some((l, alpha, lml))
}

/// Retry the factorization with growing diagonal jitter.
fn jittered_cholesky(mut k: Array2<f64>) -> Option<Array2<f64>> {
    if let Some(l) = cholesky(&k) {
        return Some(l);
    }
    let n = k.nrows();
    let mean_diag = k.diag().sum() / n as f64;
    let mut jitter = mean_diag * 1e-6;
    let mut added = 0.0;
    for _ in 0..MAX_JITTER_TRIES {
        for i in 0..n {
            k[[i, i]] += jitter - added;
        }
        added = jitter;
        if let Some(l) = cholesky(&k) {
            return Some(l);
        }
        jitter *= 10.0;
    }
    None
}

/// Cholesky decomposition; `None` when the matrix is not positive definite.
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve L x = b for lower triangular L
fn solve_lower_triangular(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve L L^T x = b
fn solve_cholesky(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let y = solve_lower_triangular(l, b);
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}
