//! # bl-model
//!
//! Surrogate models for BayesLoop. Provides a Gaussian-process regressor that
//! implements [`bl_types::SurrogateModel`], including the predictive
//! gradients the acquisition functions differentiate through.

mod gaussian_process;
mod kernel;

pub use gaussian_process::{GaussianProcess, GpConfig, Hyperparameters};
pub use kernel::{Kernel, KernelType};
