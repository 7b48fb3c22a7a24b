//! Box-constrained L-BFGS with gradient projection.
//!
//! Minimizes a smooth function over a box. Every iterate, including line-search
//! trials, is projected onto the bounds before it is evaluated.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use bl_types::BlResult;

/// Tuning knobs for [`minimize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbfgsConfig {
    /// Number of (s, y) correction pairs kept.
    pub memory: usize,
    pub max_iterations: usize,
    /// Stop when the projected gradient's max-norm falls below this.
    pub gradient_tolerance: f64,
    /// Stop when the relative decrease of the objective falls below this.
    pub function_tolerance: f64,
    pub max_line_search_steps: usize,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            memory: 10,
            max_iterations: 200,
            gradient_tolerance: 1e-8,
            function_tolerance: 1e-12,
            max_line_search_steps: 30,
        }
    }
}

/// Outcome of one local search.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMinimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const ARMIJO_C1: f64 = 1e-4;
const CURVATURE_EPS: f64 = 1e-10;

/// Minimize `f` (returning value and gradient) from `x0` inside `bounds`.
///
/// Non-finite evaluations end the search at the last finite iterate.
pub fn minimize<F>(
    mut f: F,
    x0: &[f64],
    bounds: &[(f64, f64)],
    config: &LbfgsConfig,
) -> BlResult<LocalMinimum>
where
    F: FnMut(&[f64]) -> BlResult<(f64, Vec<f64>)>,
{
    let mut x = project(x0, bounds);
    let (mut fx, mut g) = f(&x)?;
    if !fx.is_finite() || g.iter().any(|v| !v.is_finite()) {
        return Ok(LocalMinimum {
            x,
            value: fx,
            iterations: 0,
            converged: false,
        });
    }

    let mut history: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::with_capacity(config.memory);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        if projected_gradient_norm(&x, &g, bounds) < config.gradient_tolerance {
            converged = true;
            break;
        }

        let mut direction = two_loop(&g, &history);
        freeze_active(&x, &mut direction, bounds);
        let mut slope = dot(&g, &direction);
        if slope >= 0.0 {
            // Curvature pairs produced an ascent direction; restart from steepest descent.
            history.clear();
            direction = g.iter().map(|v| -v).collect();
            freeze_active(&x, &mut direction, bounds);
            slope = dot(&g, &direction);
            if slope >= 0.0 {
                converged = true;
                break;
            }
        }

        let mut step = if history.is_empty() {
            1.0 / norm(&direction).max(1.0)
        } else {
            1.0
        };

        let mut accepted = None;
        for _ in 0..config.max_line_search_steps {
            let trial: Vec<f64> = x
                .iter()
                .zip(&direction)
                .map(|(xi, di)| xi + step * di)
                .collect();
            let trial = project(&trial, bounds);
            let (f_trial, g_trial) = f(&trial)?;
            let moved: Vec<f64> = trial.iter().zip(&x).map(|(a, b)| a - b).collect();
            if f_trial.is_finite()
                && g_trial.iter().all(|v| v.is_finite())
                && f_trial <= fx + ARMIJO_C1 * dot(&g, &moved)
            {
                accepted = Some((trial, f_trial, g_trial, moved));
                break;
            }
            step *= 0.5;
        }

        let Some((x_new, f_new, g_new, s)) = accepted else {
            break;
        };
        iterations += 1;

        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        if sy > CURVATURE_EPS {
            if history.len() == config.memory {
                history.pop_front();
            }
            history.push_back((s, y, 1.0 / sy));
        }

        let decrease = fx - f_new;
        x = x_new;
        fx = f_new;
        g = g_new;

        if decrease.abs() <= config.function_tolerance * fx.abs().max(1.0) {
            converged = true;
            break;
        }
    }

    Ok(LocalMinimum {
        x,
        value: fx,
        iterations,
        converged,
    })
}

/// Clamp each coordinate into its bounds.
pub fn project(x: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    x.iter()
        .zip(bounds)
        .map(|(v, (low, high))| v.clamp(*low, *high))
        .collect()
}

fn projected_gradient_norm(x: &[f64], g: &[f64], bounds: &[(f64, f64)]) -> f64 {
    x.iter()
        .zip(g)
        .zip(bounds)
        .map(|((xi, gi), (low, high))| {
            if (*xi <= *low && *gi > 0.0) || (*xi >= *high && *gi < 0.0) {
                0.0
            } else {
                gi.abs()
            }
        })
        .fold(0.0, f64::max)
}

/// Zero direction components that would leave the box at an active bound.
fn freeze_active(x: &[f64], direction: &mut [f64], bounds: &[(f64, f64)]) {
    for ((d, xi), (low, high)) in direction.iter_mut().zip(x).zip(bounds) {
        if (*xi <= *low && *d < 0.0) || (*xi >= *high && *d > 0.0) {
            *d = 0.0;
        }
    }
}

/// L-BFGS two-loop recursion: returns -H g.
fn two_loop(g: &[f64], history: &VecDeque<(Vec<f64>, Vec<f64>, f64)>) -> Vec<f64> {
    let mut q = g.to_vec();
    if history.is_empty() {
        return q.into_iter().map(|v| -v).collect();
    }

    let mut alpha = vec![0.0; history.len()];
    for (i, (s, y, rho)) in history.iter().enumerate().rev() {
        alpha[i] = rho * dot(s, &q);
        for (qj, yj) in q.iter_mut().zip(y) {
            *qj -= alpha[i] * yj;
        }
    }

    if let Some((s, y, _)) = history.back() {
        let gamma = dot(s, y) / dot(y, y);
        for qj in q.iter_mut() {
            *qj *= gamma;
        }
    }

    for (i, (s, y, rho)) in history.iter().enumerate() {
        let beta = rho * dot(y, &q);
        for (qj, sj) in q.iter_mut().zip(s) {
            *qj += (alpha[i] - beta) * sj;
        }
    }

    q.into_iter().map(|v| -v).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(p, q)| p * q).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
