use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Covariance assumption driving the penalty loadings and the penalty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceType {
    /// Homoscedastic errors; loadings depend on the design alone.
    Nonrobust,
    /// Heteroscedasticity-robust loadings recomputed from current residuals.
    Robust,
    /// Cluster-robust covariance. Every use fails eagerly; see `RlassoError`.
    Cluster,
}

/// Configuration of the convex-subproblem coordinate-descent solver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Full coordinate sweeps before the solve is declared failed.
    pub max_sweeps: usize,
    /// Sweep-to-sweep maximum coefficient change declaring convergence.
    pub tol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_sweeps: 10_000,
            tol: 1e-8,
        }
    }
}

/// Estimator configuration.
///
/// The defaults reproduce the canonical rigorous-lasso setup: post-lasso
/// refit on the selected support, standard (squared-loss) criterion,
/// homoscedastic penalty loadings, and the analytic x-independent penalty
/// level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlassoOptions {
    /// Refit OLS on the selected support after the iteration loop.
    pub post: bool,
    /// Use the square-root (pivotal) criterion instead of squared loss.
    pub sqrt: bool,
    /// Center the design and response; the intercept is recovered after fit.
    pub fit_intercept: bool,
    pub cov_type: CovarianceType,
    /// Calibrate the penalty level by simulation conditional on the design.
    pub x_dependent: bool,
    /// Number of most-correlated features used by the pilot OLS fit.
    pub n_corr: usize,
    /// Cap on penalty-recalibration iterations.
    pub max_iter: usize,
    /// Monte-Carlo draws for the x-dependent penalty level.
    pub n_sim: usize,
    /// Penalty slack multiplier.
    pub c: f64,
    /// Significance level; derived from the sample size when unset.
    pub gamma: Option<f64>,
    /// Coefficients below this magnitude are set to exactly zero.
    pub zero_tol: f64,
    /// Stabilization tolerance for the penalty level / loadings.
    pub convergence_tol: f64,
    /// Seed for the Monte-Carlo penalty simulation; fresh entropy when unset.
    pub random_state: Option<u64>,
    pub solver: SolverOptions,
}

impl Default for RlassoOptions {
    fn default() -> Self {
        Self {
            post: true,
            sqrt: false,
            fit_intercept: true,
            cov_type: CovarianceType::Nonrobust,
            x_dependent: false,
            n_corr: 5,
            max_iter: 2,
            n_sim: 5000,
            c: 1.1,
            gamma: None,
            zero_tol: 1e-4,
            convergence_tol: 1e-4,
            random_state: None,
            solver: SolverOptions::default(),
        }
    }
}

/// Per-feature penalty loadings: the diagonal of the p×p scaling matrix Ψ.
///
/// Invariant: entries are non-negative.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct PenaltyLoadings(pub Array1<f64>);

impl PenaltyLoadings {
    pub fn new(diag: Array1<f64>) -> Self {
        Self(diag)
    }

    pub fn ones(len: usize) -> Self {
        Self(Array1::ones(len))
    }

    /// Densify into the full diagonal matrix; off-diagonals are exactly zero.
    pub fn to_matrix(&self) -> Array2<f64> {
        Array2::from_diag(&self.0)
    }

    /// Largest elementwise difference against another set of loadings.
    pub fn max_abs_difference(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()))
    }
}

impl Deref for PenaltyLoadings {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PenaltyLoadings {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<Array1<f64>> for PenaltyLoadings {
    fn as_ref(&self) -> &Array1<f64> {
        &self.0
    }
}

impl From<Array1<f64>> for PenaltyLoadings {
    fn from(diag: Array1<f64>) -> Self {
        Self(diag)
    }
}

impl From<PenaltyLoadings> for Array1<f64> {
    fn from(loadings: PenaltyLoadings) -> Self {
        loadings.0
    }
}

/// Immutable snapshot of a completed fit.
#[derive(Clone, Debug)]
pub struct FitResult {
    /// Fitted coefficients; entries outside the selected support are exactly zero.
    pub beta: Array1<f64>,
    /// Final penalty level.
    pub lambda: f64,
    /// Final penalty loadings.
    pub loadings: PenaltyLoadings,
    /// Penalty-recalibration iterations actually performed.
    pub iterations: usize,
    /// Intercept on the original (uncentered) scale; zero when not requested.
    pub intercept: f64,
}
