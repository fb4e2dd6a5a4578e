use crate::criterion::CriterionKind;
use crate::faer_ndarray::{FaerCholesky, FaerLinalgError, Side};
use crate::penalty::{effective_gamma, penalty_level, penalty_loadings};
use crate::probability::pearson_correlation;
use crate::solver::{SolverError, solve_penalized};
use crate::types::{CovarianceType, FitResult, PenaltyLoadings, RlassoOptions};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

/// Errors surfaced by fitting and prediction.
#[derive(Error)]
pub enum RlassoError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model has not been fitted yet; call fit() before predict()")]
    NotFitted,

    #[error("Cluster-robust covariance is not implemented")]
    UnsupportedCovarianceType,

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Normal-equations matrix is singular or not positive definite: {0}")]
    SingularMatrix(FaerLinalgError),

    #[error("Convex subproblem solve failed: {0}")]
    SolverFailure(#[from] SolverError),
}

// Ensure Debug prints with actual line breaks by delegating to Display
impl core::fmt::Debug for RlassoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self)
    }
}

fn validate_inputs(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), RlassoError> {
    let (n, p) = x.dim();
    if n != y.len() {
        return Err(RlassoError::ShapeMismatch(format!(
            "design matrix has {n} rows but the response has {} entries",
            y.len()
        )));
    }
    if n == 0 || p == 0 {
        return Err(RlassoError::InvalidInput(
            "the design matrix must have at least one row and one column".to_string(),
        ));
    }
    if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
        return Err(RlassoError::InvalidInput(
            "the design matrix and response must be finite".to_string(),
        ));
    }
    Ok(())
}

/// Closed-form OLS through the normal equations.
fn ols(x: &Array2<f64>, y: ArrayView1<'_, f64>) -> Result<Array1<f64>, RlassoError> {
    let xtx = x.t().dot(x);
    let xty = x.t().dot(&y);
    let factor = xtx
        .cholesky(Side::Lower)
        .map_err(RlassoError::SingularMatrix)?;
    Ok(factor.solve_vec(&xty))
}

/// Residuals of a low-dimensional OLS pilot fit on the `n_corr` features most
/// correlated with the response. This supplies a residual estimate before any
/// penalized solution exists.
fn pilot_residuals(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    n_corr: usize,
) -> Result<Array1<f64>, RlassoError> {
    let (_, p) = x.dim();
    let k = n_corr.min(p).max(1);

    let corr: Vec<f64> = (0..p)
        .map(|j| pearson_correlation(x.column(j), y).abs())
        .collect();
    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| corr[a].total_cmp(&corr[b]));
    let top = &order[p - k..];

    let x_top = x.select(Axis(1), top);
    let beta_top = ols(&x_top, y)?;

    let mut resid = y.to_owned();
    resid -= &x_top.dot(&beta_top);
    Ok(resid)
}

fn hard_threshold(beta: &mut Array1<f64>, zero_tol: f64) {
    beta.mapv_inplace(|b| if b.abs() < zero_tol { 0.0 } else { b });
}

/// Post-lasso refinement: OLS restricted to the selected support. Coefficients
/// outside the support stay exactly zero; an empty support leaves β untouched.
fn post_ols(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    beta: &mut Array1<f64>,
) -> Result<(), RlassoError> {
    let support: Vec<usize> = beta
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b != 0.0)
        .map(|(j, _)| j)
        .collect();
    if support.is_empty() {
        return Ok(());
    }

    let x_sub = x.select(Axis(1), &support);
    let refit = ols(&x_sub, y)?;
    for (slot, &j) in support.iter().enumerate() {
        beta[j] = refit[slot];
    }
    Ok(())
}

fn residuals(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    beta: &Array1<f64>,
) -> Array1<f64> {
    let mut resid = y.to_owned();
    resid -= &x.dot(beta);
    resid
}

/// Core fixed-point iteration on (already centered) data.
///
/// Returns (β, λ, Ψ, iterations). The reported λ and Ψ are the values the
/// final solve actually used.
fn rlasso_path(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    opts: &RlassoOptions,
) -> Result<(Array1<f64>, f64, PenaltyLoadings, usize), RlassoError> {
    let (n, p) = x.dim();
    let gamma = effective_gamma(opts, n);
    let mut rng = StdRng::seed_from_u64(opts.random_state.unwrap_or_else(rand::random));
    let kind = if opts.sqrt {
        CriterionKind::SqrtLoss
    } else {
        CriterionKind::Quadratic
    };

    if opts.sqrt && opts.cov_type == CovarianceType::Nonrobust {
        // Loadings carry no residual dependence and the pivotal level needs no
        // noise estimate, so a single solve suffices.
        let psi = penalty_loadings(x, None, opts.cov_type, true)?;
        let lambda = penalty_level(n, p, None, None, gamma, opts, &mut rng)?;
        log::debug!("sqrt rlasso single solve: lambda={lambda:.6e}");
        let mut beta = solve_penalized(kind, x, y, lambda, &psi, None, &opts.solver)?;
        hard_threshold(&mut beta, opts.zero_tol);
        if opts.post {
            post_ols(x, y, &mut beta)?;
        }
        return Ok((beta, lambda, psi, 0));
    }

    let mut resid = pilot_residuals(x, y, opts.n_corr)?;
    let mut beta = Array1::<f64>::zeros(p);
    let mut iterations = 0usize;

    if !opts.sqrt && opts.cov_type == CovarianceType::Nonrobust {
        // Loadings are fixed by the design; iterate on the penalty level,
        // which tracks the shrinking residual scale.
        let psi = penalty_loadings(x, None, opts.cov_type, false)?;
        let mut lambda_prev = 0.0_f64;
        for _ in 0..opts.max_iter {
            let sigma_hat = (resid.iter().map(|&e| e * e).sum::<f64>() / n as f64).sqrt();
            let design = opts.x_dependent.then_some((x, &psi));
            let lambda = penalty_level(n, p, Some(sigma_hat), design, gamma, opts, &mut rng)?;
            log::debug!(
                "rlasso iteration {iterations}: sigma_hat={sigma_hat:.6e} lambda={lambda:.6e}"
            );
            if (lambda - lambda_prev).abs() <= opts.convergence_tol {
                break;
            }
            beta = solve_penalized(kind, x, y, lambda, &psi, Some(beta.view()), &opts.solver)?;
            hard_threshold(&mut beta, opts.zero_tol);
            resid = residuals(x, y, &beta);
            lambda_prev = lambda;
            iterations += 1;
        }
        let lambda = lambda_prev;
        if opts.post {
            post_ols(x, y, &mut beta)?;
        }
        Ok((beta, lambda, psi, iterations))
    } else {
        // Robust paths: the level is scale-free and fixed up front; iterate on
        // the residual-dependent loadings. The cluster type fails in the first
        // loadings call.
        let lambda = penalty_level(n, p, None, None, gamma, opts, &mut rng)?;
        let mut psi_prev = PenaltyLoadings::ones(p);
        for _ in 0..opts.max_iter {
            let psi = penalty_loadings(x, Some(resid.view()), opts.cov_type, opts.sqrt)?;
            let delta = psi.max_abs_difference(&psi_prev);
            log::debug!(
                "rlasso iteration {iterations}: lambda={lambda:.6e} max|dpsi|={delta:.6e}"
            );
            if delta <= opts.convergence_tol {
                break;
            }
            beta = solve_penalized(kind, x, y, lambda, &psi, Some(beta.view()), &opts.solver)?;
            hard_threshold(&mut beta, opts.zero_tol);
            resid = residuals(x, y, &beta);
            psi_prev = psi;
            iterations += 1;
        }
        let psi = psi_prev;
        if opts.post {
            post_ols(x, y, &mut beta)?;
        }
        Ok((beta, lambda, psi, iterations))
    }
}

/// Fit a rigorous-lasso model.
///
/// Validates the inputs, centers them when an intercept is requested, runs
/// the penalty-calibration iteration, and returns an immutable snapshot.
pub fn fit_rlasso(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    opts: &RlassoOptions,
) -> Result<FitResult, RlassoError> {
    validate_inputs(x, y)?;
    let (n, _) = x.dim();
    let nf = n as f64;

    if opts.fit_intercept {
        let col_means = x.sum_axis(Axis(0)) / nf;
        let y_mean = y.sum() / nf;
        let x_centered = x.to_owned() - &col_means;
        let y_centered = y.mapv(|v| v - y_mean);

        let (beta, lambda, loadings, iterations) =
            rlasso_path(x_centered.view(), y_centered.view(), opts)?;
        let intercept = y_mean - col_means.dot(&beta);
        Ok(FitResult {
            beta,
            lambda,
            loadings,
            iterations,
            intercept,
        })
    } else {
        let (beta, lambda, loadings, iterations) = rlasso_path(x, y, opts)?;
        Ok(FitResult {
            beta,
            lambda,
            loadings,
            iterations,
            intercept: 0.0,
        })
    }
}

/// Rigorous-lasso estimator with a fit/predict lifecycle.
///
/// All per-fit state lives in the returned `FitResult`; the estimator itself
/// only stores the configuration and the latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct Rlasso {
    options: RlassoOptions,
    fitted: Option<FitResult>,
}

impl Rlasso {
    pub fn new(options: RlassoOptions) -> Self {
        Self {
            options,
            fitted: None,
        }
    }

    pub fn options(&self) -> &RlassoOptions {
        &self.options
    }

    /// The snapshot of the most recent successful fit, if any.
    pub fn fit_result(&self) -> Option<&FitResult> {
        self.fitted.as_ref()
    }

    pub fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<&FitResult, RlassoError> {
        let result = fit_rlasso(x, y, &self.options)?;
        Ok(self.fitted.insert(result))
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, RlassoError> {
        let fitted = self.fitted.as_ref().ok_or(RlassoError::NotFitted)?;
        if x.ncols() != fitted.beta.len() {
            return Err(RlassoError::ShapeMismatch(format!(
                "design matrix has {} columns but the model has {} coefficients",
                x.ncols(),
                fitted.beta.len()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(RlassoError::InvalidInput(
                "the design matrix must be finite".to_string(),
            ));
        }

        let mut pred = x.dot(&fitted.beta);
        if self.options.fit_intercept {
            pred += fitted.intercept;
        }
        Ok(pred)
    }
}
