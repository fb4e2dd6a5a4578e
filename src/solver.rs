use crate::criterion::{CriterionKind, criterion_value};
use crate::types::{PenaltyLoadings, SolverOptions};
use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

/// Failure of the convex-subproblem solver.
///
/// Surfaced as `RlassoError::SolverFailure`; the solver never hands back a
/// partially converged or non-finite coefficient vector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error(
        "coordinate descent did not converge within {sweeps} sweeps (last max coefficient change {last_change:.3e})"
    )]
    DidNotConverge { sweeps: usize, last_change: f64 },
    #[error("coefficients became non-finite during coordinate descent")]
    NonFiniteIterate,
}

#[inline]
fn soft_threshold(z: f64, threshold: f64) -> f64 {
    if z > threshold {
        z - threshold
    } else if z < -threshold {
        z + threshold
    } else {
        0.0
    }
}

/// Minimize the penalized criterion over β by cyclic coordinate descent.
///
/// Per coordinate, with a = xⱼᵀxⱼ, s = xⱼᵀ(r + xⱼβⱼ) and w = λψⱼ:
///
/// - Quadratic loss admits the classical soft-threshold update
///   βⱼ ← S(s, w/2) / a.
/// - SqrtLoss admits a closed-form update from the stationarity condition of
///   ‖y − Xβ‖₂/√n: with q₀ = ‖r + xⱼβⱼ‖², βⱼ is zero when
///   |s| ≤ w·√(q₀/n), and otherwise
///   βⱼ ← sign(s)·(|s| − w·√((a·q₀ − s²)/(n·a − w²)))/a.
///
/// A warm start from the previous outer iteration is accepted; the optimum of
/// the convex problem does not depend on it.
pub fn solve_penalized(
    kind: CriterionKind,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    lambda: f64,
    psi: &PenaltyLoadings,
    warm_start: Option<ArrayView1<'_, f64>>,
    opts: &SolverOptions,
) -> Result<Array1<f64>, SolverError> {
    let (n, p) = x.dim();
    let nf = n as f64;

    let col_sq: Array1<f64> = (0..p)
        .map(|j| x.column(j).iter().map(|&v| v * v).sum())
        .collect();

    let mut beta = match warm_start {
        Some(start) => start.to_owned(),
        None => Array1::<f64>::zeros(p),
    };
    let mut resid = y.to_owned();
    resid -= &x.dot(&beta);

    let mut last_change = f64::INFINITY;
    for sweep in 1..=opts.max_sweeps {
        let mut max_delta = 0.0_f64;
        for j in 0..p {
            let a = col_sq[j];
            if a <= 0.0 {
                // All-zero column: the loss is flat in this coordinate.
                beta[j] = 0.0;
                continue;
            }
            let beta_old = beta[j];
            let xr: f64 = x
                .column(j)
                .iter()
                .zip(resid.iter())
                .map(|(&v, &e)| v * e)
                .sum();
            let s = xr + a * beta_old;
            let w = lambda * psi[j];

            let beta_new = match kind {
                CriterionKind::Quadratic => soft_threshold(s, 0.5 * w) / a,
                CriterionKind::SqrtLoss => {
                    let resid_sq: f64 = resid.iter().map(|&e| e * e).sum();
                    // ‖y − X₋ⱼβ₋ⱼ‖²; cancellation can push it barely negative.
                    let q0 = (resid_sq + 2.0 * beta_old * xr + beta_old * beta_old * a).max(0.0);
                    let denom = nf * a - w * w;
                    if s.abs() <= w * (q0 / nf).sqrt() || denom <= 0.0 {
                        0.0
                    } else {
                        let shrink = w * (((a * q0 - s * s).max(0.0)) / denom).sqrt();
                        let magnitude = s.abs() - shrink;
                        if magnitude > 0.0 {
                            s.signum() * magnitude / a
                        } else {
                            0.0
                        }
                    }
                }
            };

            let delta = beta_new - beta_old;
            if delta != 0.0 {
                beta[j] = beta_new;
                let col = x.column(j);
                for (ri, &v) in resid.iter_mut().zip(col.iter()) {
                    *ri -= v * delta;
                }
                max_delta = max_delta.max(delta.abs());
            }
        }

        if !max_delta.is_finite() || beta.iter().any(|b| !b.is_finite()) {
            return Err(SolverError::NonFiniteIterate);
        }
        if max_delta <= opts.tol {
            log::trace!(
                "coordinate descent converged after {sweep} sweeps, objective {:.6e}",
                criterion_value(kind, x, y, beta.view(), lambda, psi)
            );
            return Ok(beta);
        }
        last_change = max_delta;
    }

    log::warn!(
        "coordinate descent stopped at the sweep cap ({}), last max change {last_change:.3e}",
        opts.max_sweeps
    );
    Err(SolverError::DidNotConverge {
        sweeps: opts.max_sweeps,
        last_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn default_opts() -> SolverOptions {
        SolverOptions::default()
    }

    #[test]
    fn single_column_quadratic_matches_soft_threshold() {
        let x = array![[1.0], [2.0], [-1.0]];
        let y = array![2.0, 3.5, -1.0];
        let psi = PenaltyLoadings::ones(1);
        let lambda = 3.0;

        let beta = solve_penalized(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            lambda,
            &psi,
            None,
            &default_opts(),
        )
        .expect("solve");

        // a = 6, s = x'y = 10; beta = S(10, 1.5) / 6
        assert_abs_diff_eq!(beta[0], 8.5 / 6.0, epsilon = 1e-10);
    }

    #[test]
    fn zero_penalty_recovers_ols_on_orthogonal_design() {
        let x = array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, -1.0]];
        let y = array![2.0, 4.0, 1.0, 3.0];
        let psi = PenaltyLoadings::ones(2);

        let beta = solve_penalized(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            0.0,
            &psi,
            None,
            &default_opts(),
        )
        .expect("solve");

        // Orthogonal columns: coordinate-wise OLS, (x_j'y)/(x_j'x_j).
        assert_abs_diff_eq!(beta[0], 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(beta[1], -1.0, epsilon = 1e-10);
    }

    #[test]
    fn overwhelming_penalty_zeroes_everything() {
        let x = array![[1.0, -0.5], [0.5, 1.5], [-1.0, 0.3]];
        let y = array![1.0, 2.0, -0.5];
        let psi = PenaltyLoadings::ones(2);

        for kind in [CriterionKind::Quadratic, CriterionKind::SqrtLoss] {
            let beta = solve_penalized(
                kind,
                x.view(),
                y.view(),
                1e6,
                &psi,
                None,
                &default_opts(),
            )
            .expect("solve");
            assert!(beta.iter().all(|&b| b == 0.0));
        }
    }

    #[test]
    fn sqrt_solution_is_a_criterion_minimum() {
        let x = array![
            [1.0, 0.2],
            [0.8, -0.4],
            [-0.3, 1.1],
            [0.1, 0.9],
            [-1.2, 0.5],
        ];
        let y = array![1.4, 0.9, 0.2, 0.7, -1.0];
        let psi = PenaltyLoadings::new(array![0.9, 1.2]);
        let lambda = 1.5;

        let beta = solve_penalized(
            CriterionKind::SqrtLoss,
            x.view(),
            y.view(),
            lambda,
            &psi,
            None,
            &default_opts(),
        )
        .expect("solve");

        let at_optimum =
            criterion_value(CriterionKind::SqrtLoss, x.view(), y.view(), beta.view(), lambda, &psi);
        for j in 0..2 {
            for step in [-1e-3, 1e-3, -0.1, 0.1] {
                let mut perturbed = beta.clone();
                perturbed[j] += step;
                let nearby = criterion_value(
                    CriterionKind::SqrtLoss,
                    x.view(),
                    y.view(),
                    perturbed.view(),
                    lambda,
                    &psi,
                );
                assert!(
                    nearby + 1e-12 >= at_optimum,
                    "perturbation ({j}, {step}) improved the objective: {nearby} < {at_optimum}"
                );
            }
        }
    }

    #[test]
    fn warm_start_reaches_the_same_optimum() {
        let x = array![[1.0, 0.3], [0.5, -0.8], [-0.7, 0.6], [0.2, 1.4]];
        let y = array![0.9, -0.2, 0.4, 1.1];
        let psi = PenaltyLoadings::ones(2);
        let lambda = 0.8;

        let cold = solve_penalized(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            lambda,
            &psi,
            None,
            &default_opts(),
        )
        .expect("cold solve");
        let start = array![5.0, -5.0];
        let warm = solve_penalized(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            lambda,
            &psi,
            Some(start.view()),
            &default_opts(),
        )
        .expect("warm solve");

        for j in 0..2 {
            assert_abs_diff_eq!(cold[j], warm[j], epsilon = 1e-7);
        }
    }

    #[test]
    fn sweep_cap_surfaces_as_failure() {
        let x = array![[1.0, 0.99], [0.99, 1.0], [0.5, 0.51]];
        let y = array![1.0, 1.1, 0.6];
        let psi = PenaltyLoadings::ones(2);
        let opts = SolverOptions {
            max_sweeps: 1,
            tol: 1e-14,
        };

        let err = solve_penalized(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            0.01,
            &psi,
            None,
            &opts,
        )
        .expect_err("one sweep cannot converge to 1e-14 on a correlated design");
        assert!(matches!(err, SolverError::DidNotConverge { sweeps: 1, .. }));
    }
}
