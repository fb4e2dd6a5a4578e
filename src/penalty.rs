use crate::estimate::RlassoError;
use crate::probability::{empirical_quantile, standard_normal_quantile};
use crate::types::{CovarianceType, PenaltyLoadings, RlassoOptions};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Effective significance level for one fit.
///
/// A user-supplied `gamma` always wins; otherwise the level is derived from
/// the sample size, 0.1/√n for the standard criterion and 0.1/ln n for the
/// square-root criterion. Pure: the shared configuration is never mutated.
pub fn effective_gamma(opts: &RlassoOptions, n: usize) -> f64 {
    match opts.gamma {
        Some(gamma) => gamma,
        None if opts.sqrt => 0.1 / (n as f64).ln(),
        None => 0.1 / (n as f64).sqrt(),
    }
}

/// Per-feature penalty loadings.
///
/// - nonrobust (either criterion): ψⱼ = √(meanᵢ xᵢⱼ²)
/// - robust, standard criterion:   ψⱼ = √(Σᵢ xᵢⱼ² eᵢ² / n)
/// - robust, sqrt criterion:       ψⱼ = max(√(Σᵢ xᵢⱼ² eᵢ² / n), √(Σᵢ xᵢⱼ² eᵢ² / Σᵢ eᵢ²))
///
/// The robust paths require residuals from the current iterate. Cluster-robust
/// loadings are not implemented and fail rather than fall back to another
/// covariance type.
pub fn penalty_loadings(
    x: ArrayView2<'_, f64>,
    resid: Option<ArrayView1<'_, f64>>,
    cov_type: CovarianceType,
    sqrt: bool,
) -> Result<PenaltyLoadings, RlassoError> {
    let (n, p) = x.dim();
    let nf = n as f64;

    match cov_type {
        CovarianceType::Nonrobust => {
            let mut diag = Array1::<f64>::zeros(p);
            for j in 0..p {
                let mean_sq = x.column(j).iter().map(|&v| v * v).sum::<f64>() / nf;
                diag[j] = mean_sq.sqrt();
            }
            Ok(PenaltyLoadings::new(diag))
        }
        CovarianceType::Robust => {
            let resid = resid.ok_or_else(|| {
                RlassoError::InvalidInput(
                    "heteroscedasticity-robust penalty loadings require residuals".to_string(),
                )
            })?;
            let mut diag = Array1::<f64>::zeros(p);
            if sqrt {
                let sum_sq_resid: f64 = resid.iter().map(|&e| e * e).sum();
                for j in 0..p {
                    let xe2: f64 = x
                        .column(j)
                        .iter()
                        .zip(resid.iter())
                        .map(|(&v, &e)| v * v * e * e)
                        .sum();
                    let per_sample = (xe2 / nf).sqrt();
                    let per_noise = if sum_sq_resid > 0.0 {
                        (xe2 / sum_sq_resid).sqrt()
                    } else {
                        0.0
                    };
                    diag[j] = per_sample.max(per_noise);
                }
            } else {
                for j in 0..p {
                    let xe2: f64 = x
                        .column(j)
                        .iter()
                        .zip(resid.iter())
                        .map(|(&v, &e)| v * v * e * e)
                        .sum();
                    diag[j] = (xe2 / nf).sqrt();
                }
            }
            Ok(PenaltyLoadings::new(diag))
        }
        CovarianceType::Cluster => Err(RlassoError::UnsupportedCovarianceType),
    }
}

/// Theoretically calibrated penalty level λ.
///
/// The x-independent levels are analytic in the normal quantile
/// Φ⁻¹(1 − γ/(2p)); the x-dependent nonrobust level is the (1−γ)-quantile of
/// the simulated sup-norm statistic. The robust levels carry no σ̂ factor,
/// and no σ̂ appears anywhere in the square-root variant.
pub fn penalty_level(
    n: usize,
    p: usize,
    sigma_hat: Option<f64>,
    design: Option<(ArrayView2<'_, f64>, &PenaltyLoadings)>,
    gamma: f64,
    opts: &RlassoOptions,
    rng: &mut StdRng,
) -> Result<f64, RlassoError> {
    let nf = n as f64;
    let tail = 1.0 - gamma / (2.0 * p as f64);

    if opts.sqrt {
        if opts.x_dependent {
            return Err(RlassoError::UnsupportedConfiguration(
                "x-dependent penalty level is not implemented for the square-root criterion"
                    .to_string(),
            ));
        }
        let quantile = standard_normal_quantile(tail).map_err(RlassoError::InvalidInput)?;
        return Ok(opts.c * nf.sqrt() * quantile);
    }

    match (opts.cov_type, opts.x_dependent) {
        (CovarianceType::Nonrobust, false) => {
            let sigma_hat = sigma_hat.ok_or_else(|| {
                RlassoError::InvalidInput(
                    "the homoscedastic penalty level requires sigma_hat".to_string(),
                )
            })?;
            let quantile = standard_normal_quantile(tail).map_err(RlassoError::InvalidInput)?;
            Ok(2.0 * opts.c * sigma_hat * nf.sqrt() * quantile)
        }
        (CovarianceType::Nonrobust, true) => {
            let sigma_hat = sigma_hat.ok_or_else(|| {
                RlassoError::InvalidInput(
                    "the homoscedastic penalty level requires sigma_hat".to_string(),
                )
            })?;
            let (x, psi) = design.ok_or_else(|| {
                RlassoError::InvalidInput(
                    "the x-dependent penalty level requires the design and loadings".to_string(),
                )
            })?;
            let sims = simulate_sup_norm(x, psi, opts.n_sim, rng);
            let quantile =
                empirical_quantile(&sims, 1.0 - gamma).map_err(RlassoError::InvalidInput)?;
            Ok(opts.c * sigma_hat * quantile)
        }
        (CovarianceType::Robust | CovarianceType::Cluster, false) => {
            let quantile = standard_normal_quantile(tail).map_err(RlassoError::InvalidInput)?;
            Ok(2.0 * opts.c * nf.sqrt() * quantile)
        }
        (CovarianceType::Robust | CovarianceType::Cluster, true) => {
            Err(RlassoError::UnsupportedConfiguration(
                "x-dependent penalty level is not implemented for robust covariance types"
                    .to_string(),
            ))
        }
    }
}

/// Simulated sup-norm of the Gaussian process indexed by features.
///
/// Each draw generates G ~ N(0,1)ⁿˣᵖ and scores
/// n · maxⱼ 2·|meanᵢ (XΨ)ᵢⱼ Gᵢⱼ|. Draws run in parallel with per-draw seeds
/// derived up front from the caller's RNG, so the result is identical for
/// any thread schedule. Both the max and the downstream quantile are
/// order-independent reductions.
fn simulate_sup_norm(
    x: ArrayView2<'_, f64>,
    psi: &PenaltyLoadings,
    n_sim: usize,
    rng: &mut StdRng,
) -> Vec<f64> {
    let (n, p) = x.dim();
    let nf = n as f64;

    let mut x_psi = x.to_owned();
    for (j, mut col) in x_psi.columns_mut().into_iter().enumerate() {
        col *= psi[j];
    }

    let seeds: Vec<u64> = (0..n_sim).map(|_| rng.random()).collect();
    seeds
        .into_par_iter()
        .map(|seed| {
            let mut draw_rng = StdRng::seed_from_u64(seed);
            let mut sup = 0.0_f64;
            for j in 0..p {
                let col = x_psi.column(j);
                let mut acc = 0.0_f64;
                for i in 0..n {
                    let g: f64 = draw_rng.sample(StandardNormal);
                    acc += col[i] * g;
                }
                sup = sup.max(2.0 * (acc / nf).abs());
            }
            nf * sup
        })
        .collect()
}
