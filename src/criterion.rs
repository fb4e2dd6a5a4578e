use crate::types::PenaltyLoadings;
use ndarray::{ArrayView1, ArrayView2};

/// Loss shape of the penalized convex subproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionKind {
    /// Mean squared residual: ‖y − Xβ‖² / n.
    Quadratic,
    /// Root-mean-square residual: ‖y − Xβ‖₂ / √n. The un-squared loss makes
    /// the optimal penalty level invariant to the noise scale.
    SqrtLoss,
}

/// Evaluate the penalized criterion at `beta`.
///
/// Both variants share the weighted L1 term (λ/n)·‖Ψβ‖₁ and differ only in
/// the loss.
pub fn criterion_value(
    kind: CriterionKind,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    beta: ArrayView1<'_, f64>,
    lambda: f64,
    psi: &PenaltyLoadings,
) -> f64 {
    let n = x.nrows() as f64;
    let fitted = x.dot(&beta);
    let rss: f64 = y
        .iter()
        .zip(fitted.iter())
        .map(|(&yi, &fi)| (yi - fi) * (yi - fi))
        .sum();
    let loss = match kind {
        CriterionKind::Quadratic => rss / n,
        CriterionKind::SqrtLoss => rss.sqrt() / n.sqrt(),
    };
    let l1: f64 = beta
        .iter()
        .zip(psi.iter())
        .map(|(&b, &w)| (w * b).abs())
        .sum();
    loss + lambda / n * l1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn quadratic_criterion_matches_hand_computation() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let y = array![1.0, 2.0, 2.0];
        let beta = array![0.5, 1.0];
        let psi = PenaltyLoadings::new(array![2.0, 0.5]);

        // residuals: (0.5, 1.0, 0.5), rss = 1.5; penalty: (6/3)*(|2*0.5| + |0.5*1|) = 3.0
        let value = criterion_value(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            beta.view(),
            6.0,
            &psi,
        );
        assert_abs_diff_eq!(value, 1.5 / 3.0 + 3.0, epsilon = 1e-12);
    }

    #[test]
    fn sqrt_criterion_uses_unsquared_loss() {
        let x = array![[1.0], [1.0]];
        let y = array![3.0, 1.0];
        let beta = array![0.0];
        let psi = PenaltyLoadings::ones(1);

        // ||y||_2 / sqrt(2) = sqrt(10)/sqrt(2)
        let value = criterion_value(
            CriterionKind::SqrtLoss,
            x.view(),
            y.view(),
            beta.view(),
            0.0,
            &psi,
        );
        assert_abs_diff_eq!(value, (10.0_f64 / 2.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn zero_penalty_reduces_to_pure_loss() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = array![1.0, -1.0];
        let beta = array![0.3, -0.7];
        let psi = PenaltyLoadings::new(array![10.0, 10.0]);

        let with_penalty = criterion_value(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            beta.view(),
            0.0,
            &psi,
        );
        let loadings_free = criterion_value(
            CriterionKind::Quadratic,
            x.view(),
            y.view(),
            beta.view(),
            0.0,
            &PenaltyLoadings::ones(2),
        );
        assert_abs_diff_eq!(with_penalty, loadings_free, epsilon = 1e-12);
    }
}
