pub mod criterion;
pub mod estimate;
pub mod faer_ndarray;
pub mod penalty;
pub mod probability;
pub mod solver;
pub mod types;

pub use criterion::{CriterionKind, criterion_value};
pub use estimate::{Rlasso, RlassoError, fit_rlasso};
pub use penalty::{effective_gamma, penalty_level, penalty_loadings};
pub use solver::{SolverError, solve_penalized};
pub use types::{CovarianceType, FitResult, PenaltyLoadings, RlassoOptions, SolverOptions};
