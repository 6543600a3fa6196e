//! Fixed-effects estimators and sandwich covariances.
//!
//! - **HDFE solver**: entity/time (or any factor) absorption by alternating
//!   projections, optionally weighted.
//! - **Panel within estimator** with `df_resid = n − k − rank(FE)`.
//! - **Absorbing least squares** that drops absorbed and collinear regressors.
//! - **FE-Poisson** pseudo-maximum-likelihood (IRLS).
//! - **Cluster-robust / HC1** covariance.

pub mod absorbing;
pub mod cluster;
pub mod hdfe;
pub mod panel;
pub mod poisson;

pub use absorbing::absorbing_fit;
pub use cluster::{ClusterCorrection, cluster_covariance, hc1_covariance};
pub use hdfe::FixedEffectsSolver;
pub use panel::{PanelOptions, panel_fe_fit};
pub use poisson::{PoissonOptions, fe_poisson_fit};
