//! # cp-inference
//!
//! Regression runners and hypothesis tests for crimepanel.
//!
//! This crate provides:
//! - OLS with unadjusted, HC1 and cluster-robust covariance
//! - Huber M-estimation (IRLS)
//! - Panel within estimator with entity and/or time effects
//! - Absorbing least squares
//! - Poisson pseudo-maximum-likelihood with entity effects
//! - Welch and single-coefficient t-tests
//!
//! Every estimator is reached through [`fit`] with a serde-configurable
//! [`RegressionSpec`] and returns an immutable [`FittedModel`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Regression configuration and design-matrix construction.
pub mod design;
/// Fixed-effects estimators and sandwich covariances.
pub mod econometrics;
/// Welch and coefficient t-tests.
pub mod hypotest;
/// Least squares and OLS covariance flavours.
pub mod linear;
/// Fitted model type and inference helpers.
pub mod model;
/// Huber robust regression.
pub mod robust;
/// Dispatch from [`RegressionSpec`] to an estimator.
pub mod runner;

pub use design::{
    AbsorbCovariance, Condition, ConditionOp, Design, Estimator, EstimatorKind, PanelCluster,
    RegressionSpec, RowFilter,
};
pub use econometrics::ClusterCorrection;
pub use hypotest::{
    CoefficientTest, CoefficientTestResult, Divisor, WelchConfig, WelchResult, coefficient_test,
    welch_test,
};
pub use model::{Coefficient, CovarianceKind, FittedModel, INTERCEPT, Inference};
pub use runner::fit;
