//! # cp-report
//!
//! Exporters for crimepanel results.
//!
//! - [`artifact`]: deterministic JSON for fitted models and test outcomes.
//! - [`latex`]: coefficient and model-comparison tables.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod latex;

pub use artifact::{
    MODEL_SCHEMA, ModelArtifact, TEST_SCHEMA, TestArtifact, TestOutcome, read_json, read_model,
    read_tests, write_json, write_model, write_tests,
};
pub use latex::{TableOptions, coefficient_table, comparison_table, escape};

#[cfg(test)]
pub(crate) mod tests {
    use cp_inference::{CovarianceKind, FittedModel, INTERCEPT, Inference};

    pub(crate) fn sample_model() -> FittedModel {
        FittedModel {
            estimator: "clustered_ols".into(),
            dependent: "total_thefts".into(),
            names: vec![INTERCEPT.into(), "post_inst".into()],
            coefficients: vec![1.0, -0.5],
            std_errors: vec![0.5, 0.25],
            covariance: vec![vec![0.25, 0.0], vec![0.0, 0.0625]],
            covariance_kind: CovarianceKind::Clustered { column: "block".into(), n_clusters: 10 },
            inference: Inference::StudentT,
            n_obs: 20,
            df_resid: 18.0,
            df_model: 1.0,
            r_squared: Some(0.5),
            dropped: Vec::new(),
            n_groups: None,
            iterations: None,
            converged: None,
            log_likelihood: None,
            scale: None,
        }
    }
}
