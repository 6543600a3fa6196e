//! JSON artifacts for fitted models and test results.
//!
//! Artifacts are written with sorted metadata keys and no timestamps so the
//! same inputs always produce the same bytes.

use std::collections::BTreeMap;
use std::path::Path;

use cp_core::{Error, Result};
use cp_inference::{
    CoefficientTest, CoefficientTestResult, FittedModel, WelchConfig, WelchResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Schema tag of model artifacts.
pub const MODEL_SCHEMA: &str = "crimepanel_model_v0";
/// Schema tag of test-result artifacts.
pub const TEST_SCHEMA: &str = "crimepanel_test_v0";

const TOOL: &str = "crimepanel";

/// A fitted model plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Always [`MODEL_SCHEMA`].
    pub schema_version: String,
    /// Producing tool.
    pub tool: String,
    /// Producing tool version.
    pub version: String,
    /// Free-form metadata (task id, input file, ...).
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    /// The model.
    pub model: FittedModel,
}

impl ModelArtifact {
    /// Wrap `model` with the current tool version and empty metadata.
    pub fn new(model: FittedModel) -> Self {
        Self {
            schema_version: MODEL_SCHEMA.to_string(),
            tool: TOOL.to_string(),
            version: cp_core::VERSION.to_string(),
            meta: BTreeMap::new(),
            model,
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

/// Result of one hypothesis test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Welch two-sample test.
    Welch {
        /// Test configuration.
        config: WelchConfig,
        /// Result.
        result: WelchResult,
    },
    /// Coefficient test against a target value.
    Coefficient {
        /// Model the coefficient came from (artifact or task name).
        model: String,
        /// Test configuration.
        test: CoefficientTest,
        /// Result.
        result: CoefficientTestResult,
    },
}

/// A batch of test outcomes plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestArtifact {
    /// Always [`TEST_SCHEMA`].
    pub schema_version: String,
    /// Producing tool.
    pub tool: String,
    /// Producing tool version.
    pub version: String,
    /// Outcomes in the order they were run.
    pub outcomes: Vec<TestOutcome>,
}

impl TestArtifact {
    /// Wrap `outcomes` with the current tool version.
    pub fn new(outcomes: Vec<TestOutcome>) -> Self {
        Self {
            schema_version: TEST_SCHEMA.to_string(),
            tool: TOOL.to_string(),
            version: cp_core::VERSION.to_string(),
            outcomes,
        }
    }
}

/// Serialize `value` as pretty JSON to `path`, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    std::fs::write(path, bytes)?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

/// Deserialize JSON from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn check_schema(found: &str, expected: &str, path: &Path) -> Result<()> {
    if found != expected {
        return Err(Error::Unsupported(format!(
            "{}: schema_version '{}' (expected '{}')",
            path.display(),
            found,
            expected
        )));
    }
    Ok(())
}

/// Write a model artifact.
///
/// Coefficients, standard errors and covariance must be finite: JSON has no
/// NaN, so such an artifact could not be read back.
pub fn write_model(path: &Path, artifact: &ModelArtifact) -> Result<()> {
    let m = &artifact.model;
    let finite = m
        .coefficients
        .iter()
        .chain(&m.std_errors)
        .chain(m.covariance.iter().flatten())
        .all(|v| v.is_finite());
    if !finite {
        return Err(Error::Validation(format!(
            "{}: model '{}' has non-finite estimates",
            path.display(),
            m.estimator
        )));
    }
    write_json(path, artifact)
}

/// Read a model artifact, rejecting foreign schema versions.
pub fn read_model(path: &Path) -> Result<ModelArtifact> {
    let a: ModelArtifact = read_json(path)?;
    check_schema(&a.schema_version, MODEL_SCHEMA, path)?;
    Ok(a)
}

/// Write a test artifact.
pub fn write_tests(path: &Path, artifact: &TestArtifact) -> Result<()> {
    write_json(path, artifact)
}

/// Read a test artifact, rejecting foreign schema versions.
pub fn read_tests(path: &Path) -> Result<TestArtifact> {
    let a: TestArtifact = read_json(path)?;
    check_schema(&a.schema_version, TEST_SCHEMA, path)?;
    Ok(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_model;

    #[test]
    fn model_artifact_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("m1.json");
        let a = ModelArtifact::new(sample_model()).with_meta("task", "fit_monthly");
        write_model(&path, &a).unwrap();
        let back = read_model(&path).unwrap();
        assert_eq!(back, a);
        assert_eq!(back.meta["task"], serde_json::json!("fit_monthly"));
    }

    #[test]
    fn foreign_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut a = ModelArtifact::new(sample_model());
        a.schema_version = "other_v9".into();
        write_json(&path, &a).unwrap();
        assert!(matches!(read_model(&path), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_outcomes_are_tagged_by_kind() {
        let outcome = TestOutcome::Welch {
            config: WelchConfig {
                group_column: "code".into(),
                group_a: 1.0,
                group_b: 2.0,
                outcome: "total_thefts".into(),
                period_column: None,
                exclude_period: None,
            },
            result: WelchResult { t: 2.0, p_value: 0.2, df: 1.5, mean_a: 11.0, mean_b: 8.5, n_a: 2, n_b: 2 },
        };
        let v = serde_json::to_value(TestArtifact::new(vec![outcome])).unwrap();
        assert_eq!(v["schema_version"], TEST_SCHEMA);
        assert_eq!(v["outcomes"][0]["kind"], "welch");
        assert_eq!(v["outcomes"][0]["result"]["n_a"], 2);
    }

    #[test]
    fn non_finite_model_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut m = sample_model();
        m.std_errors[1] = f64::NAN;
        m.covariance[1][1] = f64::NAN;
        let err = write_model(&path, &ModelArtifact::new(m)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!path.exists());
    }
}
