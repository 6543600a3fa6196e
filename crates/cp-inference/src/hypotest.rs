//! Two-sample and single-coefficient hypothesis tests.

use cp_core::{Error, Frame, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::ContinuousCDF;

use crate::model::{FittedModel, students_t};

/// Welch two-sample t-test configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelchConfig {
    /// Column identifying the two groups.
    pub group_column: String,
    /// Value of the first group.
    pub group_a: f64,
    /// Value of the second group.
    pub group_b: f64,
    /// Outcome compared between groups.
    pub outcome: String,
    /// Period column used by `exclude_period`.
    #[serde(default)]
    pub period_column: Option<String>,
    /// Rows in this period are left out.
    #[serde(default)]
    pub exclude_period: Option<f64>,
}

/// Welch test result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelchResult {
    /// t statistic (`mean_a − mean_b` over its standard error).
    pub t: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Welch–Satterthwaite degrees of freedom.
    pub df: f64,
    /// Mean of group a.
    pub mean_a: f64,
    /// Mean of group b.
    pub mean_b: f64,
    /// Observations in group a.
    pub n_a: usize,
    /// Observations in group b.
    pub n_b: usize,
}

fn mean_var(v: &[f64]) -> (f64, f64) {
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Welch's unequal-variance t-test between two groups of rows.
pub fn welch_test(frame: &Frame, cfg: &WelchConfig) -> Result<WelchResult> {
    let group = frame.floats(&cfg.group_column)?;
    let outcome = frame.floats(&cfg.outcome)?;
    let period = match (&cfg.period_column, cfg.exclude_period) {
        (Some(c), Some(_)) => Some(frame.floats(c)?),
        (None, Some(_)) => {
            return Err(Error::Validation("exclude_period needs period_column".into()));
        }
        _ => None,
    };

    let mut a = Vec::new();
    let mut b = Vec::new();
    for i in 0..frame.n_rows() {
        if let (Some(p), Some(ex)) = (period, cfg.exclude_period)
            && p[i] == ex
        {
            continue;
        }
        let y = outcome[i];
        if y.is_nan() {
            continue;
        }
        if group[i] == cfg.group_a {
            a.push(y);
        } else if group[i] == cfg.group_b {
            b.push(y);
        }
    }
    if a.len() < 2 || b.len() < 2 {
        return Err(Error::Validation(format!(
            "welch test needs at least 2 observations per group, got {} and {}",
            a.len(),
            b.len()
        )));
    }

    let (mean_a, var_a) = mean_var(&a);
    let (mean_b, var_b) = mean_var(&b);
    let sa = var_a / a.len() as f64;
    let sb = var_b / b.len() as f64;
    let se = (sa + sb).sqrt();
    if se == 0.0 {
        return Err(Error::Computation("welch test: both groups have zero variance".into()));
    }
    let t = (mean_a - mean_b) / se;
    let df = (sa + sb).powi(2) / (sa * sa / (a.len() as f64 - 1.0) + sb * sb / (b.len() as f64 - 1.0));
    let p_value = (2.0 * students_t(df)?.sf(t.abs())).min(1.0);
    log::debug!("welch: t={:.4} df={:.3} p={:.4}", t, df, p_value);

    Ok(WelchResult { t, p_value, df, mean_a, mean_b, n_a: a.len(), n_b: b.len() })
}

/// Rescaling applied to a coefficient before testing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Divisor {
    /// A fixed number.
    Constant(f64),
    /// The estimate of another coefficient of the same model.
    Coefficient(String),
}

fn default_alpha() -> f64 {
    0.05
}

/// Test `H0: coefficient / divisor == target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTest {
    /// Coefficient name.
    pub coefficient: String,
    /// Hypothesized value.
    pub target: f64,
    /// Optional rescaling of estimate and standard error.
    #[serde(default)]
    pub divisor: Option<Divisor>,
    /// Significance level.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

/// Result of a [`CoefficientTest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTestResult {
    /// Coefficient name.
    pub coefficient: String,
    /// (Rescaled) estimate.
    pub estimate: f64,
    /// (Rescaled) standard error.
    pub std_error: f64,
    /// Hypothesized value.
    pub target: f64,
    /// `(estimate − target) / std_error`.
    pub t: f64,
    /// Degrees of freedom of the reference distribution.
    pub df: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Significance level.
    pub alpha: f64,
    /// `p_value < alpha`.
    pub significant: bool,
}

/// Two-sided test of one coefficient against a target value.
pub fn coefficient_test(model: &FittedModel, test: &CoefficientTest) -> Result<CoefficientTestResult> {
    if !(test.alpha > 0.0 && test.alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", test.alpha)));
    }
    let c = model.coefficient(&test.coefficient)?;
    let divisor = match &test.divisor {
        None => 1.0,
        Some(Divisor::Constant(d)) => *d,
        Some(Divisor::Coefficient(name)) => model.coefficient(name)?.estimate,
    };
    if divisor == 0.0 || !divisor.is_finite() {
        return Err(Error::Validation(format!("divisor must be finite and non-zero, got {}", divisor)));
    }
    let estimate = c.estimate / divisor;
    let std_error = c.std_error / divisor.abs();
    let t = (estimate - test.target) / std_error;
    let p_value = model.two_sided_p(t)?;
    Ok(CoefficientTestResult {
        coefficient: test.coefficient.clone(),
        estimate,
        std_error,
        target: test.target,
        t,
        df: model.df_resid,
        p_value,
        alpha: test.alpha,
        significant: p_value < test.alpha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Inference, toy_model};
    use approx::assert_relative_eq;
    use cp_core::Column;

    fn welch_frame() -> Frame {
        Frame::from_columns(vec![
            ("code", Column::Float(vec![1.0, 1.0, 2.0, 2.0])),
            ("month", Column::Float(vec![1.0, 2.0, 1.0, 2.0])),
            ("total_thefts", Column::Float(vec![10.0, 12.0, 8.0, 9.0])),
        ])
        .unwrap()
    }

    fn welch_cfg() -> WelchConfig {
        WelchConfig {
            group_column: "code".into(),
            group_a: 1.0,
            group_b: 2.0,
            outcome: "total_thefts".into(),
            period_column: None,
            exclude_period: None,
        }
    }

    #[test]
    fn welch_reference_example() {
        let r = welch_test(&welch_frame(), &welch_cfg()).unwrap();
        assert_relative_eq!(r.t, 5f64.sqrt(), epsilon = 1e-12);
        assert_eq!((r.t * 100.0).round() / 100.0, 2.24);
        assert_eq!((r.p_value * 100.0).round() / 100.0, 0.20);
        assert_relative_eq!(r.df, 1.5625 / 1.0625, epsilon = 1e-12);
        assert_eq!((r.mean_a, r.mean_b, r.n_a, r.n_b), (11.0, 8.5, 2, 2));
    }

    #[test]
    fn welch_exclusion_and_small_groups() {
        let mut cfg = welch_cfg();
        cfg.period_column = Some("month".into());
        cfg.exclude_period = Some(2.0);
        assert!(matches!(welch_test(&welch_frame(), &cfg), Err(Error::Validation(_))));
        cfg.period_column = None;
        assert!(welch_test(&welch_frame(), &cfg).is_err());
    }

    #[test]
    fn coefficient_test_matches_formula() {
        let m = toy_model("ols", Inference::StudentT);
        let test = CoefficientTest { coefficient: "x".into(), target: -0.08, divisor: None, alpha: 0.05 };
        let r = coefficient_test(&m, &test).unwrap();
        assert_eq!(r.t, (-0.5 - -0.08) / 0.25);
        let expected = 2.0 * students_t(18.0).unwrap().sf(r.t.abs());
        assert_relative_eq!(r.p_value, expected, epsilon = 1e-15);
        assert_eq!(r.significant, r.p_value < 0.05);
    }

    #[test]
    fn divisor_rescales_estimate_and_error() {
        let m = toy_model("ols", Inference::StudentT);
        let by_const = CoefficientTest {
            coefficient: "x".into(),
            target: 0.0,
            divisor: Some(Divisor::Constant(-2.0)),
            alpha: 0.05,
        };
        let r = coefficient_test(&m, &by_const).unwrap();
        assert_eq!((r.estimate, r.std_error), (0.25, 0.125));
        let by_coef = CoefficientTest { divisor: Some(Divisor::Coefficient("const".into())), ..by_const.clone() };
        let r = coefficient_test(&m, &by_coef).unwrap();
        assert_eq!((r.estimate, r.std_error), (-0.5, 0.25));
        let zero = CoefficientTest { divisor: Some(Divisor::Constant(0.0)), ..by_const };
        assert!(coefficient_test(&m, &zero).is_err());
    }

    #[test]
    fn divisor_from_yaml() {
        let t: CoefficientTest = serde_yaml_ng::from_str("coefficient: x\ntarget: 0\ndivisor: const\n").unwrap();
        assert_eq!(t.divisor, Some(Divisor::Coefficient("const".into())));
        assert_eq!(t.alpha, 0.05);
        let t: CoefficientTest = serde_yaml_ng::from_str("coefficient: x\ntarget: 0\ndivisor: 3.5\n").unwrap();
        assert_eq!(t.divisor, Some(Divisor::Constant(3.5)));
    }
}
