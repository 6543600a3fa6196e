//! Fitted regression result shared by every estimator.

use cp_core::{Error, Frame, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Name given to the intercept column.
pub const INTERCEPT: &str = "const";

/// Sampling distribution used for t/z statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inference {
    /// Student-t with `df_resid` degrees of freedom.
    StudentT,
    /// Standard normal (asymptotic).
    Normal,
}

/// How the coefficient covariance was estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CovarianceKind {
    /// Classical `σ² (X'X)⁻¹`.
    Unadjusted,
    /// HC1 heteroskedasticity-robust sandwich.
    Robust,
    /// Cluster-robust sandwich.
    Clustered {
        /// Column the clusters come from.
        column: String,
        /// Number of distinct clusters.
        n_clusters: usize,
    },
    /// Huber (1981) H1 M-estimator covariance.
    HuberH1,
    /// Inverse Fisher information of a likelihood model.
    ModelBased,
}

/// One named coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    /// Regressor name.
    pub name: String,
    /// Point estimate.
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
}

/// Immutable result of a regression fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    /// Estimator kind (`ols`, `panel_fe`, ...).
    pub estimator: String,
    /// Dependent variable.
    pub dependent: String,
    /// Regressor names, in coefficient order (`const` first when present).
    pub names: Vec<String>,
    /// Point estimates.
    pub coefficients: Vec<f64>,
    /// Standard errors (square roots of the covariance diagonal).
    pub std_errors: Vec<f64>,
    /// Coefficient covariance, row-major `k × k`.
    pub covariance: Vec<Vec<f64>>,
    /// Covariance estimator.
    pub covariance_kind: CovarianceKind,
    /// Reference distribution for t/z statistics.
    pub inference: Inference,
    /// Observations used after filtering and listwise deletion.
    pub n_obs: usize,
    /// Residual degrees of freedom.
    pub df_resid: f64,
    /// Model degrees of freedom (regressors excluding the intercept).
    pub df_model: f64,
    /// R² (within R² for fixed-effects estimators), where defined.
    pub r_squared: Option<f64>,
    /// Regressors dropped as absorbed or collinear.
    #[serde(default)]
    pub dropped: Vec<String>,
    /// Number of fixed-effect groups absorbed, when applicable.
    #[serde(default)]
    pub n_groups: Option<usize>,
    /// Iterations used by iterative estimators.
    #[serde(default)]
    pub iterations: Option<usize>,
    /// Convergence flag of iterative estimators.
    #[serde(default)]
    pub converged: Option<bool>,
    /// Log-likelihood (Poisson).
    #[serde(default)]
    pub log_likelihood: Option<f64>,
    /// Residual scale (Huber).
    #[serde(default)]
    pub scale: Option<f64>,
}

impl FittedModel {
    fn position(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::NotFound(format!("coefficient '{}'", name)))
    }

    /// Number of coefficients.
    pub fn n_params(&self) -> usize {
        self.coefficients.len()
    }

    /// Estimate and standard error of one coefficient.
    pub fn coefficient(&self, name: &str) -> Result<Coefficient> {
        let i = self.position(name)?;
        Ok(Coefficient {
            name: name.to_string(),
            estimate: self.coefficients[i],
            std_error: self.std_errors[i],
        })
    }

    /// All coefficients in order.
    pub fn coefficient_list(&self) -> Vec<Coefficient> {
        self.names
            .iter()
            .zip(self.coefficients.iter().zip(&self.std_errors))
            .map(|(n, (&b, &s))| Coefficient { name: n.clone(), estimate: b, std_error: s })
            .collect()
    }

    /// Estimate divided by standard error.
    pub fn t_values(&self) -> Vec<f64> {
        self.coefficients.iter().zip(&self.std_errors).map(|(b, s)| b / s).collect()
    }

    /// Two-sided p-value of a statistic under this model's reference distribution.
    pub fn two_sided_p(&self, stat: f64) -> Result<f64> {
        if stat.is_nan() {
            return Ok(f64::NAN);
        }
        let sf = match self.inference {
            Inference::StudentT => students_t(self.df_resid)?.sf(stat.abs()),
            Inference::Normal => standard_normal()?.sf(stat.abs()),
        };
        Ok((2.0 * sf).min(1.0))
    }

    /// Two-sided p-values of the t (or z) statistics.
    pub fn p_values(&self) -> Result<Vec<f64>> {
        self.t_values().into_iter().map(|t| self.two_sided_p(t)).collect()
    }

    /// Critical value for a two-sided `1 - alpha` interval.
    pub fn critical_value(&self, alpha: f64) -> Result<f64> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", alpha)));
        }
        let q = 1.0 - alpha / 2.0;
        Ok(match self.inference {
            Inference::StudentT => students_t(self.df_resid)?.inverse_cdf(q),
            Inference::Normal => standard_normal()?.inverse_cdf(q),
        })
    }

    /// `(lower, upper)` confidence bounds at level `1 - alpha`.
    pub fn conf_int(&self, alpha: f64) -> Result<Vec<(f64, f64)>> {
        let c = self.critical_value(alpha)?;
        Ok(self.coefficients.iter().zip(&self.std_errors).map(|(b, s)| (b - c * s, b + c * s)).collect())
    }

    /// Incidence-rate ratios `exp(β)` with delta-method standard errors
    /// `exp(β)·se`. Only defined for log-link models.
    pub fn incidence_rate_ratios(&self) -> Result<Vec<Coefficient>> {
        if self.estimator != "fe_poisson" {
            return Err(Error::Unsupported(format!(
                "incidence-rate ratios need a log-link model, not '{}'",
                self.estimator
            )));
        }
        Ok(self
            .coefficient_list()
            .into_iter()
            .map(|c| {
                let irr = c.estimate.exp();
                Coefficient { name: c.name, estimate: irr, std_error: irr * c.std_error }
            })
            .collect())
    }

    /// Linear predictor `Xβ` for every row of `frame` (absorbed effects excluded).
    pub fn predict_linear(&self, frame: &Frame) -> Result<Vec<f64>> {
        let mut eta = vec![0.0; frame.n_rows()];
        for (name, &b) in self.names.iter().zip(&self.coefficients) {
            if name == INTERCEPT {
                eta.iter_mut().for_each(|e| *e += b);
                continue;
            }
            for (e, &x) in eta.iter_mut().zip(frame.floats(name)?) {
                *e += b * x;
            }
        }
        Ok(eta)
    }

    /// `exp(Xβ)`: rate multipliers relative to each row's absorbed baseline.
    pub fn predict_rates(&self, frame: &Frame) -> Result<Vec<f64>> {
        if self.estimator != "fe_poisson" {
            return Err(Error::Unsupported(format!("rates need a log-link model, not '{}'", self.estimator)));
        }
        Ok(self.predict_linear(frame)?.into_iter().map(f64::exp).collect())
    }
}

pub(crate) fn students_t(df: f64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| Error::Computation(format!("Student-t with df={}: {}", df, e)))
}

pub(crate) fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| Error::Computation(format!("normal distribution: {}", e)))
}

#[cfg(test)]
pub(crate) fn toy_model(estimator: &str, inference: Inference) -> FittedModel {
    FittedModel {
        estimator: estimator.to_string(),
        dependent: "y".into(),
        names: vec![INTERCEPT.into(), "x".into()],
        coefficients: vec![1.0, -0.5],
        std_errors: vec![0.5, 0.25],
        covariance: vec![vec![0.25, 0.0], vec![0.0, 0.0625]],
        covariance_kind: CovarianceKind::Unadjusted,
        inference,
        n_obs: 20,
        df_resid: 18.0,
        df_model: 1.0,
        r_squared: Some(0.4),
        dropped: Vec::new(),
        n_groups: None,
        iterations: None,
        converged: None,
        log_likelihood: None,
        scale: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cp_core::Column;

    #[test]
    fn statistics_and_intervals() {
        let m = toy_model("ols", Inference::StudentT);
        assert_eq!(m.t_values(), vec![2.0, -2.0]);
        let p = m.p_values().unwrap();
        assert_relative_eq!(p[0], p[1], epsilon = 1e-15);
        // t_{0.975, 18} = 2.100922
        let ci = m.conf_int(0.05).unwrap();
        assert_relative_eq!(ci[1].0, -0.5 - 0.25 * 2.100922, epsilon = 1e-5);
        assert!(p[0] > 0.05 && p[0] < 0.07);
        assert!(m.conf_int(1.5).is_err());
    }

    #[test]
    fn normal_reference() {
        let m = toy_model("fe_poisson", Inference::Normal);
        assert_relative_eq!(m.p_values().unwrap()[0], 0.0455003, epsilon = 1e-6);
    }

    #[test]
    fn irr_only_for_poisson() {
        let m = toy_model("ols", Inference::StudentT);
        assert!(matches!(m.incidence_rate_ratios(), Err(Error::Unsupported(_))));
        let p = toy_model("fe_poisson", Inference::Normal);
        let irr = p.incidence_rate_ratios().unwrap();
        assert_relative_eq!(irr[1].estimate, (-0.5f64).exp());
        assert_relative_eq!(irr[1].std_error, (-0.5f64).exp() * 0.25);
    }

    #[test]
    fn predictions() {
        let m = toy_model("fe_poisson", Inference::Normal);
        let f = Frame::from_columns(vec![("x", Column::Float(vec![0.0, 2.0]))]).unwrap();
        assert_eq!(m.predict_linear(&f).unwrap(), vec![1.0, 0.0]);
        assert_relative_eq!(m.predict_rates(&f).unwrap()[0], 1f64.exp());
        assert!(m.coefficient("missing").is_err());
        assert_eq!(m.coefficient("x").unwrap().std_error, 0.25);
    }

    #[test]
    fn json_round_trip_keeps_metadata() {
        let mut m = toy_model("clustered_ols", Inference::StudentT);
        m.covariance_kind = CovarianceKind::Clustered { column: "block".into(), n_clusters: 12 };
        let s = serde_json::to_string(&m).unwrap();
        assert!(s.contains("\"type\":\"clustered\""));
        let back: FittedModel = serde_json::from_str(&s).unwrap();
        assert_eq!(back, m);
    }
}
