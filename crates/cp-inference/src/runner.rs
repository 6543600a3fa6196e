//! Entry point dispatching a [`RegressionSpec`] to its estimator.

use cp_core::{Error, Frame, Result};

use crate::design::{Design, Estimator, RegressionSpec, RowFilter};
use crate::econometrics::{ClusterCorrection, PanelOptions, PoissonOptions, absorbing_fit, fe_poisson_fit, panel_fe_fit};
use crate::linear::{OlsCovariance, fit_ols};
use crate::model::FittedModel;
use crate::robust::fit_huber;

/// Fit `spec` on `frame`.
///
/// Rows are filtered by `spec.filter` (and by the conditions of a
/// conditional estimator), then rows with a missing value in any used column
/// are dropped. Fixed-effects estimators ignore `spec.intercept`.
pub fn fit(frame: &Frame, spec: &RegressionSpec) -> Result<FittedModel> {
    if spec.regressors.is_empty() {
        return Err(Error::Validation("at least one regressor is required".into()));
    }
    let aux = spec.estimator.auxiliary_columns();
    let design = |intercept: bool, filter: Option<&RowFilter>| {
        Design::build(frame, &spec.dependent, &spec.regressors, intercept, filter, &aux)
    };
    let dep = spec.dependent.as_str();
    let model = match &spec.estimator {
        Estimator::Ols => fit_ols(&Design::from_spec(frame, spec, spec.intercept)?, dep, "ols", &OlsCovariance::Unadjusted)?,
        Estimator::RobustOls => {
            fit_ols(&Design::from_spec(frame, spec, spec.intercept)?, dep, "robust_ols", &OlsCovariance::Robust)?
        }
        Estimator::ClusteredOls { cluster, correction } => fit_ols(
            &Design::from_spec(frame, spec, spec.intercept)?,
            dep,
            "clustered_ols",
            &OlsCovariance::Clustered { column: cluster.clone(), correction: *correction },
        )?,
        Estimator::Huber { tuning, max_iter, tol } => {
            fit_huber(&Design::from_spec(frame, spec, spec.intercept)?, dep, *tuning, *max_iter, *tol)?
        }
        Estimator::ConditionalOls { cluster, conditions } => {
            if conditions.is_empty() {
                return Err(Error::Validation("conditional_ols needs at least one condition".into()));
            }
            let union = RowFilter { any_of: conditions.clone() };
            let d = match &spec.filter {
                // the general filter and the condition union must both hold
                Some(f) => {
                    let pre = frame.filter(&f.mask(frame)?)?;
                    Design::build(&pre, &spec.dependent, &spec.regressors, spec.intercept, Some(&union), &aux)?
                }
                None => design(spec.intercept, Some(&union))?,
            };
            fit_ols(
                &d,
                dep,
                "conditional_ols",
                &OlsCovariance::Clustered { column: cluster.clone(), correction: ClusterCorrection::default() },
            )?
        }
        Estimator::PanelFe { entity, time, entity_effects, time_effects, cluster, correction } => {
            let d = design(false, spec.filter.as_ref())?;
            panel_fe_fit(
                &d,
                dep,
                &PanelOptions {
                    entity,
                    time,
                    entity_effects: *entity_effects,
                    time_effects: *time_effects,
                    cluster,
                    correction: *correction,
                },
            )?
        }
        Estimator::Absorbing { absorb, covariance } => {
            let d = design(false, spec.filter.as_ref())?;
            absorbing_fit(&d, dep, absorb, covariance)?
        }
        Estimator::FePoisson { entity, weights, cluster, max_iter, tol } => {
            let d = design(false, spec.filter.as_ref())?;
            fe_poisson_fit(
                &d,
                dep,
                &PoissonOptions {
                    entity,
                    weights: weights.as_deref(),
                    cluster: cluster.as_deref(),
                    max_iter: *max_iter,
                    tol: *tol,
                },
            )?
        }
    };
    log::info!(
        "fitted {} for '{}': n={} k={} df_resid={}",
        model.estimator,
        model.dependent,
        model.n_obs,
        model.n_params(),
        model.df_resid
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Condition, ConditionOp};
    use crate::model::INTERCEPT;
    use cp_core::Column;

    /// Rows flagged by `loga`, `logb` or `logc` follow y = −5 + x; the rest do not.
    fn conditional_frame() -> Frame {
        let n = 40;
        let mut loga = Vec::new();
        let mut logb = Vec::new();
        let mut logc = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut cluster = Vec::new();
        for i in 0..n {
            let xi = f64::from(i) * 0.5;
            let (a, b, c) = match i % 5 {
                0 => (1.0, 0.0, 0.0),
                1 => (0.0, 1.0, 0.0),
                2 => (0.0, 0.0, 1.0),
                3 => (1.0, 1.0, 0.0),
                _ => (0.0, 0.0, 0.0),
            };
            let in_set = a == 1.0 || b == 1.0 || c == 1.0;
            let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
            loga.push(a);
            logb.push(b);
            logc.push(c);
            x.push(xi);
            y.push(if in_set { -5.0 + xi + noise } else { 100.0 - 3.0 * xi });
            cluster.push(f64::from(i % 8));
        }
        Frame::from_columns(vec![
            ("y", Column::Float(y)),
            ("x", Column::Float(x)),
            ("loga", Column::Float(loga)),
            ("logb", Column::Float(logb)),
            ("logc", Column::Float(logc)),
            ("cluster", Column::Float(cluster)),
        ])
        .unwrap()
    }

    #[test]
    fn triple_conditional_regression() {
        let cond = |c: &str| Condition { column: c.into(), op: ConditionOp::Eq, value: 1.0 };
        let spec = RegressionSpec::new(
            "y",
            vec!["x"],
            Estimator::ConditionalOls {
                cluster: "cluster".into(),
                conditions: vec![cond("loga"), cond("logb"), cond("logc")],
            },
        );
        let m = fit(&conditional_frame(), &spec).unwrap();
        assert_eq!(m.n_obs, 32);
        let b0 = m.coefficient(INTERCEPT).unwrap().estimate;
        let b1 = m.coefficient("x").unwrap().estimate;
        assert_eq!((b0 * 100.0).round() / 100.0, -5.0);
        assert_eq!((b1 * 100.0).round() / 100.0, 1.0);
    }

    #[test]
    fn triple_conditional_on_four_rows() {
        // each of the first three rows carries one flag; the fourth carries none
        let f = Frame::from_columns(vec![
            ("y", Column::Float(vec![1.0, 2.0, 3.0, 100.0])),
            ("x", Column::Float(vec![6.0, 7.0, 8.0, 9.0])),
            ("loga", Column::Float(vec![1.0, 0.0, 0.0, 0.0])),
            ("logb", Column::Float(vec![0.0, 1.0, 0.0, 0.0])),
            ("logc", Column::Float(vec![0.0, 0.0, 1.0, 0.0])),
            ("cluster", Column::Float(vec![1.0, 2.0, 3.0, 4.0])),
        ])
        .unwrap();
        let cond = |c: &str| Condition { column: c.into(), op: ConditionOp::Eq, value: 1.0 };
        let spec = RegressionSpec::new(
            "y",
            vec!["x"],
            Estimator::ConditionalOls {
                cluster: "cluster".into(),
                conditions: vec![cond("loga"), cond("logb"), cond("logc")],
            },
        );
        let m = fit(&f, &spec).unwrap();
        assert_eq!(m.n_obs, 3);
        assert_eq!(m.df_resid, 1.0);
        let b0 = m.coefficient(INTERCEPT).unwrap().estimate;
        let b1 = m.coefficient("x").unwrap().estimate;
        assert_eq!(format!("{:.2}", b0), "-5.00");
        assert_eq!(format!("{:.2}", b1), "1.00");
    }

    #[test]
    fn unknown_estimator_is_rejected_at_parse_time() {
        let yaml = "dependent: y\nregressors: [x]\nestimator:\n  kind: tobit\n";
        assert!(serde_yaml_ng::from_str::<RegressionSpec>(yaml).is_err());
    }

    #[test]
    fn dispatches_every_linear_kind() {
        let f = conditional_frame();
        for est in [Estimator::Ols, Estimator::RobustOls, Estimator::huber()] {
            let spec = RegressionSpec::new("y", vec!["x"], est);
            let m = fit(&f, &spec).unwrap();
            assert_eq!(m.names, vec![INTERCEPT.to_string(), "x".to_string()]);
            assert_eq!(m.n_obs, 40);
        }
        let spec = RegressionSpec::new(
            "y",
            vec!["x"],
            Estimator::ClusteredOls { cluster: "cluster".into(), correction: Default::default() },
        );
        assert!(fit(&f, &spec).unwrap().std_errors[1].is_finite());
        let empty = RegressionSpec::new("y", Vec::<String>::new(), Estimator::Ols);
        assert!(fit(&f, &empty).is_err());
    }
}
