//! Regression specifications and design-matrix assembly.
//!
//! A [`RegressionSpec`] names the dependent variable, the regressors, an
//! optional row filter and the [`Estimator`]. [`Design::build`] applies the
//! filter, drops rows with a missing value in any used column (listwise)
//! and assembles `y` and `X`.

use std::str::FromStr;

use cp_core::{Column, Error, Frame, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::econometrics::cluster::ClusterCorrection;
use crate::model::INTERCEPT;

/// Comparison used by a row [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    /// `column == value`
    #[serde(alias = "==")]
    Eq,
    /// `column != value`
    #[serde(alias = "!=")]
    Ne,
}

/// `column <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Numeric column tested.
    pub column: String,
    /// Comparison.
    pub op: ConditionOp,
    /// Value compared against.
    pub value: f64,
}

impl Condition {
    fn holds(&self, x: f64) -> bool {
        match self.op {
            ConditionOp::Eq => x == self.value,
            ConditionOp::Ne => !x.is_nan() && x != self.value,
        }
    }
}

/// Keep rows that satisfy at least one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    /// Conditions joined with OR.
    pub any_of: Vec<Condition>,
}

impl RowFilter {
    /// Row mask for `frame`.
    pub fn mask(&self, frame: &Frame) -> Result<Vec<bool>> {
        if self.any_of.is_empty() {
            return Err(Error::Validation("row filter needs at least one condition".into()));
        }
        let mut mask = vec![false; frame.n_rows()];
        for cond in &self.any_of {
            for (m, &x) in mask.iter_mut().zip(frame.floats(&cond.column)?) {
                *m |= cond.holds(x);
            }
        }
        Ok(mask)
    }
}

fn default_true() -> bool {
    true
}
fn default_huber_t() -> f64 {
    1.345
}
fn default_max_iter() -> usize {
    50
}
fn default_irls_max_iter() -> usize {
    1000
}
fn default_tol() -> f64 {
    1e-8
}

/// Cluster dimension of a panel estimator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelCluster {
    /// Cluster by the entity column.
    #[default]
    Entity,
    /// Cluster by the time column.
    Time,
    /// Cluster by another column.
    Column(String),
    /// No clustering: classical covariance.
    Unadjusted,
}

/// Covariance choice of the absorbing estimator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsorbCovariance {
    /// Classical.
    #[default]
    Unadjusted,
    /// HC1.
    Robust,
    /// Cluster-robust by a column.
    Clustered(String),
}

/// Estimator and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    /// OLS with classical covariance.
    Ols,
    /// OLS with cluster-robust covariance.
    ClusteredOls {
        /// Cluster column.
        cluster: String,
        /// Small-sample correction.
        #[serde(default)]
        correction: ClusterCorrection,
    },
    /// OLS with HC1 covariance.
    RobustOls,
    /// Huber M-estimation.
    Huber {
        /// Tuning constant.
        #[serde(default = "default_huber_t")]
        tuning: f64,
        /// IRLS iteration cap.
        #[serde(default = "default_max_iter")]
        max_iter: usize,
        /// Convergence tolerance on the objective.
        #[serde(default = "default_tol")]
        tol: f64,
    },
    /// Clustered OLS on the union of rows matching any condition.
    ConditionalOls {
        /// Cluster column.
        cluster: String,
        /// Conditions joined with OR (at least one).
        conditions: Vec<Condition>,
    },
    /// Within estimator with entity and/or time effects.
    PanelFe {
        /// Entity column.
        entity: String,
        /// Time column.
        time: String,
        /// Absorb entity effects.
        #[serde(default = "default_true")]
        entity_effects: bool,
        /// Absorb time effects.
        #[serde(default)]
        time_effects: bool,
        /// Cluster dimension.
        #[serde(default)]
        cluster: PanelCluster,
        /// Small-sample correction for clustered covariance.
        #[serde(default)]
        correction: ClusterCorrection,
    },
    /// Least squares absorbing one or more categorical factors.
    Absorbing {
        /// Factor columns absorbed.
        absorb: Vec<String>,
        /// Covariance estimator.
        #[serde(default)]
        covariance: AbsorbCovariance,
    },
    /// Poisson pseudo-maximum-likelihood with entity fixed effects.
    FePoisson {
        /// Entity column.
        entity: String,
        /// Optional observation weights.
        #[serde(default)]
        weights: Option<String>,
        /// Optional cluster column (model-based covariance when absent).
        #[serde(default)]
        cluster: Option<String>,
        /// IRLS iteration cap.
        #[serde(default = "default_irls_max_iter")]
        max_iter: usize,
        /// Convergence tolerance on the relative deviance change.
        #[serde(default = "default_tol")]
        tol: f64,
    },
}

/// Estimator names without options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// See [`Estimator::Ols`].
    Ols,
    /// See [`Estimator::ClusteredOls`].
    ClusteredOls,
    /// See [`Estimator::RobustOls`].
    RobustOls,
    /// See [`Estimator::Huber`].
    Huber,
    /// See [`Estimator::ConditionalOls`].
    ConditionalOls,
    /// See [`Estimator::PanelFe`].
    PanelFe,
    /// See [`Estimator::Absorbing`].
    Absorbing,
    /// See [`Estimator::FePoisson`].
    FePoisson,
}

impl EstimatorKind {
    /// Snake-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            EstimatorKind::Ols => "ols",
            EstimatorKind::ClusteredOls => "clustered_ols",
            EstimatorKind::RobustOls => "robust_ols",
            EstimatorKind::Huber => "huber",
            EstimatorKind::ConditionalOls => "conditional_ols",
            EstimatorKind::PanelFe => "panel_fe",
            EstimatorKind::Absorbing => "absorbing",
            EstimatorKind::FePoisson => "fe_poisson",
        }
    }
}

impl FromStr for EstimatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "ols" => EstimatorKind::Ols,
            "clustered_ols" => EstimatorKind::ClusteredOls,
            "robust_ols" => EstimatorKind::RobustOls,
            "huber" | "rlm" => EstimatorKind::Huber,
            "conditional_ols" => EstimatorKind::ConditionalOls,
            "panel_fe" => EstimatorKind::PanelFe,
            "absorbing" => EstimatorKind::Absorbing,
            "fe_poisson" | "ppml" => EstimatorKind::FePoisson,
            other => return Err(Error::Unsupported(format!("estimator '{}'", other))),
        })
    }
}

impl Estimator {
    /// Kind tag.
    pub fn kind(&self) -> EstimatorKind {
        match self {
            Estimator::Ols => EstimatorKind::Ols,
            Estimator::ClusteredOls { .. } => EstimatorKind::ClusteredOls,
            Estimator::RobustOls => EstimatorKind::RobustOls,
            Estimator::Huber { .. } => EstimatorKind::Huber,
            Estimator::ConditionalOls { .. } => EstimatorKind::ConditionalOls,
            Estimator::PanelFe { .. } => EstimatorKind::PanelFe,
            Estimator::Absorbing { .. } => EstimatorKind::Absorbing,
            Estimator::FePoisson { .. } => EstimatorKind::FePoisson,
        }
    }

    /// Huber estimator with default options.
    pub fn huber() -> Self {
        Estimator::Huber { tuning: default_huber_t(), max_iter: default_max_iter(), tol: default_tol() }
    }

    /// Columns the estimator reads besides the dependent variable and regressors.
    pub fn auxiliary_columns(&self) -> Vec<String> {
        match self {
            Estimator::Ols | Estimator::RobustOls | Estimator::Huber { .. } => Vec::new(),
            Estimator::ClusteredOls { cluster, .. } => vec![cluster.clone()],
            Estimator::ConditionalOls { cluster, .. } => vec![cluster.clone()],
            Estimator::PanelFe { entity, time, cluster, .. } => {
                let mut cols = vec![entity.clone(), time.clone()];
                if let PanelCluster::Column(c) = cluster {
                    cols.push(c.clone());
                }
                cols
            }
            Estimator::Absorbing { absorb, covariance } => {
                let mut cols = absorb.clone();
                if let AbsorbCovariance::Clustered(c) = covariance {
                    cols.push(c.clone());
                }
                cols
            }
            Estimator::FePoisson { entity, weights, cluster, .. } => {
                let mut cols = vec![entity.clone()];
                cols.extend(weights.iter().cloned());
                cols.extend(cluster.iter().cloned());
                cols
            }
        }
    }
}

/// A regression: what to fit, on which rows, with which estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSpec {
    /// Dependent variable.
    pub dependent: String,
    /// Regressors, in coefficient order.
    pub regressors: Vec<String>,
    /// Add an intercept (ignored by estimators that absorb it).
    #[serde(default = "default_true")]
    pub intercept: bool,
    /// Optional OR-filter applied before fitting.
    #[serde(default)]
    pub filter: Option<RowFilter>,
    /// Estimator.
    pub estimator: Estimator,
}

impl RegressionSpec {
    /// Spec with an intercept and no filter.
    pub fn new<S: Into<String>>(dependent: impl Into<String>, regressors: Vec<S>, estimator: Estimator) -> Self {
        Self {
            dependent: dependent.into(),
            regressors: regressors.into_iter().map(Into::into).collect(),
            intercept: true,
            filter: None,
            estimator,
        }
    }
}

/// Filtered, complete-case data ready for an estimator.
#[derive(Debug, Clone)]
pub struct Design {
    /// Dependent variable.
    pub y: DVector<f64>,
    /// Regressor matrix (`n × k`), intercept first when requested.
    pub x: DMatrix<f64>,
    /// Column names of `x`.
    pub names: Vec<String>,
    /// Source rows that survived, with every column of the input frame.
    pub rows: Frame,
}

fn is_missing_at(col: &Column, i: usize) -> bool {
    match col {
        Column::Float(v) => !v[i].is_finite(),
        Column::Str(v) => v[i].is_none(),
    }
}

impl Design {
    /// Apply `filter`, drop incomplete rows over `dependent`, `regressors`
    /// and `auxiliary`, and assemble `y`/`X`.
    pub fn build(
        frame: &Frame,
        dependent: &str,
        regressors: &[String],
        intercept: bool,
        filter: Option<&RowFilter>,
        auxiliary: &[String],
    ) -> Result<Self> {
        if regressors.iter().any(|r| r == dependent) {
            return Err(Error::Validation(format!("'{}' is both dependent and regressor", dependent)));
        }
        for (i, r) in regressors.iter().enumerate() {
            if regressors[..i].contains(r) {
                return Err(Error::Validation(format!("regressor '{}' listed twice", r)));
            }
        }
        let mut keep = match filter {
            Some(f) => f.mask(frame)?,
            None => vec![true; frame.n_rows()],
        };
        let filtered = keep.iter().filter(|&&k| k).count();

        let mut used: Vec<&str> = vec![dependent];
        used.extend(regressors.iter().map(String::as_str));
        used.extend(auxiliary.iter().map(String::as_str));
        for name in &used {
            let col = frame.column(name)?;
            if !auxiliary.iter().any(|a| a == name) && col.as_floats().is_none() {
                return Err(Error::Validation(format!("column '{}' is not numeric", name)));
            }
            for (i, k) in keep.iter_mut().enumerate() {
                if *k && is_missing_at(col, i) {
                    *k = false;
                }
            }
        }
        let rows = frame.filter(&keep)?;
        let n = rows.n_rows();
        if filtered > n {
            log::debug!("listwise deletion dropped {} of {} rows", filtered - n, filtered);
        }
        if n == 0 {
            return Err(Error::Validation("no complete rows left to fit".into()));
        }

        let mut names = Vec::with_capacity(regressors.len() + 1);
        if intercept {
            names.push(INTERCEPT.to_string());
        }
        names.extend(regressors.iter().cloned());
        let k = names.len();
        let mut x = DMatrix::zeros(n, k);
        let mut j0 = 0;
        if intercept {
            x.column_mut(0).fill(1.0);
            j0 = 1;
        }
        for (j, name) in regressors.iter().enumerate() {
            for (i, &v) in rows.floats(name)?.iter().enumerate() {
                x[(i, j0 + j)] = v;
            }
        }
        let y = DVector::from_column_slice(rows.floats(dependent)?);
        Ok(Self { y, x, names, rows })
    }

    /// Build the design described by a [`RegressionSpec`].
    pub fn from_spec(frame: &Frame, spec: &RegressionSpec, intercept: bool) -> Result<Self> {
        Self::build(
            frame,
            &spec.dependent,
            &spec.regressors,
            intercept,
            spec.filter.as_ref(),
            &spec.estimator.auxiliary_columns(),
        )
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    /// Dense group codes of an auxiliary column over the surviving rows.
    pub fn groups(&self, column: &str) -> Result<(Vec<usize>, usize)> {
        let (codes, n) = self.rows.group_codes(column)?;
        let codes = codes
            .into_iter()
            .map(|c| c.ok_or_else(|| Error::Validation(format!("missing group in '{}'", column))))
            .collect::<Result<Vec<_>>>()?;
        Ok((codes, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_columns(vec![
            ("y", Column::Float(vec![1.0, 2.0, f64::NAN, 4.0, 5.0])),
            ("x", Column::Float(vec![0.0, 1.0, 2.0, f64::NAN, 4.0])),
            ("g", Column::Float(vec![1.0, 1.0, 2.0, 2.0, 3.0])),
            ("street", Column::Str(vec![Some("a".into()), None, Some("b".into()), Some("b".into()), Some("c".into())])),
        ])
        .unwrap()
    }

    #[test]
    fn listwise_deletion() {
        let d = Design::build(&frame(), "y", &["x".to_string()], true, None, &[]).unwrap();
        assert_eq!(d.n_obs(), 3);
        assert_eq!(d.names, vec![INTERCEPT.to_string(), "x".to_string()]);
        assert_eq!(d.x[(2, 1)], 4.0);
        assert_eq!(d.x[(1, 0)], 1.0);
        // a string auxiliary column with a missing entry removes that row too
        let d = Design::build(&frame(), "y", &["x".to_string()], false, None, &["street".to_string()]).unwrap();
        assert_eq!(d.n_obs(), 2);
        let (codes, n) = d.groups("street").unwrap();
        assert_eq!((codes, n), (vec![0, 1], 2));
    }

    #[test]
    fn filter_is_a_union() {
        let filter = RowFilter {
            any_of: vec![
                Condition { column: "g".into(), op: ConditionOp::Eq, value: 1.0 },
                Condition { column: "g".into(), op: ConditionOp::Eq, value: 3.0 },
            ],
        };
        let d = Design::build(&frame(), "y", &["x".to_string()], true, Some(&filter), &[]).unwrap();
        assert_eq!(d.y.as_slice(), &[1.0, 2.0, 5.0]);
        let ne = RowFilter { any_of: vec![Condition { column: "g".into(), op: ConditionOp::Ne, value: 1.0 }] };
        assert_eq!(ne.mask(&frame()).unwrap(), vec![false, false, true, true, true]);
    }

    #[test]
    fn bad_specs_rejected() {
        assert!(Design::build(&frame(), "y", &["y".to_string()], true, None, &[]).is_err());
        assert!(Design::build(&frame(), "y", &["street".to_string()], true, None, &[]).is_err());
        assert!(Design::build(&frame(), "y", &["nope".to_string()], true, None, &[]).is_err());
    }

    #[test]
    fn estimator_from_yaml() {
        let yaml = "kind: panel_fe\nentity: block\ntime: month\n";
        let e: Estimator = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(
            e,
            Estimator::PanelFe {
                entity: "block".into(),
                time: "month".into(),
                entity_effects: true,
                time_effects: false,
                cluster: PanelCluster::Entity,
                correction: ClusterCorrection::default(),
            }
        );
        let e: Estimator = serde_yaml_ng::from_str("kind: absorbing\nabsorb: [block]\ncovariance:\n  clustered: block\n").unwrap();
        assert_eq!(e.auxiliary_columns(), vec!["block".to_string(), "block".to_string()]);
        assert!(serde_yaml_ng::from_str::<Estimator>("kind: lasso\n").is_err());
        assert!(matches!("lasso".parse::<EstimatorKind>(), Err(Error::Unsupported(_))));
        assert_eq!("ppml".parse::<EstimatorKind>().unwrap(), EstimatorKind::FePoisson);
    }
}
