//! Ordinary least squares with classical, HC1 and cluster-robust covariance.

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use crate::design::Design;
use crate::econometrics::cluster::{
    ClusterCorrection, cluster_covariance, hc1_covariance, std_errors, to_rows,
};
use crate::model::{CovarianceKind, FittedModel, INTERCEPT, Inference};

/// Raw least-squares solution.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    /// Coefficients.
    pub beta: DVector<f64>,
    /// `(X'X)⁻¹`.
    pub xtx_inv: DMatrix<f64>,
    /// Residuals `y − Xβ`.
    pub resid: DVector<f64>,
    /// Residual sum of squares.
    pub rss: f64,
}

/// Solve `min ||y − Xβ||²`.
pub fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LeastSquares> {
    let (n, k) = x.shape();
    if n != y.len() {
        return Err(Error::Validation(format!("X has {} rows, y has {}", n, y.len())));
    }
    if k == 0 {
        return Err(Error::Validation("X must have at least one column".into()));
    }
    if n < k {
        return Err(Error::Validation(format!("{} observations for {} parameters", n, k)));
    }
    let xt = x.transpose();
    let xtx_inv = (&xt * x)
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'X is singular (collinear regressors)".into()))?;
    let beta = &xtx_inv * (&xt * y);
    let resid = y - x * &beta;
    let rss = resid.norm_squared();
    Ok(LeastSquares { beta, xtx_inv, resid, rss })
}

/// Weighted least squares `min Σ wᵢ (yᵢ − xᵢβ)²`. Returns `(β, (X'WX)⁻¹)`.
pub fn weighted_least_squares(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    w: &DVector<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>)> {
    let mut xw = x.clone();
    for (i, mut row) in xw.row_iter_mut().enumerate() {
        row *= w[i];
    }
    let xt_w = xw.transpose();
    let inv = (&xt_w * x)
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'WX is singular".into()))?;
    let beta = &inv * (xt_w * y);
    Ok((beta, inv))
}

/// R² of a fit: centered when the model has an intercept, otherwise uncentered.
pub fn r_squared(y: &DVector<f64>, rss: f64, centered: bool) -> f64 {
    let tss = if centered {
        let mean = y.mean();
        y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
    } else {
        y.norm_squared()
    };
    if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN }
}

/// Covariance used by [`fit_ols`].
#[derive(Debug, Clone, PartialEq)]
pub enum OlsCovariance {
    /// `σ² (X'X)⁻¹`.
    Unadjusted,
    /// HC1.
    Robust,
    /// Cluster-robust by a column of the design rows.
    Clustered {
        /// Cluster column.
        column: String,
        /// Correction.
        correction: ClusterCorrection,
    },
}

/// Fit OLS on an assembled design.
pub fn fit_ols(design: &Design, dependent: &str, estimator: &str, cov: &OlsCovariance) -> Result<FittedModel> {
    let ls = least_squares(&design.x, &design.y)?;
    let n = design.n_obs();
    let k = design.x.ncols();
    if n <= k {
        return Err(Error::Validation(format!(
            "{}: no residual degrees of freedom (n={}, k={})",
            estimator, n, k
        )));
    }
    let df_resid = (n - k) as f64;
    let has_const = design.names.first().is_some_and(|c| c == INTERCEPT);

    let (covariance, kind) = match cov {
        OlsCovariance::Unadjusted => {
            (&ls.xtx_inv * (ls.rss / df_resid), CovarianceKind::Unadjusted)
        }
        OlsCovariance::Robust => (hc1_covariance(&design.x, &ls.resid, &ls.xtx_inv, df_resid), CovarianceKind::Robust),
        OlsCovariance::Clustered { column, correction } => {
            let (codes, g) = design.groups(column)?;
            let v = cluster_covariance(&design.x, &ls.resid, &ls.xtx_inv, &codes, g, k, *correction)?;
            (v, CovarianceKind::Clustered { column: column.clone(), n_clusters: g })
        }
    };
    log::debug!("{}: n={} k={} rss={:.6}", estimator, n, k, ls.rss);

    Ok(FittedModel {
        estimator: estimator.to_string(),
        dependent: dependent.to_string(),
        names: design.names.clone(),
        coefficients: ls.beta.iter().copied().collect(),
        std_errors: std_errors(&covariance),
        covariance: to_rows(&covariance),
        covariance_kind: kind,
        inference: Inference::StudentT,
        n_obs: n,
        df_resid,
        df_model: (k - usize::from(has_const)) as f64,
        r_squared: Some(r_squared(&design.y, ls.rss, has_const)),
        dropped: Vec::new(),
        n_groups: None,
        iterations: None,
        converged: None,
        log_likelihood: None,
        scale: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cp_core::{Column, Frame};

    fn design(y: Vec<f64>, x: Vec<f64>, g: Vec<f64>) -> Design {
        let f = Frame::from_columns(vec![
            ("y", Column::Float(y)),
            ("x", Column::Float(x)),
            ("g", Column::Float(g)),
        ])
        .unwrap();
        Design::build(&f, "y", &["x".to_string()], true, None, &["g".to_string()]).unwrap()
    }

    #[test]
    fn exact_line() {
        let d = design(vec![1.0, 3.0, 5.0, 7.0], vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 1.0, 2.0, 2.0]);
        let m = fit_ols(&d, "y", "ols", &OlsCovariance::Unadjusted).unwrap();
        assert_relative_eq!(m.coefficients[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(m.coefficients[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(m.r_squared.unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(m.df_resid, 2.0);
        assert_eq!(m.df_model, 1.0);
    }

    #[test]
    fn classical_standard_error() {
        // y = [1, 2, 2, 4] on x = [0, 1, 2, 3]: slope 0.9, rss 0.7
        let d = design(vec![1.0, 2.0, 2.0, 4.0], vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 1.0, 2.0, 2.0]);
        let m = fit_ols(&d, "y", "ols", &OlsCovariance::Unadjusted).unwrap();
        assert_relative_eq!(m.coefficients[1], 0.9, epsilon = 1e-12);
        // se = sqrt(0.35 / 5)
        assert_relative_eq!(m.std_errors[1], (0.35f64 / 5.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn robust_and_clustered_differ_from_classical() {
        let x: Vec<f64> = (0..12).map(f64::from).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| 2.0 * v + if i % 3 == 0 { 1.5 } else { -0.7 }).collect();
        let g: Vec<f64> = (0..12).map(|i| f64::from(i / 3)).collect();
        let d = design(y, x, g);
        let ols = fit_ols(&d, "y", "ols", &OlsCovariance::Unadjusted).unwrap();
        let hc1 = fit_ols(&d, "y", "robust_ols", &OlsCovariance::Robust).unwrap();
        let cl = fit_ols(
            &d,
            "y",
            "clustered_ols",
            &OlsCovariance::Clustered { column: "g".into(), correction: ClusterCorrection::Stata },
        )
        .unwrap();
        assert_eq!(ols.coefficients, cl.coefficients);
        assert!(hc1.std_errors[1].is_finite() && hc1.std_errors[1] > 0.0);
        assert!(cl.std_errors[1].is_finite());
        assert_eq!(cl.covariance_kind, CovarianceKind::Clustered { column: "g".into(), n_clusters: 4 });
    }

    #[test]
    fn collinear_design_is_an_error() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let y = DVector::from_column_slice(&[1.0, 2.0, 3.0]);
        assert!(matches!(least_squares(&x, &y), Err(Error::Computation(_))));
    }

    #[test]
    fn weighted_matches_replicated_rows() {
        // weight 2 on a row == duplicating that row
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_column_slice(&[0.0, 2.0, 1.0]);
        let w = DVector::from_column_slice(&[1.0, 2.0, 1.0]);
        let (b, _) = weighted_least_squares(&x, &y, &w).unwrap();
        let xd = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0]);
        let yd = DVector::from_column_slice(&[0.0, 2.0, 2.0, 1.0]);
        let ls = least_squares(&xd, &yd).unwrap();
        assert_relative_eq!(b[0], ls.beta[0], epsilon = 1e-12);
        assert_relative_eq!(b[1], ls.beta[1], epsilon = 1e-12);
    }

    #[test]
    fn exactly_identified_fit_is_rejected() {
        // two rows, intercept + slope: a perfect fit with nothing left for sigma²
        let d = design(vec![1.0, 3.0], vec![0.0, 1.0], vec![1.0, 2.0]);
        for cov in [
            OlsCovariance::Unadjusted,
            OlsCovariance::Robust,
            OlsCovariance::Clustered { column: "g".into(), correction: ClusterCorrection::Stata },
        ] {
            let err = fit_ols(&d, "y", "ols", &cov).unwrap_err();
            assert!(matches!(err, Error::Validation(ref m) if m.contains("no residual degrees of freedom")));
        }
    }
}
