//! Sandwich covariance estimators.
//!
//! `V = B⁻¹ M B⁻¹` with bread `B⁻¹ = (X'WX)⁻¹` and a meat built from
//! per-observation scores `s_i = x_i · u_i`.
//!
//! # References
//!
//! - Liang & Zeger (1986), "Longitudinal data analysis using generalized
//!   linear models." *Biometrika*.
//! - Cameron & Miller (2015), "A Practitioner's Guide to Cluster-Robust
//!   Inference." *Journal of Human Resources*.

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Finite-sample correction applied to the cluster meat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterCorrection {
    /// `G/(G−1) · (N−1)/(N−K)`.
    #[default]
    Stata,
    /// `G/(G−1)`.
    Groups,
    /// No correction (CR0).
    None,
}

impl ClusterCorrection {
    /// Multiplier for `g` clusters, `n` observations and `k` parameters.
    pub fn factor(self, g: usize, n: usize, k: usize) -> f64 {
        let (g, n, k) = (g as f64, n as f64, k as f64);
        match self {
            ClusterCorrection::Stata if g > 1.0 && n > k => (g / (g - 1.0)) * ((n - 1.0) / (n - k)),
            ClusterCorrection::Groups if g > 1.0 => g / (g - 1.0),
            _ => 1.0,
        }
    }
}

/// Liang–Zeger cluster-robust covariance.
///
/// `scores` holds `u_i` (residuals, or `w_i·(y_i − μ_i)` for GLMs);
/// `clusters` maps each row to a dense 0-based cluster index below
/// `n_clusters`. `k` is the parameter count used by the correction.
pub fn cluster_covariance(
    x: &DMatrix<f64>,
    scores: &DVector<f64>,
    bread: &DMatrix<f64>,
    clusters: &[usize],
    n_clusters: usize,
    k: usize,
    correction: ClusterCorrection,
) -> Result<DMatrix<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    if clusters.len() != n || scores.len() != n {
        return Err(Error::Validation(format!(
            "cluster ids ({}) / scores ({}) length != n ({})",
            clusters.len(),
            scores.len(),
            n
        )));
    }
    if n_clusters < 2 {
        return Err(Error::Validation(format!(
            "cluster-robust covariance needs at least 2 clusters, got {}",
            n_clusters
        )));
    }

    // Per-cluster score sums s_g = Σ_{i∈g} x_i u_i
    let mut s = DMatrix::<f64>::zeros(n_clusters, p);
    for (i, &g) in clusters.iter().enumerate() {
        let u = scores[i];
        for j in 0..p {
            s[(g, j)] += x[(i, j)] * u;
        }
    }
    let meat = s.transpose() * &s;
    let factor = correction.factor(n_clusters, n, k);
    Ok(bread * meat * bread * factor)
}

/// HC1 heteroskedasticity-robust covariance: HC0 scaled by `n/(n−k)`.
pub fn hc1_covariance(x: &DMatrix<f64>, resid: &DVector<f64>, bread: &DMatrix<f64>, df_resid: f64) -> DMatrix<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let mut meat = DMatrix::<f64>::zeros(p, p);
    for i in 0..n {
        let e2 = resid[i] * resid[i];
        for a in 0..p {
            let xa = x[(i, a)] * e2;
            for b in 0..p {
                meat[(a, b)] += xa * x[(i, b)];
            }
        }
    }
    let scale = if df_resid > 0.0 { n as f64 / df_resid } else { 1.0 };
    bread * meat * bread * scale
}

/// Standard errors from a covariance diagonal.
///
/// Negative round-off clamps to 0; a NaN variance stays NaN.
pub fn std_errors(cov: &DMatrix<f64>) -> Vec<f64> {
    (0..cov.nrows())
        .map(|j| {
            let v = cov[(j, j)];
            if v.is_nan() { f64::NAN } else { v.max(0.0).sqrt() }
        })
        .collect()
}

/// Row-major copy of a square matrix.
pub fn to_rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    (0..m.nrows()).map(|i| m.row(i).iter().copied().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn correction_factors() {
        assert_relative_eq!(ClusterCorrection::Stata.factor(4, 10, 2), (4.0 / 3.0) * (9.0 / 8.0));
        assert_relative_eq!(ClusterCorrection::Groups.factor(4, 10, 2), 4.0 / 3.0);
        assert_eq!(ClusterCorrection::None.factor(4, 10, 2), 1.0);
        assert_eq!(ClusterCorrection::Stata.factor(1, 10, 2), 1.0);
    }

    #[test]
    fn singleton_clusters_match_hc0() {
        // with every row its own cluster and no correction, CR0 == HC0
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let e = DVector::from_column_slice(&[0.5, -1.0, 0.25, 0.3]);
        let bread = (x.transpose() * &x).try_inverse().unwrap();
        let cr = cluster_covariance(&x, &e, &bread, &[0, 1, 2, 3], 4, 2, ClusterCorrection::None).unwrap();
        let hc = hc1_covariance(&x, &e, &bread, 4.0);
        for (a, b) in cr.iter().zip(hc.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn one_cluster_rejected() {
        let x = DMatrix::from_element(3, 1, 1.0);
        let e = DVector::from_element(3, 1.0);
        let bread = DMatrix::from_element(1, 1, 1.0 / 3.0);
        assert!(cluster_covariance(&x, &e, &bread, &[0, 0, 0], 1, 1, ClusterCorrection::Stata).is_err());
        assert!(cluster_covariance(&x, &e, &bread, &[0, 1], 2, 1, ClusterCorrection::Stata).is_err());
    }

    #[test]
    fn nan_variance_keeps_nan_standard_error() {
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, f64::NAN]);
        let se = std_errors(&cov);
        assert_eq!(se[0], 2.0);
        assert!(se[1].is_nan());
        let tiny = DMatrix::from_element(1, 1, -1e-18);
        assert_eq!(std_errors(&tiny), vec![0.0]);
    }
}
