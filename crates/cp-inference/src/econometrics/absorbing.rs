//! Absorbing least squares.
//!
//! Categorical factors are partialled out of `y` and every regressor. A
//! regressor that the factors explain completely is dropped as absorbed;
//! one that is a linear combination of regressors kept before it is
//! dropped as collinear. Both are reported in [`FittedModel::dropped`].

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use super::cluster::{ClusterCorrection, cluster_covariance, hc1_covariance, std_errors, to_rows};
use super::hdfe::FixedEffectsSolver;
use super::panel::absorb;
use crate::design::{AbsorbCovariance, Design};
use crate::linear::least_squares;
use crate::model::{CovarianceKind, FittedModel, INTERCEPT, Inference};

const ABSORBED_TOL: f64 = 1e-8;
const COLLINEAR_TOL: f64 = 1e-8;

/// Indices of columns of `x_dm` that carry variation not explained by the
/// factors or by earlier kept columns. Returns `(kept, absorbed, collinear)`.
fn select_columns(x: &DMatrix<f64>, x_dm: &DMatrix<f64>) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let mut kept = Vec::new();
    let mut absorbed = Vec::new();
    let mut collinear = Vec::new();
    // orthonormal basis of the kept, demeaned columns (modified Gram-Schmidt)
    let mut basis: Vec<DVector<f64>> = Vec::new();
    for j in 0..x_dm.ncols() {
        let raw = x.column(j).norm_squared().max(1.0);
        let mut v: DVector<f64> = x_dm.column(j).into_owned();
        let demeaned = v.norm_squared();
        if demeaned <= ABSORBED_TOL * raw {
            absorbed.push(j);
            continue;
        }
        for q in &basis {
            let c = q.dot(&v);
            v.axpy(-c, q, 1.0);
        }
        let rest = v.norm_squared();
        if rest <= COLLINEAR_TOL * demeaned {
            collinear.push(j);
            continue;
        }
        basis.push(v / rest.sqrt());
        kept.push(j);
    }
    (kept, absorbed, collinear)
}

/// Fit absorbing least squares on the factor columns `absorb_cols`.
pub fn absorbing_fit(
    design: &Design,
    dependent: &str,
    absorb_cols: &[String],
    covariance: &AbsorbCovariance,
) -> Result<FittedModel> {
    if absorb_cols.is_empty() {
        return Err(Error::Validation("absorbing needs at least one factor to absorb".into()));
    }
    let mut factors = Vec::with_capacity(absorb_cols.len());
    for c in absorb_cols {
        factors.push(design.groups(c)?.0);
    }
    let solver = FixedEffectsSolver::new(factors)?;
    let (x_dm, y_dm) = absorb(&solver, &design.x, &design.y, None)?;

    let (kept, absorbed, collinear) = select_columns(&design.x, &x_dm);
    let mut dropped = Vec::new();
    for &j in &absorbed {
        let name = &design.names[j];
        if name != INTERCEPT {
            log::warn!("absorbing: '{}' is absorbed by {:?} and was dropped", name, absorb_cols);
            dropped.push(name.clone());
        }
    }
    for &j in &collinear {
        log::warn!("absorbing: '{}' is collinear with earlier regressors and was dropped", design.names[j]);
        dropped.push(design.names[j].clone());
    }
    if kept.is_empty() {
        return Err(Error::Validation("absorbing: every regressor was absorbed or collinear".into()));
    }

    let x_kept = x_dm.select_columns(&kept);
    let names: Vec<String> = kept.iter().map(|&j| design.names[j].clone()).collect();
    let ls = least_squares(&x_kept, &y_dm)?;
    let n = design.n_obs();
    let k = kept.len();
    let rank_fe = solver.absorbed_rank();
    let df_resid = n as f64 - k as f64 - rank_fe as f64;
    if df_resid <= 0.0 {
        return Err(Error::Validation(format!(
            "absorbing: no residual degrees of freedom (n={}, k={}, absorbed={})",
            n, k, rank_fe
        )));
    }

    let (cov, kind) = match covariance {
        AbsorbCovariance::Unadjusted => (&ls.xtx_inv * (ls.rss / df_resid), CovarianceKind::Unadjusted),
        AbsorbCovariance::Robust => (hc1_covariance(&x_kept, &ls.resid, &ls.xtx_inv, df_resid), CovarianceKind::Robust),
        AbsorbCovariance::Clustered(column) => {
            let (codes, g) = design.groups(column)?;
            let v = cluster_covariance(&x_kept, &ls.resid, &ls.xtx_inv, &codes, g, k, ClusterCorrection::Stata)?;
            (v, CovarianceKind::Clustered { column: column.clone(), n_clusters: g })
        }
    };
    let tss = y_dm.norm_squared();

    Ok(FittedModel {
        estimator: "absorbing".into(),
        dependent: dependent.to_string(),
        names,
        coefficients: ls.beta.iter().copied().collect(),
        std_errors: std_errors(&cov),
        covariance: to_rows(&cov),
        covariance_kind: kind,
        inference: Inference::StudentT,
        n_obs: n,
        df_resid,
        df_model: k as f64,
        r_squared: Some(if tss > 0.0 { 1.0 - ls.rss / tss } else { f64::NAN }),
        dropped,
        n_groups: Some(solver.levels()[0]),
        iterations: None,
        converged: None,
        log_likelihood: None,
        scale: None,
    })
}
