//! Panel within estimator with entity and/or time fixed effects.
//!
//! Entity and time effects are absorbed by [`FixedEffectsSolver`] (one pass
//! for a single factor, alternating projections for two). OLS on the
//! demeaned data gives the slopes; residual degrees of freedom are
//! `n − k − rank(FE)`.
//!
//! # References
//!
//! - Wooldridge, *Econometric Analysis of Cross Section and Panel Data*, Ch. 10.
//! - Arellano (1987), "Computing robust standard errors for within-groups estimators."

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use super::cluster::{ClusterCorrection, cluster_covariance, std_errors, to_rows};
use super::hdfe::FixedEffectsSolver;
use crate::design::{Design, PanelCluster};
use crate::linear::least_squares;
use crate::model::{CovarianceKind, FittedModel, Inference};

/// Options of [`panel_fe_fit`].
#[derive(Debug, Clone)]
pub struct PanelOptions<'a> {
    /// Entity column.
    pub entity: &'a str,
    /// Time column.
    pub time: &'a str,
    /// Absorb entity effects.
    pub entity_effects: bool,
    /// Absorb time effects.
    pub time_effects: bool,
    /// Cluster dimension.
    pub cluster: &'a PanelCluster,
    /// Correction for clustered covariance.
    pub correction: ClusterCorrection,
}

/// Demean every column of `x` and `y` by the solver's factors.
pub(crate) fn absorb(
    solver: &FixedEffectsSolver,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    weights: Option<&[f64]>,
) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let (n, k) = x.shape();
    let mut x_dm = DMatrix::zeros(n, k);
    for j in 0..k {
        let col: Vec<f64> = x.column(j).iter().copied().collect();
        let r = solver.partial_out_weighted(&col, weights)?;
        x_dm.set_column(j, &DVector::from_vec(r));
    }
    let y_dm = DVector::from_vec(solver.partial_out_weighted(y.as_slice(), weights)?);
    Ok((x_dm, y_dm))
}

/// Fit the within estimator. `design` must not contain an intercept column.
pub fn panel_fe_fit(design: &Design, dependent: &str, opts: &PanelOptions<'_>) -> Result<FittedModel> {
    if !opts.entity_effects && !opts.time_effects {
        return Err(Error::Validation("panel_fe needs entity_effects and/or time_effects".into()));
    }
    let (entity_codes, n_entities) = design.groups(opts.entity)?;
    let (time_codes, n_times) = design.groups(opts.time)?;
    let mut factors = Vec::new();
    if opts.entity_effects {
        factors.push(entity_codes.clone());
    }
    if opts.time_effects {
        factors.push(time_codes.clone());
    }
    let solver = FixedEffectsSolver::new(factors)?;
    let (x_dm, y_dm) = absorb(&solver, &design.x, &design.y, None)?;

    let ls = least_squares(&x_dm, &y_dm)
        .map_err(|e| Error::Computation(format!("panel_fe: {} (a regressor may be absorbed by the effects)", e)))?;
    let n = design.n_obs();
    let k = x_dm.ncols();
    let rank_fe = solver.absorbed_rank();
    let df_resid = n as f64 - k as f64 - rank_fe as f64;
    if df_resid <= 0.0 {
        return Err(Error::Validation(format!(
            "panel_fe: no residual degrees of freedom (n={}, k={}, absorbed={})",
            n, k, rank_fe
        )));
    }

    let cluster = match opts.cluster {
        PanelCluster::Unadjusted => None,
        PanelCluster::Entity => Some((opts.entity.to_string(), entity_codes, n_entities)),
        PanelCluster::Time => Some((opts.time.to_string(), time_codes, n_times)),
        PanelCluster::Column(c) => {
            let (codes, g) = design.groups(c)?;
            Some((c.clone(), codes, g))
        }
    };
    let (covariance, kind) = match cluster {
        None => (&ls.xtx_inv * (ls.rss / df_resid), CovarianceKind::Unadjusted),
        Some((column, codes, g)) => {
            let v = cluster_covariance(&x_dm, &ls.resid, &ls.xtx_inv, &codes, g, k, opts.correction)?;
            (v, CovarianceKind::Clustered { column, n_clusters: g })
        }
    };

    let tss = y_dm.norm_squared();
    let r2_within = if tss > 0.0 { 1.0 - ls.rss / tss } else { f64::NAN };
    log::debug!(
        "panel_fe: n={} k={} entities={} periods={} absorbed rank={}",
        n,
        k,
        n_entities,
        n_times,
        rank_fe
    );

    Ok(FittedModel {
        estimator: "panel_fe".into(),
        dependent: dependent.to_string(),
        names: design.names.clone(),
        coefficients: ls.beta.iter().copied().collect(),
        std_errors: std_errors(&covariance),
        covariance: to_rows(&covariance),
        covariance_kind: kind,
        inference: Inference::StudentT,
        n_obs: n,
        df_resid,
        df_model: k as f64,
        r_squared: Some(r2_within),
        dropped: Vec::new(),
        n_groups: Some(if opts.entity_effects { n_entities } else { n_times }),
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

    fn panel(y: Vec<f64>, x: Vec<f64>, entity: Vec<f64>, time: Vec<f64>) -> Design {
        let f = Frame::from_columns(vec![
            ("y", Column::Float(y)),
            ("x", Column::Float(x)),
            ("block", Column::Float(entity)),
            ("month", Column::Float(time)),
        ])
        .unwrap();
        Design::build(&f, "y", &["x".to_string()], false, None, &["block".to_string(), "month".to_string()])
            .unwrap()
    }

    fn opts<'a>(cluster: &'a PanelCluster, time_effects: bool) -> PanelOptions<'a> {
        PanelOptions {
            entity: "block",
            time: "month",
            entity_effects: true,
            time_effects,
            cluster,
            correction: ClusterCorrection::Stata,
        }
    }

    #[test]
    fn entity_effects_recover_common_slope() {
        let d = panel(
            vec![2.0, 4.0, 6.0, 20.0, 40.0, 60.0],
            vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0],
            vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0],
            vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0],
        );
        let cl = PanelCluster::Unadjusted;
        let m = panel_fe_fit(&d, "y", &opts(&cl, false)).unwrap();
        assert_relative_eq!(m.coefficients[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(m.r_squared.unwrap(), 1.0, epsilon = 1e-10);
        // 6 obs - 1 slope - 2 entity effects
        assert_eq!(m.df_resid, 3.0);
    }

    #[test]
    fn two_way_effects_with_noise() {
        // y = a_e + d_t + 3x + e
        let entity = vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 4.0, 4.0];
        let time = vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        let x = vec![0.5, 1.0, 2.5, 1.5, 0.2, 1.1, 3.0, 2.2, 0.7, 1.9, 2.8, 0.4];
        let noise = [0.05, -0.02, -0.03, -0.04, 0.01, 0.03, 0.02, 0.02, -0.04, -0.03, -0.01, 0.04];
        let y: Vec<f64> = (0..12)
            .map(|i| entity[i] * 10.0 + time[i] * 2.0 + 3.0 * x[i] + noise[i])
            .collect();
        let d = panel(y, x, entity, time);
        let cl = PanelCluster::Entity;
        let m = panel_fe_fit(&d, "y", &opts(&cl, true)).unwrap();
        assert!((m.coefficients[0] - 3.0).abs() < 0.05, "beta {}", m.coefficients[0]);
        // 12 - 1 - (4 + 3 - 1)
        assert_eq!(m.df_resid, 5.0);
        assert_eq!(m.covariance_kind, CovarianceKind::Clustered { column: "block".into(), n_clusters: 4 });
        assert!(m.std_errors[0] > 0.0);
    }

    #[test]
    fn time_invariant_regressor_is_an_error() {
        let d = panel(
            vec![1.0, 2.0, 3.0, 5.0],
            vec![1.0, 1.0, 2.0, 2.0],
            vec![1.0, 1.0, 2.0, 2.0],
            vec![1.0, 2.0, 1.0, 2.0],
        );
        let cl = PanelCluster::Entity;
        assert!(panel_fe_fit(&d, "y", &opts(&cl, false)).is_err());
    }
}
