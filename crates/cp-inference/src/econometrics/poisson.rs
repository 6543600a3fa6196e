//! Poisson pseudo-maximum-likelihood with entity fixed effects.
//!
//! IRLS on the working variable `z = η + (y − μ)/μ` with working weights
//! `ω = w·μ`. Each iteration partials the entity effects out of `z` and
//! `X` with ω-weighted group means, solves the weighted least-squares
//! problem and updates `η = z − ẑ_resid`. Entities whose outcome sums to
//! zero carry no information and are dropped before fitting.
//!
//! # References
//!
//! - Santos Silva & Tenreyro (2006), "The Log of Gravity." *REStat*.
//! - Correia, Guimarães & Zylkin (2020), "Fast Poisson estimation with
//!   high-dimensional fixed effects." *Stata Journal*.

use std::collections::HashMap;

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use statrs::function::gamma::ln_gamma;

use super::cluster::{ClusterCorrection, cluster_covariance, std_errors, to_rows};
use super::hdfe::FixedEffectsSolver;
use super::panel::absorb;
use crate::design::Design;
use crate::linear::weighted_least_squares;
use crate::model::{CovarianceKind, FittedModel, Inference};

/// Options of [`fe_poisson_fit`].
#[derive(Debug, Clone)]
pub struct PoissonOptions<'a> {
    /// Entity column.
    pub entity: &'a str,
    /// Weight column.
    pub weights: Option<&'a str>,
    /// Cluster column; model-based covariance when `None`.
    pub cluster: Option<&'a str>,
    /// IRLS iteration cap.
    pub max_iter: usize,
    /// Tolerance on the relative deviance change.
    pub tol: f64,
}

fn deviance(y: &[f64], mu: &[f64], w: &[f64]) -> f64 {
    let mut d = 0.0;
    for i in 0..y.len() {
        let term = if y[i] > 0.0 { y[i] * (y[i] / mu[i]).ln() } else { 0.0 };
        d += w[i] * (term - (y[i] - mu[i]));
    }
    2.0 * d
}

fn log_likelihood(y: &[f64], mu: &[f64], w: &[f64]) -> f64 {
    (0..y.len()).map(|i| w[i] * (y[i] * mu[i].ln() - mu[i] - ln_gamma(y[i] + 1.0))).sum()
}

/// Fit FE-Poisson. `design` must not contain an intercept column.
pub fn fe_poisson_fit(design: &Design, dependent: &str, opts: &PoissonOptions<'_>) -> Result<FittedModel> {
    if design.y.iter().any(|&v| v < 0.0) {
        return Err(Error::Validation(format!("fe_poisson: '{}' has negative values", dependent)));
    }
    let (entity_all, n_entities_all) = design.groups(opts.entity)?;
    let w_all: Vec<f64> = match opts.weights {
        Some(c) => {
            let w = design.rows.floats(c)?.to_vec();
            if w.iter().any(|&v| !(v > 0.0)) {
                return Err(Error::Validation(format!("fe_poisson: weights in '{}' must be positive", c)));
            }
            w
        }
        None => vec![1.0; design.n_obs()],
    };

    // drop entities with an all-zero outcome
    let mut sums = vec![0.0; n_entities_all];
    for (i, &g) in entity_all.iter().enumerate() {
        sums[g] += design.y[i];
    }
    let keep: Vec<usize> = (0..design.n_obs()).filter(|&i| sums[entity_all[i]] > 0.0).collect();
    let n_dropped_entities = sums.iter().filter(|&&s| s <= 0.0).count();
    if n_dropped_entities > 0 {
        log::info!(
            "fe_poisson: dropped {} entities ({} rows) whose outcome is always zero",
            n_dropped_entities,
            design.n_obs() - keep.len()
        );
    }
    if keep.is_empty() {
        return Err(Error::Validation("fe_poisson: every entity has a zero outcome".into()));
    }

    let n = keep.len();
    let k = design.x.ncols();
    let x = design.x.select_rows(&keep);
    let y: Vec<f64> = keep.iter().map(|&i| design.y[i]).collect();
    let w: Vec<f64> = keep.iter().map(|&i| w_all[i]).collect();
    // re-densify entity codes over surviving rows
    let mut remap = vec![usize::MAX; n_entities_all];
    let mut entity = Vec::with_capacity(n);
    let mut n_entities = 0;
    for &i in &keep {
        let g = entity_all[i];
        if remap[g] == usize::MAX {
            remap[g] = n_entities;
            n_entities += 1;
        }
        entity.push(remap[g]);
    }
    let solver = FixedEffectsSolver::new(vec![entity])?;

    let w_sum: f64 = w.iter().sum();
    let y_bar = y.iter().zip(&w).map(|(a, b)| a * b).sum::<f64>() / w_sum;
    let mut mu: Vec<f64> = y.iter().map(|&v| 0.5 * (v + y_bar)).collect();
    let mut eta: Vec<f64> = mu.iter().map(|m| m.ln()).collect();
    let mut dev = deviance(&y, &mu, &w);
    let mut beta = DVector::zeros(k);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=opts.max_iter {
        iterations = iter;
        let z: Vec<f64> = (0..n).map(|i| eta[i] + (y[i] - mu[i]) / mu[i]).collect();
        let omega: Vec<f64> = (0..n).map(|i| w[i] * mu[i]).collect();
        let (xd, zd) = absorb(&solver, &x, &DVector::from_vec(z.clone()), Some(&omega))?;
        let (b, _) = weighted_least_squares(&xd, &zd, &DVector::from_column_slice(&omega))?;
        let resid = &zd - &xd * &b;
        for i in 0..n {
            eta[i] = z[i] - resid[i];
            mu[i] = eta[i].exp();
        }
        beta = b;
        let new_dev = deviance(&y, &mu, &w);
        let change = (new_dev - dev).abs() / new_dev.min(dev).max(0.1);
        log::trace!("fe_poisson iter {}: deviance {:.10} (rel change {:.3e})", iter, new_dev, change);
        dev = new_dev;
        if change < opts.tol {
            converged = true;
            break;
        }
    }
    if !converged {
        log::warn!("fe_poisson: IRLS did not converge in {} iterations", opts.max_iter);
    }

    // weighted within-design at the converged μ
    let omega: Vec<f64> = (0..n).map(|i| w[i] * mu[i]).collect();
    let mut x_dm = DMatrix::zeros(n, k);
    for j in 0..k {
        let col: Vec<f64> = x.column(j).iter().copied().collect();
        x_dm.set_column(j, &DVector::from_vec(solver.partial_out_weighted(&col, Some(&omega))?));
    }
    let mut xtwx = DMatrix::<f64>::zeros(k, k);
    for i in 0..n {
        for a in 0..k {
            let xa = x_dm[(i, a)] * omega[i];
            for b in 0..k {
                xtwx[(a, b)] += xa * x_dm[(i, b)];
            }
        }
    }
    let bread = xtwx
        .try_inverse()
        .ok_or_else(|| Error::Computation("fe_poisson: information matrix is singular".into()))?;

    let (cov, kind) = match opts.cluster {
        None => (bread.clone(), CovarianceKind::ModelBased),
        Some(column) => {
            let (codes_all, _) = design.groups(column)?;
            let mut remap = HashMap::new();
            let codes: Vec<usize> = keep
                .iter()
                .map(|&i| {
                    let next = remap.len();
                    *remap.entry(codes_all[i]).or_insert(next)
                })
                .collect();
            let g = remap.len();
            let scores = DVector::from_iterator(n, (0..n).map(|i| w[i] * (y[i] - mu[i])));
            let v = cluster_covariance(&x_dm, &scores, &bread, &codes, g, k, ClusterCorrection::Groups)?;
            (v, CovarianceKind::Clustered { column: column.to_string(), n_clusters: g })
        }
    };

    Ok(FittedModel {
        estimator: "fe_poisson".into(),
        dependent: dependent.to_string(),
        names: design.names.clone(),
        coefficients: beta.iter().copied().collect(),
        std_errors: std_errors(&cov),
        covariance: to_rows(&cov),
        covariance_kind: kind,
        inference: Inference::Normal,
        n_obs: n,
        df_resid: n as f64 - k as f64 - n_entities as f64,
        df_model: k as f64,
        r_squared: None,
        dropped: Vec::new(),
        n_groups: Some(n_entities),
        iterations: Some(iterations),
        converged: Some(converged),
        log_likelihood: Some(log_likelihood(&y, &mu, &w)),
        scale: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cp_core::{Column, Frame};

    fn opts(cluster: Option<&str>) -> PoissonOptions<'_> {
        PoissonOptions { entity: "block", weights: None, cluster, max_iter: 200, tol: 1e-12 }
    }

    fn data() -> Frame {
        // y = exp(a_g + 0.5 x) for three blocks, plus one block that never has thefts
        let alpha: [f64; 3] = [0.2, 1.0, -0.5];
        let x: [f64; 12] = [0.0, 1.0, 2.0, 3.0, 0.5, 1.5, 2.5, 0.2, 1.2, 2.2, 0.0, 1.0];
        let mut block = Vec::new();
        let mut y = Vec::new();
        for i in 0..12 {
            let g = i / 3;
            block.push(g as f64);
            y.push(if g < 3 { (alpha[g] + 0.5 * x[i]).exp() } else { 0.0 });
        }
        Frame::from_columns(vec![
            ("thefts", Column::Float(y)),
            ("x", Column::Float(x.to_vec())),
            ("block", Column::Float(block)),
        ])
        .unwrap()
    }

    fn design(aux: &[&str]) -> Design {
        let aux: Vec<String> = aux.iter().map(|s| s.to_string()).collect();
        Design::build(&data(), "thefts", &["x".to_string()], false, None, &aux).unwrap()
    }

    #[test]
    fn recovers_exact_rate() {
        let m = fe_poisson_fit(&design(&["block"]), "thefts", &opts(None)).unwrap();
        assert!(m.converged.unwrap());
        assert_relative_eq!(m.coefficients[0], 0.5, epsilon = 1e-6);
        assert_eq!(m.n_obs, 9);
        assert_eq!(m.n_groups, Some(3));
        assert_eq!(m.covariance_kind, CovarianceKind::ModelBased);
        let irr = m.incidence_rate_ratios().unwrap();
        assert_relative_eq!(irr[0].estimate, 0.5f64.exp(), epsilon = 1e-5);
        assert_relative_eq!(irr[0].std_error, irr[0].estimate * m.std_errors[0], epsilon = 1e-12);
        assert!(m.log_likelihood.unwrap().is_finite());
    }

    #[test]
    fn clustered_covariance_on_surviving_rows() {
        let m = fe_poisson_fit(&design(&["block"]), "thefts", &opts(Some("block"))).unwrap();
        assert_eq!(m.covariance_kind, CovarianceKind::Clustered { column: "block".into(), n_clusters: 3 });
        assert!(m.std_errors[0].is_finite());
    }

    #[test]
    fn negative_outcome_rejected() {
        let mut f = data();
        let mut y = f.floats("thefts").unwrap().to_vec();
        y[0] = -1.0;
        f.insert_floats("thefts", y).unwrap();
        let d = Design::build(&f, "thefts", &["x".to_string()], false, None, &["block".to_string()]).unwrap();
        assert!(fe_poisson_fit(&d, "thefts", &opts(None)).is_err());
    }
}
