//! Huber M-estimation by iteratively reweighted least squares.
//!
//! Scale is the median absolute residual (centered at zero) divided by
//! 0.6745, re-estimated every iteration. The covariance is Huber's H1:
//!
//! `V = K² · [Σψ(rᵢ)² / (n−p)] · s² / [Σψ'(rᵢ)/n]² · (X'X)⁻¹`,
//! `K = 1 + (p/n) · Var(ψ') / E[ψ']²`.
//!
//! # References
//!
//! - Huber (1981), *Robust Statistics*, §7.6.
//! - Holland & Welsch (1977), "Robust regression using iteratively
//!   reweighted least-squares."

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use crate::design::Design;
use crate::econometrics::cluster::{std_errors, to_rows};
use crate::linear::{least_squares, weighted_least_squares};
use crate::model::{CovarianceKind, FittedModel, INTERCEPT, Inference};

const MAD_NORMAL: f64 = 0.674_489_750_196_081_7;
const MIN_SCALE: f64 = 1e-12;

fn median(v: &mut [f64]) -> f64 {
    v.sort_by(f64::total_cmp);
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 { v[n / 2] } else { 0.5 * (v[n / 2 - 1] + v[n / 2]) }
}

/// Normalized median absolute deviation around zero.
pub fn mad_scale(resid: &DVector<f64>) -> f64 {
    let mut abs: Vec<f64> = resid.iter().map(|r| r.abs()).collect();
    median(&mut abs) / MAD_NORMAL
}

#[inline]
fn rho(z: f64, t: f64) -> f64 {
    if z.abs() <= t { 0.5 * z * z } else { t * z.abs() - 0.5 * t * t }
}

#[inline]
fn psi(z: f64, t: f64) -> f64 {
    z.clamp(-t, t)
}

#[inline]
fn psi_deriv(z: f64, t: f64) -> f64 {
    if z.abs() <= t { 1.0 } else { 0.0 }
}

#[inline]
fn weight(z: f64, t: f64) -> f64 {
    if z.abs() <= t { 1.0 } else { t / z.abs() }
}

fn objective(resid: &DVector<f64>, scale: f64, t: f64) -> f64 {
    resid.iter().map(|r| rho(r / scale, t)).sum()
}

/// Fit a Huber M-estimator.
pub fn fit_huber(design: &Design, dependent: &str, tuning: f64, max_iter: usize, tol: f64) -> Result<FittedModel> {
    if !(tuning > 0.0) {
        return Err(Error::Validation(format!("Huber tuning constant must be > 0, got {}", tuning)));
    }
    let x = &design.x;
    let y = &design.y;
    let (n, p) = x.shape();
    if n <= p {
        return Err(Error::Validation(format!("huber: no residual degrees of freedom (n={}, k={})", n, p)));
    }
    let ls = least_squares(x, y)?;
    let xtx_inv: DMatrix<f64> = ls.xtx_inv.clone();

    let mut beta = ls.beta;
    let mut resid = ls.resid;
    let mut scale = mad_scale(&resid);
    let mut converged = false;
    let mut iterations = 0;

    if scale < MIN_SCALE {
        log::warn!("huber: residual scale is ~0, returning the least-squares fit");
        converged = true;
    } else {
        let mut dev = objective(&resid, scale, tuning);
        for iter in 1..=max_iter {
            iterations = iter;
            let w = DVector::from_iterator(n, resid.iter().map(|r| weight(r / scale, tuning)));
            let (b, _) = weighted_least_squares(x, y, &w)?;
            beta = b;
            resid = y - x * &beta;
            let s = mad_scale(&resid);
            if s < MIN_SCALE {
                converged = true;
                break;
            }
            scale = s;
            let new_dev = objective(&resid, scale, tuning);
            if (new_dev - dev).abs() <= tol {
                converged = true;
                break;
            }
            dev = new_dev;
        }
        if !converged {
            log::warn!("huber: IRLS did not converge in {} iterations", max_iter);
        }
    }

    let covariance = if scale < MIN_SCALE {
        DMatrix::zeros(p, p)
    } else {
        let z: Vec<f64> = resid.iter().map(|r| r / scale).collect();
        let dpsi: Vec<f64> = z.iter().map(|&v| psi_deriv(v, tuning)).collect();
        let nf = n as f64;
        let m = dpsi.iter().sum::<f64>() / nf;
        if m <= 0.0 {
            return Err(Error::Computation("huber: every residual is beyond the tuning constant".into()));
        }
        let var_dpsi = dpsi.iter().map(|d| (d - m) * (d - m)).sum::<f64>() / nf;
        let k = 1.0 + (p as f64 / nf) * var_dpsi / (m * m);
        let ss_psi: f64 = z.iter().map(|&v| psi(v, tuning).powi(2)).sum();
        let df = (n - p) as f64;
        &xtx_inv * (k * k * (ss_psi / df) * scale * scale / (m * m))
    };
    let has_const = design.names.first().is_some_and(|c| c == INTERCEPT);
    log::debug!("huber: {} iterations, scale {:.6}", iterations, scale);

    Ok(FittedModel {
        estimator: "huber".into(),
        dependent: dependent.to_string(),
        names: design.names.clone(),
        coefficients: beta.iter().copied().collect(),
        std_errors: std_errors(&covariance),
        covariance: to_rows(&covariance),
        covariance_kind: CovarianceKind::HuberH1,
        inference: Inference::Normal,
        n_obs: n,
        df_resid: (n - p) as f64,
        df_model: (p - usize::from(has_const)) as f64,
        r_squared: None,
        dropped: Vec::new(),
        n_groups: None,
        iterations: Some(iterations),
        converged: Some(converged),
        log_likelihood: None,
        scale: Some(scale),
    })
}
