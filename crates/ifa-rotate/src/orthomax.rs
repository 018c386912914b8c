//! Orthomax rotations (varimax, quartimax, equamax).
//!
//! Uses the SVD iteration on Kaiser-normalised loadings: with `B = L̃R`,
//! `R ← UVᵗ` where `UΣVᵗ = L̃ᵗ(B³ − γ/n · B·diag(ΣB²))`, until the sum of
//! singular values stops growing by more than a relative `tolerance`.

use ifa_core::{FaError, FaResult, LoadingMatrix, RotationMatrix};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrthomaxFamily {
    Varimax,
    Quartimax,
    Equamax,
}

impl OrthomaxFamily {
    pub const ALL: [OrthomaxFamily; 3] = [
        OrthomaxFamily::Varimax,
        OrthomaxFamily::Quartimax,
        OrthomaxFamily::Equamax,
    ];

    /// Orthomax weight γ for `k` factors.
    pub fn gamma(&self, k: usize) -> f64 {
        match self {
            OrthomaxFamily::Quartimax => 0.0,
            OrthomaxFamily::Varimax => 1.0,
            OrthomaxFamily::Equamax => k as f64 / 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrthomaxFamily::Varimax => "varimax",
            OrthomaxFamily::Quartimax => "quartimax",
            OrthomaxFamily::Equamax => "equamax",
        }
    }
}

impl fmt::Display for OrthomaxFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrthomaxConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Kaiser row normalisation before rotating.
    pub normalize: bool,
}

impl Default for OrthomaxConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-5,
            normalize: true,
        }
    }
}

impl OrthomaxConfig {
    pub fn validate(&self) -> FaResult<()> {
        if self.max_iterations == 0 {
            return Err(FaError::InvalidConfig(
                "orthomax max_iterations must be positive".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(FaError::InvalidConfig(format!(
                "orthomax tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrthomaxFit {
    pub rotation: RotationMatrix,
    pub iterations: usize,
    pub converged: bool,
}

pub fn orthomax(
    loadings: &LoadingMatrix,
    family: OrthomaxFamily,
    config: &OrthomaxConfig,
) -> FaResult<OrthomaxFit> {
    config.validate()?;
    let (n, k) = (loadings.n_variables(), loadings.n_factors());
    let gamma = family.gamma(k);

    let mut l = loadings.as_matrix().clone();
    if config.normalize {
        for mut row in l.row_iter_mut() {
            let norm = row.norm();
            if norm > 0.0 {
                row.unscale_mut(norm);
            }
        }
    }

    let mut rotation = DMatrix::<f64>::identity(k, k);
    let mut d = 0.0;
    let mut iterations = 0;
    let mut converged = false;
    while iterations < config.max_iterations {
        iterations += 1;
        let b = &l * &rotation;
        let cubed = b.map(|v| v.powi(3));
        let col_ss = DVector::from_iterator(k, b.column_iter().map(|c| c.norm_squared()));
        let target = cubed - (&b * DMatrix::from_diagonal(&col_ss)) * (gamma / n as f64);
        let svd = (l.transpose() * target).svd(true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => return Err(FaError::Numerical("orthomax SVD did not converge".to_string())),
        };
        rotation = u * v_t;
        let d_old = d;
        d = svd.singular_values.sum();
        if d_old != 0.0 && d < d_old * (1.0 + config.tolerance) {
            converged = true;
            break;
        }
    }
    debug!(
        family = family.as_str(),
        iterations,
        converged,
        criterion = d,
        "orthomax finished"
    );
    Ok(OrthomaxFit {
        rotation: RotationMatrix::new(rotation)?,
        iterations,
        converged,
    })
}
