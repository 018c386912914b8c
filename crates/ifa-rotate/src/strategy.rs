use crate::orthomax::{orthomax, OrthomaxConfig, OrthomaxFamily};
use crate::priorimax::{PriorimaxConfig, PriorimaxOptimizer};
use crate::report::{FitDiagnostics, RotationSource};
use ifa_core::{
    AgreementObjective, FaError, FaResult, IndexKind, LoadingMatrix, OverallObjective,
    RotationMatrix, RotationObjective, TargetMatrix,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Built-in rotation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMethod {
    /// Keep the extracted loadings as they are.
    None,
    /// Maximise agreement with the target.
    Priorimax,
    /// Maximise the overall (agreement and semantic) index.
    Interpmax,
    Varimax,
    Quartimax,
    Equamax,
}

impl RotationMethod {
    pub const ALL: [RotationMethod; 6] = [
        RotationMethod::None,
        RotationMethod::Priorimax,
        RotationMethod::Interpmax,
        RotationMethod::Varimax,
        RotationMethod::Quartimax,
        RotationMethod::Equamax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationMethod::None => "none",
            RotationMethod::Priorimax => "priorimax",
            RotationMethod::Interpmax => "interpmax",
            RotationMethod::Varimax => "varimax",
            RotationMethod::Quartimax => "quartimax",
            RotationMethod::Equamax => "equamax",
        }
    }

    fn orthomax_family(&self) -> Option<OrthomaxFamily> {
        match self {
            RotationMethod::Varimax => Some(OrthomaxFamily::Varimax),
            RotationMethod::Quartimax => Some(OrthomaxFamily::Quartimax),
            RotationMethod::Equamax => Some(OrthomaxFamily::Equamax),
            _ => None,
        }
    }
}

impl fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotationMethod {
    type Err = FaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        RotationMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == tag)
            .ok_or_else(|| FaError::UnsupportedRotationMethod(s.to_string()))
    }
}

/// Per-call knobs handed to a strategy.
#[derive(Debug, Clone)]
pub struct RotationRequest {
    pub time_budget_seconds: f64,
    pub priorimax: PriorimaxConfig,
    pub orthomax: OrthomaxConfig,
    pub initial: Option<RotationMatrix>,
}

impl RotationRequest {
    pub fn new(time_budget_seconds: f64) -> Self {
        Self {
            time_budget_seconds,
            priorimax: PriorimaxConfig::default(),
            orthomax: OrthomaxConfig::default(),
            initial: None,
        }
    }

    pub fn with_priorimax(mut self, config: PriorimaxConfig) -> Self {
        self.priorimax = config;
        self
    }

    pub fn with_initial(mut self, initial: RotationMatrix) -> Self {
        self.initial = Some(initial);
        self
    }
}

/// Produces an orthogonal rotation of some loadings.
pub trait RotationStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn rotate(
        &self,
        loadings: &LoadingMatrix,
        target: &TargetMatrix,
        request: &RotationRequest,
    ) -> FaResult<(RotationMatrix, FitDiagnostics)>;
}

impl RotationStrategy for RotationMethod {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn rotate(
        &self,
        loadings: &LoadingMatrix,
        target: &TargetMatrix,
        request: &RotationRequest,
    ) -> FaResult<(RotationMatrix, FitDiagnostics)> {
        match self {
            RotationMethod::None => {
                let rotation = request
                    .initial
                    .clone()
                    .unwrap_or_else(|| RotationMatrix::identity(loadings.n_factors()));
                let diagnostics = FitDiagnostics::simple(self.as_str(), RotationSource::Initial, true);
                Ok((rotation, diagnostics))
            }
            RotationMethod::Priorimax => {
                let objective = AgreementObjective::new(target);
                search(self.as_str(), &objective, loadings, request)
            }
            RotationMethod::Interpmax => {
                let objective = OverallObjective::new(target)?;
                search(self.as_str(), &objective, loadings, request)
            }
            RotationMethod::Varimax | RotationMethod::Quartimax | RotationMethod::Equamax => {
                let family = self
                    .orthomax_family()
                    .ok_or_else(|| FaError::UnsupportedRotationMethod(self.to_string()))?;
                let fit = orthomax(loadings, family, &request.orthomax)?;
                let mut diagnostics = FitDiagnostics::simple(
                    self.as_str(),
                    RotationSource::Baseline { method: family },
                    fit.converged,
                );
                diagnostics.objective = Some(IndexKind::AGREEMENT.to_string());
                diagnostics.objective_value = Some(ifa_core::agreement_index(
                    &loadings.rotate(&fit.rotation)?,
                    target,
                )?);
                Ok((fit.rotation, diagnostics))
            }
        }
    }
}

fn search<O: RotationObjective>(
    method: &str,
    objective: &O,
    loadings: &LoadingMatrix,
    request: &RotationRequest,
) -> FaResult<(RotationMatrix, FitDiagnostics)> {
    let mut optimizer = PriorimaxOptimizer::new(objective, loadings, request.priorimax.clone())?;
    if let Some(initial) = &request.initial {
        optimizer = optimizer.with_initial(initial.clone())?;
    }
    let outcome = optimizer.run(request.time_budget_seconds)?;
    let diagnostics = outcome.diagnostics(method, objective.name());
    Ok((outcome.rotation, diagnostics))
}
