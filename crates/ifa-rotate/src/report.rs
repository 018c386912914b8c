use crate::orthomax::OrthomaxFamily;
use crate::search::StopReason;
use serde::{Deserialize, Serialize};

/// Where the winning rotation of a fit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RotationSource {
    /// The starting rotation, returned unchanged.
    Initial,
    /// Best point of a priorimax restart.
    Search { restart: usize },
    /// An orthomax rotation.
    Baseline { method: OrthomaxFamily },
    /// A strategy registered on the rotator.
    External { name: String },
}

/// Per-restart summary of a priorimax search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartReport {
    pub restart: usize,
    pub seed: u64,
    pub start_index: Option<f64>,
    pub index: Option<f64>,
    pub evaluations: usize,
    pub generations: usize,
    pub stop: Option<StopReason>,
    /// Set when the restart was discarded.
    pub error: Option<String>,
}

impl RestartReport {
    pub(crate) fn failed(restart: usize, seed: u64, error: String) -> Self {
        Self {
            restart,
            seed,
            start_index: None,
            index: None,
            evaluations: 0,
            generations: 0,
            stop: None,
            error: Some(error),
        }
    }

    pub fn converged(&self) -> bool {
        self.stop == Some(StopReason::Converged)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub method: OrthomaxFamily,
    pub index: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// What a rotation strategy reports alongside its rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub method: String,
    /// Objective the strategy maximised, if any.
    pub objective: Option<String>,
    /// Value of that objective at the returned rotation.
    pub objective_value: Option<f64>,
    pub elapsed_seconds: f64,
    pub converged: bool,
    pub source: RotationSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restarts: Vec<RestartReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub baselines: Vec<BaselineReport>,
}

impl FitDiagnostics {
    /// Diagnostics of a closed-form or external rotation.
    pub fn simple(method: impl Into<String>, source: RotationSource, converged: bool) -> Self {
        Self {
            method: method.into(),
            objective: None,
            objective_value: None,
            elapsed_seconds: 0.0,
            converged,
            source,
            restarts: Vec::new(),
            baselines: Vec::new(),
        }
    }

    pub fn discarded_restarts(&self) -> usize {
        self.restarts.iter().filter(|r| r.error.is_some()).count()
    }
}
