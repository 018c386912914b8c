//! Multi-start search for the orthogonal rotation that maximises an
//! interpretability objective.
//!
//! Candidates are parametrised as `R = R₀·C(S)` where `C` is the Cayley
//! transform of a skew-symmetric `S` whose `k(k−1)/2` free entries live in a
//! box. Every candidate is therefore orthogonal by construction and the
//! searchers only see a bounded real vector. Restart 0 starts at `S = 0`, so
//! the result never scores below `R₀`.

use crate::orthomax::{orthomax, OrthomaxConfig, OrthomaxFamily};
use crate::report::{BaselineReport, FitDiagnostics, RestartReport, RotationSource};
use crate::search::{
    evolve, nelder_mead, Deadline, Probe, SearchAlgorithm, SearchSettings, SearchSpace,
};
use ifa_config::{base_seed, derive_seed, lock_reduction_order};
use ifa_core::{
    cayley, skew_param_count, FaError, FaResult, IndexScratch, LoadingMatrix, RotationMatrix,
    RotationObjective,
};
use nalgebra::DMatrix;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, debug_span, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriorimaxConfig {
    pub algorithm: SearchAlgorithm,
    pub restarts: usize,
    /// Step-size (evolution) or simplex-diameter (Nelder–Mead) tolerance.
    pub tolerance: f64,
    /// Minimum objective gain that resets the stall counter.
    pub value_tolerance: f64,
    pub stall_generations: usize,
    /// Offspring per generation; derived from the dimension when unset.
    pub population: Option<usize>,
    pub initial_step: f64,
    /// Evaluation cap per restart.
    pub max_evaluations: Option<usize>,
    /// Half-width of the Cayley parameter box.
    pub bound: f64,
    pub seed: Option<u64>,
    pub parallel: bool,
    /// Also score varimax, quartimax and equamax and keep them if they win.
    pub include_baselines: bool,
}

impl Default for PriorimaxConfig {
    fn default() -> Self {
        Self {
            algorithm: SearchAlgorithm::Evolution,
            restarts: 4,
            tolerance: 1e-4,
            value_tolerance: 1e-10,
            stall_generations: 30,
            population: None,
            initial_step: 0.3,
            max_evaluations: None,
            bound: 1.0,
            seed: None,
            parallel: true,
            include_baselines: true,
        }
    }
}

impl PriorimaxConfig {
    pub fn validate(&self) -> FaResult<()> {
        let invalid = |msg: String| -> FaResult<()> { Err(FaError::InvalidConfig(msg)) };
        if self.restarts == 0 {
            return invalid("restarts must be at least 1".to_string());
        }
        for (name, value) in [
            ("tolerance", self.tolerance),
            ("initial_step", self.initial_step),
            ("bound", self.bound),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive and finite, got {value}"));
            }
        }
        if !(self.value_tolerance.is_finite() && self.value_tolerance >= 0.0) {
            return invalid(format!(
                "value_tolerance must be non-negative, got {}",
                self.value_tolerance
            ));
        }
        if self.stall_generations == 0 {
            return invalid("stall_generations must be at least 1".to_string());
        }
        if matches!(self.population, Some(p) if p < 2) {
            return invalid("population must be at least 2".to_string());
        }
        if self.max_evaluations == Some(0) {
            return invalid("max_evaluations must be positive".to_string());
        }
        Ok(())
    }

    fn settings(&self, dim: usize) -> SearchSettings {
        let derived = (4.0 + 3.0 * (dim.max(1) as f64).ln()).floor() as usize;
        SearchSettings {
            tolerance: self.tolerance,
            value_tolerance: self.value_tolerance,
            stall_generations: self.stall_generations,
            population: self.population.unwrap_or_else(|| derived.max(6)),
            initial_step: self.initial_step,
        }
    }
}

/// Validates a wall-clock budget and turns it into a duration.
pub fn budget_duration(time_budget_seconds: f64) -> FaResult<Duration> {
    if !(time_budget_seconds.is_finite() && time_budget_seconds >= 0.0) {
        return Err(FaError::InvalidConfig(format!(
            "time budget must be finite and non-negative, got {time_budget_seconds}"
        )));
    }
    Ok(Duration::try_from_secs_f64(time_budget_seconds).unwrap_or(Duration::MAX))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorimaxOutcome {
    pub rotation: RotationMatrix,
    pub index: f64,
    /// Objective value of the starting rotation.
    pub initial_index: f64,
    pub elapsed: Duration,
    /// Whether at least one restart met its tolerance before the deadline.
    pub converged: bool,
    pub source: RotationSource,
    pub restarts: Vec<RestartReport>,
    pub baselines: Vec<BaselineReport>,
}

impl PriorimaxOutcome {
    pub fn diagnostics(&self, method: &str, objective: &str) -> FitDiagnostics {
        FitDiagnostics {
            method: method.to_string(),
            objective: Some(objective.to_string()),
            objective_value: Some(self.index),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            converged: self.converged,
            source: self.source.clone(),
            restarts: self.restarts.clone(),
            baselines: self.baselines.clone(),
        }
    }
}

struct RestartResult {
    report: RestartReport,
    best: Option<(Vec<f64>, f64)>,
}

pub struct PriorimaxOptimizer<'a, O: RotationObjective + ?Sized> {
    objective: &'a O,
    loadings: &'a LoadingMatrix,
    initial: RotationMatrix,
    config: PriorimaxConfig,
}

impl<'a, O: RotationObjective + ?Sized> PriorimaxOptimizer<'a, O> {
    pub fn new(objective: &'a O, loadings: &'a LoadingMatrix, config: PriorimaxConfig) -> FaResult<Self> {
        config.validate()?;
        if objective.n_variables() != loadings.n_variables() {
            return Err(FaError::ShapeMismatch {
                context: "target variables",
                expected: loadings.n_variables(),
                actual: objective.n_variables(),
            });
        }
        Ok(Self {
            objective,
            loadings,
            initial: RotationMatrix::identity(loadings.n_factors()),
            config,
        })
    }

    /// Starts the search from `initial` instead of the identity.
    pub fn with_initial(mut self, initial: RotationMatrix) -> FaResult<Self> {
        if initial.dim() != self.loadings.n_factors() {
            return Err(FaError::ShapeMismatch {
                context: "initial rotation",
                expected: self.loadings.n_factors(),
                actual: initial.dim(),
            });
        }
        self.initial = initial;
        Ok(self)
    }

    pub fn config(&self) -> &PriorimaxConfig {
        &self.config
    }

    pub fn run(&self, time_budget_seconds: f64) -> FaResult<PriorimaxOutcome> {
        let deadline = Deadline::after(budget_duration(time_budget_seconds)?);
        let k = self.loadings.n_factors();
        let dim = skew_param_count(k);

        let initial_index = self.score(self.initial.as_matrix()).map_err(|err| {
            FaError::OptimizationFailure {
                restarts: 0,
                last: err.to_string(),
            }
        })?;
        let mut best = Candidate {
            rotation: self.initial.clone(),
            index: initial_index,
            source: RotationSource::Initial,
        };

        if dim == 0 {
            debug!(objective = self.objective.name(), "single factor; nothing to rotate");
            return Ok(self.finish(best, initial_index, &deadline, true, Vec::new(), Vec::new()));
        }

        let mut restarts = Vec::new();
        let mut converged = false;
        if !deadline.expired() {
            let seed = base_seed(self.config.seed, "priorimax");
            let results = self.run_restarts(seed, dim, &deadline);
            let mut winner: Option<(usize, &[f64], f64)> = None;
            for result in &results {
                if let Some((x, value)) = &result.best {
                    if winner.map_or(true, |(_, _, v)| *value > v) {
                        winner = Some((result.report.restart, x, *value));
                    }
                }
            }
            let Some((restart, x, value)) = winner else {
                let last = results
                    .iter()
                    .rev()
                    .find_map(|r| r.report.error.clone())
                    .unwrap_or_default();
                return Err(FaError::OptimizationFailure {
                    restarts: results.len(),
                    last,
                });
            };
            converged = results.iter().any(|r| r.report.converged());
            if value > best.index {
                best = Candidate {
                    rotation: self.compose(x)?,
                    index: value,
                    source: RotationSource::Search { restart },
                };
            }
            restarts = results.into_iter().map(|r| r.report).collect();
        }

        let baselines = if self.config.include_baselines {
            self.score_baselines(&mut best)
        } else {
            Vec::new()
        };
        Ok(self.finish(best, initial_index, &deadline, converged, restarts, baselines))
    }

    fn finish(
        &self,
        best: Candidate,
        initial_index: f64,
        deadline: &Deadline,
        converged: bool,
        restarts: Vec<RestartReport>,
        baselines: Vec<BaselineReport>,
    ) -> PriorimaxOutcome {
        let elapsed = deadline.elapsed();
        info!(
            objective = self.objective.name(),
            index = best.index,
            initial_index,
            elapsed_ms = elapsed.as_millis() as u64,
            converged,
            source = ?best.source,
            "priorimax finished"
        );
        PriorimaxOutcome {
            rotation: best.rotation,
            index: best.index,
            initial_index,
            elapsed,
            converged,
            source: best.source,
            restarts,
            baselines,
        }
    }

    fn run_restarts(&self, seed: u64, dim: usize, deadline: &Deadline) -> Vec<RestartResult> {
        let run = |restart: usize| self.restart(restart, derive_seed(seed, restart), dim, deadline);
        if self.config.parallel && !lock_reduction_order() {
            (0..self.config.restarts).into_par_iter().map(run).collect()
        } else {
            (0..self.config.restarts).map(run).collect()
        }
    }

    fn restart(&self, restart: usize, seed: u64, dim: usize, deadline: &Deadline) -> RestartResult {
        let span = debug_span!("restart", restart, seed);
        let _guard = span.enter();
        match self.search(restart, seed, dim, deadline) {
            Ok(result) => {
                debug!(
                    index = ?result.report.index,
                    evaluations = result.report.evaluations,
                    stop = ?result.report.stop,
                    "restart finished"
                );
                result
            }
            Err(err) => {
                let err = FaError::RestartFailure {
                    restart,
                    reason: err.to_string(),
                };
                warn!(error = %err, "discarding restart");
                RestartResult {
                    report: RestartReport::failed(restart, seed, err.to_string()),
                    best: None,
                }
            }
        }
    }

    fn search(
        &self,
        restart: usize,
        seed: u64,
        dim: usize,
        deadline: &Deadline,
    ) -> FaResult<RestartResult> {
        let space = SearchSpace::new(dim, self.config.bound);
        let settings = self.config.settings(dim);
        let mut rng = StdRng::seed_from_u64(seed);
        let start = if restart == 0 {
            vec![0.0; dim]
        } else {
            space.sample(&mut rng)
        };

        let mut scratch = IndexScratch::default();
        let objective = |params: &[f64]| self.score_params(params, &mut scratch);
        let mut probe = Probe::new(objective, start, deadline, self.config.max_evaluations)?;
        let start_index = probe.best().1;
        let (generations, stop) = match self.config.algorithm {
            SearchAlgorithm::Evolution => evolve(&mut probe, &space, &settings, &mut rng)?,
            SearchAlgorithm::NelderMead => nelder_mead(&mut probe, &space, &settings)?,
        };
        let evaluations = probe.evaluations();
        let outcome = probe.finish(generations, stop);
        Ok(RestartResult {
            report: RestartReport {
                restart,
                seed,
                start_index: Some(start_index),
                index: Some(outcome.value),
                evaluations,
                generations,
                stop: Some(stop),
                error: None,
            },
            best: Some((outcome.best, outcome.value)),
        })
    }

    fn score_params(&self, params: &[f64], scratch: &mut IndexScratch) -> FaResult<f64> {
        let step = cayley(params, self.loadings.n_factors())?;
        let rotation = self.initial.as_matrix() * step;
        let rotated = self.loadings.as_matrix() * rotation;
        self.checked(self.objective.evaluate(&rotated, scratch)?)
    }

    fn score(&self, rotation: &DMatrix<f64>) -> FaResult<f64> {
        let rotated = self.loadings.as_matrix() * rotation;
        self.checked(
            self.objective
                .evaluate(&rotated, &mut IndexScratch::default())?,
        )
    }

    fn checked(&self, value: f64) -> FaResult<f64> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FaError::Numerical(format!(
                "objective '{}' returned {value}",
                self.objective.name()
            )))
        }
    }

    fn compose(&self, params: &[f64]) -> FaResult<RotationMatrix> {
        let step = cayley(params, self.loadings.n_factors())?;
        RotationMatrix::new(self.initial.as_matrix() * step)
    }

    fn score_baselines(&self, best: &mut Candidate) -> Vec<BaselineReport> {
        let config = OrthomaxConfig::default();
        let mut reports = Vec::with_capacity(OrthomaxFamily::ALL.len());
        for family in OrthomaxFamily::ALL {
            let scored = orthomax(self.loadings, family, &config).and_then(|fit| {
                let index = self.score(fit.rotation.as_matrix())?;
                Ok((fit, index))
            });
            match scored {
                Ok((fit, index)) => {
                    reports.push(BaselineReport {
                        method: family,
                        index,
                        iterations: fit.iterations,
                        converged: fit.converged,
                    });
                    if index > best.index {
                        debug!(method = family.as_str(), index, "baseline beats the search");
                        *best = Candidate {
                            rotation: fit.rotation,
                            index,
                            source: RotationSource::Baseline { method: family },
                        };
                    }
                }
                Err(err) => warn!(method = family.as_str(), error = %err, "skipping baseline"),
            }
        }
        reports
    }
}

struct Candidate {
    rotation: RotationMatrix,
    index: f64,
    source: RotationSource,
}

