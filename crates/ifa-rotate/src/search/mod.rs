//! Bounded derivative-free maximisers over the Cayley parameter box.

use ifa_core::FaResult;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub mod evolution;
pub mod simplex;

pub use evolution::evolve;
pub use simplex::nelder_mead;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchAlgorithm {
    /// Self-adaptive (μ, λ) evolution strategy.
    #[default]
    Evolution,
    /// Bounded downhill simplex.
    NelderMead,
}

impl SearchAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchAlgorithm::Evolution => "evolution",
            SearchAlgorithm::NelderMead => "nelder_mead",
        }
    }
}

/// Box `[-bound, bound]^dim`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSpace {
    dim: usize,
    bound: f64,
}

impl SearchSpace {
    pub fn new(dim: usize, bound: f64) -> Self {
        Self { dim, bound }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn sample(&self, rng: &mut StdRng) -> Vec<f64> {
        (0..self.dim)
            .map(|_| rng.gen_range(-self.bound..=self.bound))
            .collect()
    }

    pub fn clamp(&self, point: &mut [f64]) {
        for v in point.iter_mut() {
            *v = v.clamp(-self.bound, self.bound);
        }
    }
}

/// Wall-clock deadline shared by every restart of one fit.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started.checked_add(budget),
        }
    }

    pub fn expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Knobs shared by both searchers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub tolerance: f64,
    pub value_tolerance: f64,
    pub stall_generations: usize,
    pub population: usize,
    pub initial_step: f64,
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    Deadline,
    MaxEvaluations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: Vec<f64>,
    pub value: f64,
    pub generations: usize,
    pub stop: StopReason,
}

/// Counts evaluations, enforces the deadline and evaluation cap, and tracks
/// the best point seen. Every searcher talks to the objective through it.
pub struct Probe<'a, F> {
    objective: F,
    deadline: &'a Deadline,
    max_evaluations: Option<usize>,
    evaluations: usize,
    best: Vec<f64>,
    best_value: f64,
}

impl<'a, F> Probe<'a, F>
where
    F: FnMut(&[f64]) -> FaResult<f64>,
{
    /// Evaluates `start` unconditionally so a probe always has a best point.
    pub fn new(
        mut objective: F,
        start: Vec<f64>,
        deadline: &'a Deadline,
        max_evaluations: Option<usize>,
    ) -> FaResult<Self> {
        let value = objective(&start)?;
        Ok(Self {
            objective,
            deadline,
            max_evaluations,
            evaluations: 1,
            best: start,
            best_value: value,
        })
    }

    /// Returns `Ok(None)` once the budget is spent.
    pub fn evaluate(&mut self, point: &[f64]) -> FaResult<Option<f64>> {
        if self.exhausted().is_some() {
            return Ok(None);
        }
        let value = (self.objective)(point)?;
        self.evaluations += 1;
        if value > self.best_value {
            self.best_value = value;
            self.best.clear();
            self.best.extend_from_slice(point);
        }
        Ok(Some(value))
    }

    pub fn exhausted(&self) -> Option<StopReason> {
        if self
            .max_evaluations
            .map_or(false, |cap| self.evaluations >= cap)
        {
            return Some(StopReason::MaxEvaluations);
        }
        if self.deadline.expired() {
            return Some(StopReason::Deadline);
        }
        None
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn best(&self) -> (&[f64], f64) {
        (&self.best, self.best_value)
    }

    pub(crate) fn finish(self, generations: usize, stop: StopReason) -> SearchOutcome {
        SearchOutcome {
            best: self.best,
            value: self.best_value,
            generations,
            stop,
        }
    }
}
