use ifa_core::{
    agreement_index, cayley, generate_grouper_prior, AgreementObjective, FaError, FaResult,
    IndexScratch, LoadingMatrix, RotationMatrix, RotationObjective, TargetMatrix,
};
use ifa_rotate::{
    PriorimaxConfig, PriorimaxOptimizer, RotationSource, SearchAlgorithm, StopReason,
};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Three groups of four variables, each group with its own factor ranking,
/// mixed by a Cayley rotation that lies inside the default parameter box.
static PLANTED: Lazy<(LoadingMatrix, TargetMatrix)> = Lazy::new(|| {
    let simple = DMatrix::from_row_slice(
        12,
        3,
        &[
            0.80, 0.30, 0.10, //
            0.75, 0.35, 0.05, //
            0.70, 0.25, 0.12, //
            0.85, 0.32, 0.15, //
            0.10, 0.80, 0.30, //
            0.05, 0.70, 0.35, //
            0.12, 0.75, 0.28, //
            0.15, 0.82, 0.33, //
            0.30, 0.10, 0.80, //
            0.35, 0.05, 0.72, //
            0.28, 0.12, 0.78, //
            0.32, 0.15, 0.85, //
        ],
    );
    let mixing = cayley(&[0.6, -0.4, 0.5], 3).unwrap();
    let loadings = LoadingMatrix::new(simple * mixing).unwrap();
    let target =
        generate_grouper_prior(12, &[vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10, 11, 12]])
            .unwrap();
    (loadings, target)
});

fn random_problem(n: usize, k: usize, seed: u64) -> (LoadingMatrix, TargetMatrix) {
    let mut rng = StdRng::seed_from_u64(seed);
    let loadings = LoadingMatrix::new(DMatrix::from_fn(n, k, |_, _| rng.gen_range(-1.0..1.0)))
        .unwrap();
    let groups: Vec<Vec<usize>> = (0..k)
        .map(|f| (1..=n).filter(|v| v % k == f).collect())
        .collect();
    (loadings, generate_grouper_prior(n, &groups).unwrap())
}

fn seeded(seed: u64) -> PriorimaxConfig {
    PriorimaxConfig {
        seed: Some(seed),
        ..PriorimaxConfig::default()
    }
}

#[test]
fn recovers_planted_structure() {
    let (loadings, target) = &*PLANTED;
    let objective = AgreementObjective::new(target);
    let outcome = PriorimaxOptimizer::new(&objective, loadings, seeded(17))
        .unwrap()
        .run(20.0)
        .unwrap();
    assert!(outcome.initial_index < 0.9, "{}", outcome.initial_index);
    assert!(outcome.index > 0.99, "index {}", outcome.index);
    let rotated = loadings.rotate(&outcome.rotation).unwrap();
    assert!((agreement_index(&rotated, target).unwrap() - outcome.index).abs() < 1e-12);
}

#[test]
fn rotations_are_orthogonal_for_several_factor_counts() {
    for k in 2..=5 {
        let (loadings, target) = random_problem(10, k, k as u64);
        let objective = AgreementObjective::new(&target);
        let config = PriorimaxConfig {
            restarts: 2,
            max_evaluations: Some(300),
            parallel: false,
            ..seeded(3)
        };
        let outcome = PriorimaxOptimizer::new(&objective, &loadings, config)
            .unwrap()
            .run(10.0)
            .unwrap();
        assert_eq!(outcome.rotation.dim(), k);
        assert!(outcome.rotation.orthogonality_error() < 1e-8);
        assert!((0.0..=1.0).contains(&outcome.index));
    }
}

#[test]
fn never_scores_below_the_starting_rotation() {
    for seed in 0..5 {
        let (loadings, target) = random_problem(9, 3, 100 + seed);
        let objective = AgreementObjective::new(&target);
        let config = PriorimaxConfig {
            max_evaluations: Some(200),
            include_baselines: false,
            ..seeded(seed)
        };
        let outcome = PriorimaxOptimizer::new(&objective, &loadings, config)
            .unwrap()
            .run(10.0)
            .unwrap();
        let identity = agreement_index(loadings.as_matrix(), &target).unwrap();
        assert_eq!(outcome.initial_index, identity);
        assert!(outcome.index >= identity);
    }
}

#[test]
fn nelder_mead_also_improves() {
    let (loadings, target) = &*PLANTED;
    let objective = AgreementObjective::new(target);
    let config = PriorimaxConfig {
        algorithm: SearchAlgorithm::NelderMead,
        include_baselines: false,
        ..seeded(8)
    };
    let outcome = PriorimaxOptimizer::new(&objective, loadings, config)
        .unwrap()
        .run(10.0)
        .unwrap();
    assert!(outcome.index >= outcome.initial_index);
    assert_eq!(outcome.restarts.len(), 4);
}

#[test]
fn reoptimizing_from_the_result_does_not_lose_ground() {
    let (loadings, target) = &*PLANTED;
    let objective = AgreementObjective::new(target);
    let first = PriorimaxOptimizer::new(&objective, loadings, seeded(1))
        .unwrap()
        .run(10.0)
        .unwrap();
    let second = PriorimaxOptimizer::new(&objective, loadings, seeded(2))
        .unwrap()
        .with_initial(first.rotation.clone())
        .unwrap()
        .run(10.0)
        .unwrap();
    assert_eq!(second.initial_index, first.index);
    assert!(second.index >= first.index);
}

#[test]
fn fixed_seed_is_reproducible_across_execution_modes() {
    let (loadings, target) = random_problem(15, 4, 77);
    let objective = AgreementObjective::new(&target);
    let run = |parallel: bool| {
        let config = PriorimaxConfig {
            max_evaluations: Some(400),
            parallel,
            ..seeded(4242)
        };
        PriorimaxOptimizer::new(&objective, &loadings, config)
            .unwrap()
            .run(60.0)
            .unwrap()
    };
    let sequential = run(false);
    let parallel = run(true);
    assert_eq!(sequential.index, parallel.index);
    assert_eq!(sequential.rotation, parallel.rotation);
    assert_eq!(sequential.source, parallel.source);
    let seeds: Vec<u64> = sequential.restarts.iter().map(|r| r.seed).collect();
    let parallel_seeds: Vec<u64> = parallel.restarts.iter().map(|r| r.seed).collect();
    assert_eq!(seeds, parallel_seeds);
}

#[test]
fn time_budget_is_respected() {
    let (loadings, target) = random_problem(40, 5, 9);
    let objective = AgreementObjective::new(&target);
    let config = PriorimaxConfig {
        tolerance: 1e-300,
        stall_generations: usize::MAX,
        ..seeded(5)
    };
    let budget = 0.3;
    let started = Instant::now();
    let outcome = PriorimaxOptimizer::new(&objective, &loadings, config)
        .unwrap()
        .run(budget)
        .unwrap();
    let wall = started.elapsed().as_secs_f64();
    assert!(wall < budget + 1.0, "took {wall}s");
    assert!(!outcome.converged);
    assert!(outcome
        .restarts
        .iter()
        .all(|r| r.stop == Some(StopReason::Deadline)));
}

#[test]
fn time_budget_holds_across_factor_and_restart_counts() {
    let budget = 0.2;
    for k in [2, 4, 6] {
        let (loadings, target) = random_problem(30, k, 50 + k as u64);
        let objective = AgreementObjective::new(&target);
        for restarts in [1, 8] {
            for parallel in [true, false] {
                let config = PriorimaxConfig {
                    restarts,
                    parallel,
                    tolerance: 1e-300,
                    stall_generations: usize::MAX,
                    ..seeded(k as u64)
                };
                let started = Instant::now();
                let outcome = PriorimaxOptimizer::new(&objective, &loadings, config)
                    .unwrap()
                    .run(budget)
                    .unwrap();
                let wall = started.elapsed().as_secs_f64();
                assert!(
                    wall < budget + 1.0,
                    "k={k} restarts={restarts} parallel={parallel} took {wall}s"
                );
                assert_eq!(outcome.restarts.len(), restarts);
                assert!(outcome
                    .restarts
                    .iter()
                    .all(|r| r.stop != Some(StopReason::MaxEvaluations)));
                assert!(outcome.rotation.orthogonality_error() < 1e-8);
            }
        }
    }
}

#[test]
fn zero_budget_returns_the_start_or_a_baseline() {
    let (loadings, target) = &*PLANTED;
    let objective = AgreementObjective::new(target);
    let outcome = PriorimaxOptimizer::new(&objective, loadings, seeded(0))
        .unwrap()
        .run(0.0)
        .unwrap();
    assert!(!outcome.converged);
    assert!(outcome.restarts.is_empty());
    assert_eq!(outcome.baselines.len(), 3);
    assert!(matches!(
        outcome.source,
        RotationSource::Initial | RotationSource::Baseline { .. }
    ));
    assert!(outcome.index >= outcome.initial_index);
}

#[test]
fn single_factor_needs_no_search() {
    let loadings = LoadingMatrix::from_row_slice(3, 1, &[0.9, 0.5, 0.1]).unwrap();
    let target = generate_grouper_prior(3, &[vec![1, 2]]).unwrap();
    let objective = AgreementObjective::new(&target);
    let outcome = PriorimaxOptimizer::new(&objective, &loadings, PriorimaxConfig::default())
        .unwrap()
        .run(5.0)
        .unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.rotation, RotationMatrix::identity(1));
    assert_eq!(outcome.source, RotationSource::Initial);
}

#[test]
fn invalid_budget_and_config_are_rejected() {
    let (loadings, target) = &*PLANTED;
    let objective = AgreementObjective::new(target);
    let optimizer = PriorimaxOptimizer::new(&objective, loadings, seeded(0)).unwrap();
    for budget in [f64::NAN, -1.0, f64::INFINITY] {
        assert!(matches!(optimizer.run(budget), Err(FaError::InvalidConfig(_))));
    }
    let config = PriorimaxConfig {
        restarts: 0,
        ..PriorimaxConfig::default()
    };
    assert!(matches!(
        PriorimaxOptimizer::new(&objective, loadings, config),
        Err(FaError::InvalidConfig(_))
    ));
}

#[test]
fn mismatched_target_fails_before_searching() {
    let (loadings, _) = &*PLANTED;
    let objective = AgreementObjective::new(&TargetMatrix::identity(5));
    assert!(matches!(
        PriorimaxOptimizer::new(&objective, loadings, PriorimaxConfig::default()),
        Err(FaError::ShapeMismatch {
            expected: 12,
            actual: 5,
            ..
        })
    ));
}

/// Agreement objective that fails on selected call numbers.
struct Flaky {
    inner: AgreementObjective,
    calls: AtomicUsize,
    fails: fn(usize) -> bool,
}

impl RotationObjective for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn n_variables(&self) -> usize {
        self.inner.n_variables()
    }

    fn evaluate(&self, rotated: &DMatrix<f64>, scratch: &mut IndexScratch) -> FaResult<f64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if (self.fails)(call) {
            return Err(FaError::Numerical(format!("call {call} failed")));
        }
        self.inner.evaluate(rotated, scratch)
    }
}

#[test]
fn a_failing_restart_is_discarded() {
    let (loadings, target) = &*PLANTED;
    // Call 1 scores the start, call 2 is the first point of restart 0.
    let objective = Flaky {
        inner: AgreementObjective::new(target),
        calls: AtomicUsize::new(0),
        fails: |call| call == 2,
    };
    let config = PriorimaxConfig {
        parallel: false,
        include_baselines: false,
        max_evaluations: Some(200),
        ..seeded(6)
    };
    let outcome = PriorimaxOptimizer::new(&objective, loadings, config)
        .unwrap()
        .run(10.0)
        .unwrap();
    assert!(outcome.restarts[0].error.is_some());
    assert!(outcome.restarts[1..].iter().all(|r| r.error.is_none()));
    assert!(!matches!(
        outcome.source,
        RotationSource::Search { restart: 0 }
    ));
}

#[test]
fn all_restarts_failing_is_fatal() {
    let (loadings, target) = &*PLANTED;
    let objective = Flaky {
        inner: AgreementObjective::new(target),
        calls: AtomicUsize::new(0),
        fails: |call| call > 1,
    };
    let config = PriorimaxConfig {
        parallel: false,
        ..seeded(6)
    };
    let err = PriorimaxOptimizer::new(&objective, loadings, config)
        .unwrap()
        .run(10.0)
        .unwrap_err();
    assert!(matches!(err, FaError::OptimizationFailure { restarts: 4, .. }));
}
