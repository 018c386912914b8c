use super::{Probe, SearchSettings, SearchSpace, StopReason};
use ifa_core::FaResult;
use rand::prelude::*;
use rand_distr::StandardNormal;

#[derive(Debug, Clone)]
struct Individual {
    x: Vec<f64>,
    sigma: Vec<f64>,
    value: f64,
}

/// (μ, λ) evolution strategy with per-coordinate self-adaptive step sizes.
///
/// Offspring draw their parent uniformly from the μ survivors, inherit the
/// mean step sizes of the survivors and mutate them log-normally before
/// mutating the point. The best point ever seen is re-injected into the
/// survivors so that comma selection cannot lose it. The search converges
/// once every step size falls below `tolerance` or the best value stalls for
/// `stall_generations` generations.
pub fn evolve<F>(
    probe: &mut Probe<'_, F>,
    space: &SearchSpace,
    settings: &SearchSettings,
    rng: &mut StdRng,
) -> FaResult<(usize, StopReason)>
where
    F: FnMut(&[f64]) -> FaResult<f64>,
{
    let n = space.dim();
    let lambda = settings.population.max(2);
    let mu = (lambda / 2).max(1);
    let tau_global = 1.0 / (2.0 * n as f64).sqrt();
    let tau_local = 1.0 / (2.0 * (n as f64).sqrt()).sqrt();
    let sigma_floor = settings.tolerance * 1e-3;
    let sigma_ceiling = 2.0 * space.bound();

    let (start, start_value) = probe.best();
    let mut parents = vec![Individual {
        x: start.to_vec(),
        sigma: vec![settings.initial_step; n],
        value: start_value,
    }];
    let mut incumbent = start_value;
    let mut stalled = 0usize;
    let mut generation = 0usize;

    loop {
        let mean_sigma: Vec<f64> = (0..n)
            .map(|d| parents.iter().map(|p| p.sigma[d]).sum::<f64>() / parents.len() as f64)
            .collect();

        let mut offspring = Vec::with_capacity(lambda);
        for _ in 0..lambda {
            let parent = &parents[rng.gen_range(0..parents.len())];
            let common: f64 = tau_global * rng.sample::<f64, _>(StandardNormal);
            let mut sigma = mean_sigma.clone();
            let mut x = parent.x.clone();
            for d in 0..n {
                let local: f64 = rng.sample(StandardNormal);
                sigma[d] = (sigma[d] * (common + tau_local * local).exp())
                    .clamp(sigma_floor, sigma_ceiling);
                let step: f64 = rng.sample(StandardNormal);
                x[d] += sigma[d] * step;
            }
            space.clamp(&mut x);
            let value = match probe.evaluate(&x)? {
                Some(value) => value,
                None => return Ok((generation, stop_reason(probe))),
            };
            offspring.push(Individual { x, sigma, value });
        }
        generation += 1;

        offspring.sort_by(|a, b| b.value.total_cmp(&a.value));
        offspring.truncate(mu);
        let (best_x, best_value) = probe.best();
        if offspring[0].value < best_value {
            let last = offspring.len() - 1;
            offspring[last] = Individual {
                x: best_x.to_vec(),
                sigma: offspring[0].sigma.clone(),
                value: best_value,
            };
        }
        parents = offspring;

        if best_value > incumbent + settings.value_tolerance {
            incumbent = best_value;
            stalled = 0;
        } else {
            stalled += 1;
        }
        let max_sigma = parents
            .iter()
            .flat_map(|p| p.sigma.iter().copied())
            .fold(0.0, f64::max);
        if max_sigma < settings.tolerance || stalled >= settings.stall_generations {
            return Ok((generation, StopReason::Converged));
        }
    }
}

pub(super) fn stop_reason<F>(probe: &Probe<'_, F>) -> StopReason
where
    F: FnMut(&[f64]) -> FaResult<f64>,
{
    probe.exhausted().unwrap_or(StopReason::Deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::{bump, settings};
    use crate::search::{Deadline, SearchOutcome};
    use std::time::Duration;

    fn evolve_outcome<F>(
        mut probe: Probe<'_, F>,
        space: &SearchSpace,
        settings: &SearchSettings,
        rng: &mut StdRng,
    ) -> FaResult<SearchOutcome>
    where
        F: FnMut(&[f64]) -> FaResult<f64>,
    {
        let (generations, stop) = evolve(&mut probe, space, settings, rng)?;
        Ok(probe.finish(generations, stop))
    }

    #[test]
    fn finds_the_peak_of_a_smooth_bump() {
        let peak = [0.4, -0.3, 0.6];
        let deadline = Deadline::after(Duration::from_secs(30));
        let probe = Probe::new(bump(&peak), vec![0.0; 3], &deadline, Some(20_000)).unwrap();
        let space = SearchSpace::new(3, 1.0);
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = evolve_outcome(probe, &space, &settings(), &mut rng).unwrap();
        assert!(outcome.value > 0.999, "value {}", outcome.value);
        for (x, p) in outcome.best.iter().zip(peak) {
            assert!((x - p).abs() < 0.05);
        }
    }

    #[test]
    fn stays_inside_the_box() {
        // Peak outside the box: the best feasible point is the nearest corner.
        let peak = [3.0, -3.0];
        let deadline = Deadline::after(Duration::from_secs(30));
        let probe = Probe::new(bump(&peak), vec![0.0; 2], &deadline, Some(5_000)).unwrap();
        let space = SearchSpace::new(2, 1.0);
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = evolve_outcome(probe, &space, &settings(), &mut rng).unwrap();
        assert!(outcome.best.iter().all(|v| v.abs() <= 1.0));
        assert!(outcome.best[0] > 0.95 && outcome.best[1] < -0.95);
    }

    #[test]
    fn evaluation_cap_stops_the_search() {
        let peak = [0.1];
        let deadline = Deadline::after(Duration::from_secs(30));
        let probe = Probe::new(bump(&peak), vec![0.0], &deadline, Some(7)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let outcome =
            evolve_outcome(probe, &SearchSpace::new(1, 1.0), &settings(), &mut rng).unwrap();
        assert_eq!(outcome.stop, StopReason::MaxEvaluations);
    }
}
