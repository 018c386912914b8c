use super::evolution::stop_reason;
use super::{Probe, SearchSettings, SearchSpace, StopReason};
use ifa_core::FaResult;

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

macro_rules! eval_or_stop {
    ($probe:expr, $point:expr, $generation:expr) => {
        match $probe.evaluate(&$point)? {
            Some(value) => value,
            None => return Ok(($generation, stop_reason($probe))),
        }
    };
}

/// Downhill simplex maximiser with every trial point clamped to the box.
///
/// The initial simplex spans `initial_step` along each axis from the probe's
/// best point. Converges when both the spread of vertex values falls below
/// `value_tolerance` and the simplex diameter below `tolerance`, or after
/// `stall_generations` iterations without improvement of the best vertex.
pub fn nelder_mead<F>(
    probe: &mut Probe<'_, F>,
    space: &SearchSpace,
    settings: &SearchSettings,
) -> FaResult<(usize, StopReason)>
where
    F: FnMut(&[f64]) -> FaResult<f64>,
{
    let n = space.dim();
    let (start, start_value) = probe.best();
    let start = start.to_vec();
    let mut vertices: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    vertices.push((start.clone(), start_value));
    let mut generation = 0usize;
    for d in 0..n {
        let mut x = start.clone();
        x[d] += settings.initial_step;
        if x[d] > space.bound() {
            x[d] = start[d] - settings.initial_step;
        }
        space.clamp(&mut x);
        let value = eval_or_stop!(probe, x, generation);
        vertices.push((x, value));
    }

    let mut incumbent = start_value;
    let mut stalled = 0usize;
    loop {
        vertices.sort_by(|a, b| b.1.total_cmp(&a.1));
        if converged(&vertices, settings) || stalled >= settings.stall_generations {
            return Ok((generation, StopReason::Converged));
        }
        generation += 1;

        let worst = vertices[n].1;
        let second_worst = vertices[n - 1].1;
        let best = vertices[0].1;
        let centroid: Vec<f64> = (0..n)
            .map(|d| vertices[..n].iter().map(|v| v.0[d]).sum::<f64>() / n as f64)
            .collect();
        let along = |t: f64| -> Vec<f64> {
            let mut x: Vec<f64> = centroid
                .iter()
                .zip(&vertices[n].0)
                .map(|(c, w)| c + t * (c - w))
                .collect();
            space.clamp(&mut x);
            x
        };

        let reflected = along(REFLECT);
        let reflected_value = eval_or_stop!(probe, reflected, generation);
        if reflected_value > best {
            let expanded = along(EXPAND);
            let expanded_value = eval_or_stop!(probe, expanded, generation);
            vertices[n] = if expanded_value > reflected_value {
                (expanded, expanded_value)
            } else {
                (reflected, reflected_value)
            };
        } else if reflected_value > second_worst {
            vertices[n] = (reflected, reflected_value);
        } else {
            let contracted = if reflected_value > worst {
                along(CONTRACT * REFLECT)
            } else {
                along(-CONTRACT)
            };
            let contracted_value = eval_or_stop!(probe, contracted, generation);
            if contracted_value > worst.max(reflected_value) {
                vertices[n] = (contracted, contracted_value);
            } else {
                let anchor = vertices[0].0.clone();
                for vertex in vertices.iter_mut().skip(1) {
                    for (x, a) in vertex.0.iter_mut().zip(&anchor) {
                        *x = a + SHRINK * (*x - a);
                    }
                    vertex.1 = eval_or_stop!(probe, vertex.0, generation);
                }
            }
        }

        let (_, best_value) = probe.best();
        if best_value > incumbent + settings.value_tolerance {
            incumbent = best_value;
            stalled = 0;
        } else {
            stalled += 1;
        }
    }
}

fn converged(vertices: &[(Vec<f64>, f64)], settings: &SearchSettings) -> bool {
    let best = &vertices[0];
    let spread = vertices
        .iter()
        .map(|v| (best.1 - v.1).abs())
        .fold(0.0, f64::max);
    let diameter = vertices
        .iter()
        .flat_map(|v| v.0.iter().zip(&best.0).map(|(x, b)| (x - b).abs()))
        .fold(0.0, f64::max);
    spread <= settings.value_tolerance && diameter <= settings.tolerance
}
