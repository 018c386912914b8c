//! Kendall rank correlation (tau-b).
//!
//! Both the row similarities and the agreement index are tau-b statistics.
//! Short inputs (a row of factor loadings) use the direct pair count; long
//! inputs (one entry per variable pair) use Knight's merge-sort algorithm.
//! Whenever the statistic is undefined, because an input is constant or has
//! fewer than two entries, it is reported as 0.

use std::cmp::Ordering;

const DIRECT_LIMIT: usize = 32;

/// Reusable buffers for [`tau_b_with`].
#[derive(Debug, Default, Clone)]
pub struct KendallScratch {
    order: Vec<usize>,
    ys: Vec<f64>,
    merge: Vec<f64>,
}

/// Kendall's tau-b of two equally long samples.
pub fn tau_b(x: &[f64], y: &[f64]) -> f64 {
    let mut scratch = KendallScratch::default();
    tau_b_with(x, y, &mut scratch)
}

/// Kendall's tau-b reusing caller-owned buffers.
pub fn tau_b_with(x: &[f64], y: &[f64], scratch: &mut KendallScratch) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    if n <= DIRECT_LIMIT {
        tau_b_direct(&x[..n], &y[..n])
    } else {
        tau_b_knight(&x[..n], &y[..n], scratch)
    }
}

/// Quadratic pair count; used for the per-row similarities where `n = k`.
pub fn tau_b_direct(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    let mut score = 0i64;
    let mut untied_x = 0u64;
    let mut untied_y = 0u64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = sign(x[i] - x[j]);
            let dy = sign(y[i] - y[j]);
            if dx != 0 {
                untied_x += 1;
            }
            if dy != 0 {
                untied_y += 1;
            }
            score += (dx * dy) as i64;
        }
    }
    finish(score as f64, untied_x as f64, untied_y as f64)
}

fn tau_b_knight(x: &[f64], y: &[f64], scratch: &mut KendallScratch) -> f64 {
    let n = x.len();
    let total = (n * (n - 1) / 2) as f64;

    scratch.order.clear();
    scratch.order.extend(0..n);
    scratch
        .order
        .sort_unstable_by(|&a, &b| rank_cmp(x[a], x[b]).then(rank_cmp(y[a], y[b])));

    let mut x_ties = 0.0;
    let mut joint_ties = 0.0;
    let mut run_x = 1usize;
    let mut run_xy = 1usize;
    for w in 1..n {
        let (prev, cur) = (scratch.order[w - 1], scratch.order[w]);
        if x[prev] == x[cur] {
            run_x += 1;
            if y[prev] == y[cur] {
                run_xy += 1;
            } else {
                joint_ties += pairs(run_xy);
                run_xy = 1;
            }
        } else {
            x_ties += pairs(run_x);
            joint_ties += pairs(run_xy);
            run_x = 1;
            run_xy = 1;
        }
    }
    x_ties += pairs(run_x);
    joint_ties += pairs(run_xy);

    scratch.ys.clear();
    scratch.ys.extend(scratch.order.iter().map(|&i| y[i] + 0.0));
    scratch.merge.clear();
    scratch.merge.resize(n, 0.0);
    let swaps = count_inversions(&mut scratch.ys, &mut scratch.merge) as f64;

    let mut y_ties = 0.0;
    let mut run_y = 1usize;
    for w in 1..n {
        if scratch.ys[w - 1] == scratch.ys[w] {
            run_y += 1;
        } else {
            y_ties += pairs(run_y);
            run_y = 1;
        }
    }
    y_ties += pairs(run_y);

    let score = total - x_ties - y_ties + joint_ties - 2.0 * swaps;
    finish(score, total - x_ties, total - y_ties)
}

/// Sorts `values` ascending and returns the number of strictly inverted pairs.
fn count_inversions(values: &mut [f64], buffer: &mut [f64]) -> u64 {
    let n = values.len();
    let mut inversions = 0u64;
    let mut width = 1;
    while width < n {
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if rank_cmp(values[j], values[i]) == Ordering::Less {
                    buffer[k] = values[j];
                    inversions += (mid - i) as u64;
                    j += 1;
                } else {
                    buffer[k] = values[i];
                    i += 1;
                }
                k += 1;
            }
            buffer[k..k + (mid - i)].copy_from_slice(&values[i..mid]);
            k += mid - i;
            buffer[k..k + (end - j)].copy_from_slice(&values[j..end]);
            start = end;
        }
        values.copy_from_slice(buffer);
        width *= 2;
    }
    inversions
}

/// Total order that ranks `-0.0` and `0.0` as the same value, matching the
/// `==` used when counting tie runs.
#[inline]
fn rank_cmp(a: f64, b: f64) -> Ordering {
    (a + 0.0).total_cmp(&(b + 0.0))
}

#[inline]
fn pairs(run: usize) -> f64 {
    (run * (run - 1) / 2) as f64
}

#[inline]
fn sign(v: f64) -> i32 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

#[inline]
fn finish(score: f64, untied_x: f64, untied_y: f64) -> f64 {
    let denominator = (untied_x * untied_y).sqrt();
    if denominator <= 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (score / denominator).clamp(-1.0, 1.0)
}
