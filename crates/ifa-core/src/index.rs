//! Interpretability indices of a rotated loading matrix.
//!
//! The agreement (vertical) index compares, over every known variable pair,
//! the target value `P[i][j]` with how similarly the two variables load across
//! the factors. Row similarity is the tau-b between the absolute loading rows,
//! and agreement is the tau-b between the target values and those
//! similarities; both are rescaled from `[-1, 1]` to `[0, 1]`. Working on ranks
//! of absolute loadings makes the index invariant to rescaling or flipping the
//! sign of any row, and to relabelling variables.
//!
//! The horizontal index measures how semantically distinct the factors are,
//! using the text embeddings behind the target. The overall index combines
//! both.

use crate::kendall::{tau_b_direct, tau_b_with, KendallScratch};
use crate::{FaError, FaResult, TargetMatrix};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI, SQRT_2};
use std::fmt;
use std::sync::Arc;

/// Which index a caller wants to rank or optimise by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Agreement,
    Horizontal,
    Overall,
}

impl IndexKind {
    pub const AGREEMENT: &'static str = "agreement";
    pub const VERTICAL: &'static str = "vertical";
    pub const HORIZONTAL: &'static str = "horizontal";
    pub const OVERALL: &'static str = "overall";

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Agreement => Self::AGREEMENT,
            IndexKind::Horizontal => Self::HORIZONTAL,
            IndexKind::Overall => Self::OVERALL,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scratch buffers for repeated evaluations. One per search thread.
#[derive(Debug, Default, Clone)]
pub struct IndexScratch {
    abs_rows: Vec<f64>,
    similarities: Vec<f64>,
    kendall: KendallScratch,
    meanings: Vec<f64>,
}

/// Objective maximised by a rotation search.
pub trait RotationObjective: Sync {
    fn name(&self) -> &str;

    /// Number of variables (rows) the objective expects.
    fn n_variables(&self) -> usize;

    /// Scores rotated loadings `L·R`.
    fn evaluate(&self, rotated: &DMatrix<f64>, scratch: &mut IndexScratch) -> FaResult<f64>;
}

fn fill_abs_rows(rotated: &DMatrix<f64>, out: &mut Vec<f64>) -> FaResult<()> {
    let (n, k) = rotated.shape();
    out.clear();
    out.resize(n * k, 0.0);
    for col in 0..k {
        for row in 0..n {
            let v = rotated[(row, col)];
            if !v.is_finite() {
                return Err(FaError::Numerical(format!(
                    "non-finite rotated loading at ({row}, {col})"
                )));
            }
            out[row * k + col] = v.abs();
        }
    }
    Ok(())
}

#[inline]
fn rescale(tau: f64) -> f64 {
    0.5 * (tau + 1.0)
}

/// Agreement between a target and rotated loadings, with the target's pair
/// list prepared once.
#[derive(Clone, Debug)]
pub struct AgreementObjective {
    n_variables: usize,
    pairs: Vec<(usize, usize)>,
    prior: Vec<f64>,
}

impl AgreementObjective {
    pub fn new(target: &TargetMatrix) -> Self {
        let (pairs, prior) = target
            .known_pairs()
            .map(|(i, j, v)| ((i, j), v))
            .unzip();
        Self {
            n_variables: target.n(),
            pairs,
            prior,
        }
    }

    fn check_shape(&self, rotated: &DMatrix<f64>) -> FaResult<()> {
        if rotated.nrows() != self.n_variables {
            return Err(FaError::ShapeMismatch {
                context: "rotated loading rows",
                expected: self.n_variables,
                actual: rotated.nrows(),
            });
        }
        Ok(())
    }

    /// Row similarities of every known pair, in pair order.
    fn similarities(&self, rotated: &DMatrix<f64>, scratch: &mut IndexScratch) -> FaResult<()> {
        self.check_shape(rotated)?;
        fill_abs_rows(rotated, &mut scratch.abs_rows)?;
        let k = rotated.ncols();
        let rows = &scratch.abs_rows;
        scratch.similarities.clear();
        scratch.similarities.extend(self.pairs.iter().map(|&(i, j)| {
            rescale(tau_b_direct(
                &rows[i * k..(i + 1) * k],
                &rows[j * k..(j + 1) * k],
            ))
        }));
        Ok(())
    }
}

impl RotationObjective for AgreementObjective {
    fn name(&self) -> &str {
        IndexKind::AGREEMENT
    }

    fn n_variables(&self) -> usize {
        self.n_variables
    }

    fn evaluate(&self, rotated: &DMatrix<f64>, scratch: &mut IndexScratch) -> FaResult<f64> {
        self.similarities(rotated, scratch)?;
        let tau = tau_b_with(&self.prior, &scratch.similarities, &mut scratch.kendall);
        Ok(rescale(tau))
    }
}

/// Overall index (agreement combined with horizontal), maximised by interpmax.
#[derive(Clone, Debug)]
pub struct OverallObjective {
    agreement: AgreementObjective,
    embeddings: Arc<Vec<Vec<f64>>>,
}

impl OverallObjective {
    pub fn new(target: &TargetMatrix) -> FaResult<Self> {
        let embeddings = target
            .embeddings()
            .cloned()
            .ok_or(FaError::MissingEmbedder("the overall index"))?;
        Ok(Self {
            agreement: AgreementObjective::new(target),
            embeddings,
        })
    }
}

impl RotationObjective for OverallObjective {
    fn name(&self) -> &str {
        IndexKind::OVERALL
    }

    fn n_variables(&self) -> usize {
        self.agreement.n_variables
    }

    fn evaluate(&self, rotated: &DMatrix<f64>, scratch: &mut IndexScratch) -> FaResult<f64> {
        let v = self.agreement.evaluate(rotated, scratch)?;
        let h = horizontal_index_with(rotated, &self.embeddings, &mut scratch.meanings)?;
        Ok(overall_index(v, h))
    }
}

/// Agreement (vertical) index in `[0, 1]`.
pub fn agreement_index(rotated: &DMatrix<f64>, target: &TargetMatrix) -> FaResult<f64> {
    AgreementObjective::new(target).evaluate(rotated, &mut IndexScratch::default())
}

/// The `(P[i][j], similarity)` pairs the agreement index is computed from.
pub fn agreement_pairs(rotated: &DMatrix<f64>, target: &TargetMatrix) -> FaResult<Vec<(f64, f64)>> {
    let objective = AgreementObjective::new(target);
    let mut scratch = IndexScratch::default();
    objective.similarities(rotated, &mut scratch)?;
    Ok(objective
        .prior
        .iter()
        .copied()
        .zip(scratch.similarities.iter().copied())
        .collect())
}

/// `n × n` matrix of row similarities with a unit diagonal.
pub fn row_similarity_matrix(rotated: &DMatrix<f64>) -> FaResult<DMatrix<f64>> {
    let (n, k) = rotated.shape();
    let mut rows = Vec::new();
    fill_abs_rows(rotated, &mut rows)?;
    let mut out = DMatrix::<f64>::identity(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let s = rescale(tau_b_direct(
                &rows[i * k..(i + 1) * k],
                &rows[j * k..(j + 1) * k],
            ));
            out[(i, j)] = s;
            out[(j, i)] = s;
        }
    }
    Ok(out)
}

/// Horizontal index in `[0, 1]`: 1 when the factors' central meanings are
/// mutually orthogonal in embedding space.
///
/// The central meaning of factor `f` is the embedding average weighted by the
/// absolute loadings on `f`. With fewer than two factors the index is 1.
pub fn horizontal_index(rotated: &DMatrix<f64>, embeddings: &[Vec<f64>]) -> FaResult<f64> {
    horizontal_index_with(rotated, embeddings, &mut Vec::new())
}

/// [`horizontal_index`] writing the `t × dim` central meanings into `meanings`.
fn horizontal_index_with(
    rotated: &DMatrix<f64>,
    embeddings: &[Vec<f64>],
    meanings: &mut Vec<f64>,
) -> FaResult<f64> {
    let (n, t) = rotated.shape();
    if embeddings.len() != n {
        return Err(FaError::ShapeMismatch {
            context: "embedding count",
            expected: n,
            actual: embeddings.len(),
        });
    }
    if t < 2 {
        return Ok(1.0);
    }
    let dim = embeddings.first().map_or(0, Vec::len);
    meanings.clear();
    meanings.resize(t * dim, 0.0);
    for (f, meaning) in meanings.chunks_exact_mut(dim.max(1)).enumerate() {
        let mut weight_sum = 0.0;
        for (j, embedding) in embeddings.iter().enumerate() {
            let w = rotated[(j, f)].abs();
            if !w.is_finite() {
                return Err(FaError::Numerical(format!(
                    "non-finite rotated loading at ({j}, {f})"
                )));
            }
            weight_sum += w;
            for (m, e) in meaning.iter_mut().zip(embedding) {
                *m += w * e;
            }
        }
        if weight_sum > 0.0 {
            meaning.iter_mut().for_each(|m| *m /= weight_sum);
        }
    }

    let mut deviation = 0.0;
    for a in 0..t {
        for b in (a + 1)..t {
            let cos = cosine(
                &meanings[a * dim..(a + 1) * dim],
                &meanings[b * dim..(b + 1) * dim],
            );
            deviation += (cos.acos() - FRAC_PI_2).abs();
        }
    }
    let tf = t as f64;
    Ok((1.0 - 4.0 / (PI * tf * (tf - 1.0)) * deviation).clamp(0.0, 1.0))
}

/// Combines agreement `v` and horizontal `h` into the overall index.
pub fn overall_index(v: f64, h: f64) -> f64 {
    1.0 - (SQRT_2 / 2.0) * ((v - 1.0).powi(2) + (h - 1.0).powi(2)).sqrt()
}

/// Cosine similarity clamped to `[-1, 1]`; 0 when either vector has no length.
pub(crate) fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na < 1e-12 || nb < 1e-12 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

/// Every index available for a rotated solution and its target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexReport {
    pub agreement: f64,
    pub horizontal: Option<f64>,
    pub overall: Option<f64>,
}

impl IndexReport {
    pub fn compute(rotated: &DMatrix<f64>, target: &TargetMatrix) -> FaResult<Self> {
        let agreement = agreement_index(rotated, target)?;
        let horizontal = match target.embeddings() {
            Some(embeddings) => Some(horizontal_index(rotated, embeddings)?),
            None => None,
        };
        Ok(Self {
            agreement,
            horizontal,
            overall: horizontal.map(|h| overall_index(agreement, h)),
        })
    }

    pub fn get(&self, kind: IndexKind) -> Option<f64> {
        match kind {
            IndexKind::Agreement => Some(self.agreement),
            IndexKind::Horizontal => self.horizontal,
            IndexKind::Overall => self.overall,
        }
    }

    /// Index name → value. `vertical` is an alias of `agreement`.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert(IndexKind::AGREEMENT.to_string(), self.agreement);
        map.insert(IndexKind::VERTICAL.to_string(), self.agreement);
        if let Some(h) = self.horizontal {
            map.insert(IndexKind::HORIZONTAL.to_string(), h);
        }
        if let Some(o) = self.overall {
            map.insert(IndexKind::OVERALL.to_string(), o);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_grouper_prior;
    use approx::assert_abs_diff_eq;

    fn block_loadings() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            6,
            3,
            &[
                0.80, 0.10, 0.05, //
                0.70, 0.12, 0.02, //
                0.75, 0.20, 0.10, //
                0.10, 0.80, 0.05, //
                0.15, 0.65, 0.05, //
                0.12, 0.70, 0.01, //
            ],
        )
    }

    #[test]
    fn row_similarity_is_symmetric_with_unit_diagonal() {
        let sims = row_similarity_matrix(&block_loadings()).unwrap();
        for i in 0..6 {
            assert_eq!(sims[(i, i)], 1.0);
            for j in 0..6 {
                assert_eq!(sims[(i, j)], sims[(j, i)]);
            }
        }
        // Rows 0 and 1 rank their factors identically.
        assert_abs_diff_eq!(sims[(0, 1)], 1.0);
        // Rows 0 and 3: one discordant pair out of three.
        assert_abs_diff_eq!(sims[(0, 3)], 0.5 * (1.0 / 3.0 + 1.0), epsilon = 1e-12);
    }

    #[test]
    fn aligned_structure_beats_scrambled_rows() {
        let target = generate_grouper_prior(6, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let aligned = agreement_index(&block_loadings(), &target).unwrap();
        let scrambled = DMatrix::from_row_slice(
            6,
            3,
            &[
                0.80, 0.10, 0.05, //
                0.12, 0.70, 0.02, //
                0.05, 0.20, 0.75, //
                0.80, 0.10, 0.05, //
                0.05, 0.15, 0.65, //
                0.12, 0.70, 0.01, //
            ],
        );
        let scrambled = agreement_index(&scrambled, &target).unwrap();
        assert_abs_diff_eq!(aligned, 1.0, epsilon = 1e-12);
        assert!(aligned > scrambled + 0.3, "{aligned} vs {scrambled}");
    }

    #[test]
    fn index_ignores_row_scale_and_sign() {
        let target = generate_grouper_prior(6, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let base = block_loadings();
        let mut scaled = base.clone();
        for (row, factor) in [3.0, -0.5, 10.0, -1.0, 0.01, 2.5].iter().enumerate() {
            scaled.row_mut(row).scale_mut(*factor);
        }
        assert_abs_diff_eq!(
            agreement_index(&base, &target).unwrap(),
            agreement_index(&scaled, &target).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn zero_rows_and_single_factor_stay_finite() {
        let target = generate_grouper_prior(3, &[vec![1, 2]]).unwrap();
        let zeros = DMatrix::<f64>::zeros(3, 2);
        let v = agreement_index(&zeros, &target).unwrap();
        assert_abs_diff_eq!(v, 0.5);
        let single = DMatrix::from_row_slice(3, 1, &[0.3, 0.9, 0.1]);
        assert_abs_diff_eq!(agreement_index(&single, &target).unwrap(), 0.5);
    }

    #[test]
    fn objective_rejects_wrong_row_count() {
        let target = TargetMatrix::identity(4);
        let err = agreement_index(&DMatrix::zeros(3, 2), &target).unwrap_err();
        assert!(matches!(err, FaError::ShapeMismatch { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn horizontal_is_one_for_orthogonal_meanings() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ];
        let rotated = DMatrix::from_row_slice(4, 2, &[0.9, 0.0, 0.8, 0.0, 0.0, 0.7, 0.0, 0.6]);
        assert_abs_diff_eq!(horizontal_index(&rotated, &embeddings).unwrap(), 1.0, epsilon = 1e-12);

        // Both factors point at the same meaning: maximal overlap.
        let mixed = DMatrix::from_row_slice(4, 2, &[0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);
        assert_abs_diff_eq!(horizontal_index(&mixed, &embeddings).unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn overall_combines_distance_to_ideal() {
        assert_abs_diff_eq!(overall_index(1.0, 1.0), 1.0);
        assert_abs_diff_eq!(overall_index(0.0, 0.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(overall_index(0.5, 1.0), 1.0 - SQRT_2 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn report_map_includes_semantic_indices_only_with_embeddings() {
        let target = generate_grouper_prior(6, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let report = IndexReport::compute(&block_loadings(), &target).unwrap();
        let map = report.to_map();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["agreement", "vertical"]);

        let embeddings = (0..6).map(|i| vec![(i / 3) as f64, 1.0 - (i / 3) as f64]).collect();
        let target = target.with_embeddings(embeddings).unwrap();
        let report = IndexReport::compute(&block_loadings(), &target).unwrap();
        assert!(report.horizontal.is_some());
        assert_eq!(report.to_map().len(), 4);
    }

    #[test]
    fn overall_objective_reuses_scratch_across_factor_counts() {
        let embeddings: Vec<Vec<f64>> =
            (0..6).map(|i| vec![(i / 3) as f64, 1.0 - (i / 3) as f64, 0.1 * i as f64]).collect();
        let target = generate_grouper_prior(6, &[vec![1, 2, 3], vec![4, 5, 6]])
            .unwrap()
            .with_embeddings(embeddings.clone())
            .unwrap();
        let objective = OverallObjective::new(&target).unwrap();
        let three = block_loadings();
        let two = three.columns(0, 2).into_owned();
        let mut scratch = IndexScratch::default();
        for rotated in [&three, &two, &three] {
            let expected = overall_index(
                agreement_index(rotated, &target).unwrap(),
                horizontal_index(rotated, &embeddings).unwrap(),
            );
            let value = objective.evaluate(rotated, &mut scratch).unwrap();
            assert_abs_diff_eq!(value, expected, epsilon = 1e-12);
        }
    }
}
