//! Construction of target (prior) matrices.
//!
//! A target is built either from explicit groupings of 1-indexed variable ids
//! or from the pairwise angular similarity of text embeddings. When a caller
//! supplies both, the groupings win and the texts are ignored.

use crate::index::cosine;
use crate::{FaError, FaResult, TargetMatrix};
use nalgebra::DMatrix;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;

pub type EmbedResult = Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>>;

/// Maps a text to a fixed-length vector. Implemented for plain closures.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> EmbedResult;
}

impl<F> Embedder for F
where
    F: Fn(&str) -> Vec<f64> + Send + Sync,
{
    fn embed(&self, text: &str) -> EmbedResult {
        Ok(self(text))
    }
}

/// How pairs involving a variable that belongs to no group are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnassignedPolicy {
    /// Unassigned variables have zero association with every other variable.
    #[default]
    Zero,
    /// Pairs touching an unassigned variable are left out of every index.
    Exclude,
}

/// Builder selecting exactly one source for a target matrix.
pub struct PriorMatrixBuilder<'a> {
    n_variables: usize,
    groups: Option<Vec<&'a [usize]>>,
    texts: Option<Vec<&'a str>>,
    embedder: Option<&'a dyn Embedder>,
    unassigned: UnassignedPolicy,
}

impl<'a> PriorMatrixBuilder<'a> {
    pub fn new(n_variables: usize) -> Self {
        Self {
            n_variables,
            groups: None,
            texts: None,
            embedder: None,
            unassigned: UnassignedPolicy::default(),
        }
    }

    pub fn groups<G: AsRef<[usize]>>(mut self, groups: &'a [G]) -> Self {
        self.groups = Some(groups.iter().map(AsRef::as_ref).collect());
        self
    }

    pub fn texts<S: AsRef<str>>(mut self, texts: &'a [S]) -> Self {
        self.texts = Some(texts.iter().map(AsRef::as_ref).collect());
        self
    }

    pub fn embedder(mut self, embedder: &'a dyn Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn unassigned(mut self, policy: UnassignedPolicy) -> Self {
        self.unassigned = policy;
        self
    }

    pub fn build(self) -> FaResult<TargetMatrix> {
        if self.n_variables == 0 {
            return Err(FaError::ShapeMismatch {
                context: "prior variables",
                expected: 1,
                actual: 0,
            });
        }
        match (self.groups, self.texts) {
            (Some(groups), texts) => {
                if texts.is_some() {
                    debug!(
                        n_variables = self.n_variables,
                        "both groups and texts supplied; building the prior from groups"
                    );
                }
                grouper(self.n_variables, &groups, self.unassigned)
            }
            (None, Some(texts)) => {
                if texts.len() != self.n_variables {
                    return Err(FaError::ShapeMismatch {
                        context: "prior texts",
                        expected: self.n_variables,
                        actual: texts.len(),
                    });
                }
                let embedder = self
                    .embedder
                    .ok_or(FaError::MissingEmbedder("the semantic prior"))?;
                semantic(&texts, embedder)
            }
            (None, None) => Err(FaError::MissingPriorSource),
        }
    }
}

/// Target where variables sharing a group have association 1 and all other
/// pairs 0. Ids are 1-indexed.
pub fn generate_grouper_prior<G: AsRef<[usize]>>(
    n_variables: usize,
    groups: &[G],
) -> FaResult<TargetMatrix> {
    PriorMatrixBuilder::new(n_variables).groups(groups).build()
}

/// Target of pairwise angular similarities `1 − arccos(cos θ)/π` between the
/// embeddings of `texts`, one variable per text.
pub fn build_semantic_prior<S: AsRef<str>>(
    texts: &[S],
    embedder: &dyn Embedder,
) -> FaResult<TargetMatrix> {
    PriorMatrixBuilder::new(texts.len())
        .texts(texts)
        .embedder(embedder)
        .build()
}

fn grouper(n: usize, groups: &[&[usize]], policy: UnassignedPolicy) -> FaResult<TargetMatrix> {
    let mut assigned = vec![false; n];
    for group in groups {
        for &id in group.iter() {
            if id == 0 || id > n {
                return Err(FaError::InvalidGroupIndex {
                    index: id,
                    n_variables: n,
                });
            }
            assigned[id - 1] = true;
        }
    }

    let mut values = DMatrix::<f64>::identity(n, n);
    for group in groups {
        for &a in group.iter() {
            for &b in group.iter() {
                if a != b {
                    values[(a - 1, b - 1)] = 1.0;
                }
            }
        }
    }

    let mut known = DMatrix::from_element(n, n, true);
    if policy == UnassignedPolicy::Exclude {
        for (v, _) in assigned.iter().enumerate().filter(|(_, a)| !**a) {
            for other in (0..n).filter(|&o| o != v) {
                known[(v, other)] = false;
                known[(other, v)] = false;
            }
        }
    }
    debug!(
        n_variables = n,
        groups = groups.len(),
        unassigned = assigned.iter().filter(|a| !**a).count(),
        "built grouper prior"
    );
    Ok(TargetMatrix::from_parts(values, known, None))
}

fn semantic(texts: &[&str], embedder: &dyn Embedder) -> FaResult<TargetMatrix> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for (index, text) in texts.iter().enumerate() {
        let embedding = embedder.embed(text).map_err(|err| FaError::Embedding {
            index,
            message: err.to_string(),
        })?;
        if let Some(first) = embeddings.first().map(Vec::len) {
            if embedding.len() != first {
                return Err(FaError::ShapeMismatch {
                    context: "embedding dimension",
                    expected: first,
                    actual: embedding.len(),
                });
            }
        }
        if let Some(col) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(FaError::NonFinite {
                context: "embedding",
                row: index,
                col,
            });
        }
        embeddings.push(embedding);
    }

    let n = embeddings.len();
    let mut values = DMatrix::<f64>::identity(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let similarity = 1.0 - cosine(&embeddings[i], &embeddings[j]).acos() / PI;
            values[(i, j)] = similarity;
            values[(j, i)] = similarity;
        }
    }
    debug!(
        n_variables = n,
        dimension = embeddings.first().map_or(0, Vec::len),
        "built semantic prior"
    );
    Ok(TargetMatrix::from_parts(
        values,
        DMatrix::from_element(n, n, true),
        Some(Arc::new(embeddings)),
    ))
}
