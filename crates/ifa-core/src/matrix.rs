//! Loading, target and rotation matrices.

use crate::{FaError, FaResult};
use nalgebra::DMatrix;
use std::sync::Arc;

/// Maximum Frobenius norm of `RᵗR − I` for a matrix to count as orthogonal.
pub const ORTHOGONALITY_TOLERANCE: f64 = 1e-6;

const SYMMETRY_TOLERANCE: f64 = 1e-9;

fn first_non_finite(matrix: &DMatrix<f64>) -> Option<(usize, usize)> {
    for col in 0..matrix.ncols() {
        for row in 0..matrix.nrows() {
            if !matrix[(row, col)].is_finite() {
                return Some((row, col));
            }
        }
    }
    None
}

/// Factor loadings produced by an external extraction routine, `n_variables × k_factors`.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadingMatrix(DMatrix<f64>);

impl LoadingMatrix {
    pub fn new(matrix: DMatrix<f64>) -> FaResult<Self> {
        if matrix.nrows() == 0 {
            return Err(FaError::ShapeMismatch {
                context: "loading rows",
                expected: 1,
                actual: 0,
            });
        }
        if matrix.ncols() == 0 {
            return Err(FaError::ShapeMismatch {
                context: "loading columns",
                expected: 1,
                actual: 0,
            });
        }
        if let Some((row, col)) = first_non_finite(&matrix) {
            return Err(FaError::NonFinite {
                context: "loadings",
                row,
                col,
            });
        }
        Ok(Self(matrix))
    }

    /// Builds loadings from row-major data.
    pub fn from_row_slice(n_variables: usize, n_factors: usize, data: &[f64]) -> FaResult<Self> {
        if data.len() != n_variables * n_factors {
            return Err(FaError::ShapeMismatch {
                context: "loading data",
                expected: n_variables * n_factors,
                actual: data.len(),
            });
        }
        Self::new(DMatrix::from_row_slice(n_variables, n_factors, data))
    }

    pub fn n_variables(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_factors(&self) -> usize {
        self.0.ncols()
    }

    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.0
    }

    /// Returns `L·R`.
    pub fn rotate(&self, rotation: &RotationMatrix) -> FaResult<DMatrix<f64>> {
        if rotation.dim() != self.n_factors() {
            return Err(FaError::ShapeMismatch {
                context: "rotation dimension",
                expected: self.n_factors(),
                actual: rotation.dim(),
            });
        }
        Ok(&self.0 * rotation.as_matrix())
    }
}

/// An orthogonal `k × k` matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationMatrix(DMatrix<f64>);

impl RotationMatrix {
    pub fn identity(k: usize) -> Self {
        Self(DMatrix::identity(k, k))
    }

    /// Validates that `matrix` is square, finite and orthogonal within
    /// [`ORTHOGONALITY_TOLERANCE`].
    pub fn new(matrix: DMatrix<f64>) -> FaResult<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(FaError::ShapeMismatch {
                context: "rotation columns",
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            });
        }
        if let Some((row, col)) = first_non_finite(&matrix) {
            return Err(FaError::NonFinite {
                context: "rotation",
                row,
                col,
            });
        }
        let error = Self::orthogonality_error_of(&matrix);
        if error > ORTHOGONALITY_TOLERANCE {
            return Err(FaError::NotOrthogonal {
                error,
                tolerance: ORTHOGONALITY_TOLERANCE,
            });
        }
        Ok(Self(matrix))
    }

    /// Builds `(I − S)(I + S)⁻¹` from the upper-triangle entries of a skew-symmetric `S`.
    pub fn from_cayley(params: &[f64], k: usize) -> FaResult<Self> {
        Self::new(cayley(params, k)?)
    }

    /// Frobenius norm of `MᵗM − I`.
    pub fn orthogonality_error_of(matrix: &DMatrix<f64>) -> f64 {
        let k = matrix.ncols();
        (matrix.transpose() * matrix - DMatrix::<f64>::identity(k, k)).norm()
    }

    pub fn orthogonality_error(&self) -> f64 {
        Self::orthogonality_error_of(&self.0)
    }

    pub fn dim(&self) -> usize {
        self.0.nrows()
    }

    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.0
    }

    /// Rows as vectors, for serialization.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        rows_of(&self.0)
    }
}

pub(crate) fn rows_of(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

/// Number of free parameters of a `k × k` skew-symmetric matrix.
pub fn skew_param_count(k: usize) -> usize {
    k * k.saturating_sub(1) / 2
}

/// Cayley transform `(I − S)(I + S)⁻¹` of the skew-symmetric matrix whose
/// strict upper triangle, read row by row, is `params`.
///
/// `I + S` is invertible for every real skew-symmetric `S`, so the only
/// failure modes are a wrong parameter count and non-finite input.
pub fn cayley(params: &[f64], k: usize) -> FaResult<DMatrix<f64>> {
    let expected = skew_param_count(k);
    if params.len() != expected {
        return Err(FaError::ShapeMismatch {
            context: "cayley parameters",
            expected,
            actual: params.len(),
        });
    }
    if params.iter().any(|p| !p.is_finite()) {
        return Err(FaError::Numerical(
            "non-finite cayley parameter".to_string(),
        ));
    }
    let mut skew = DMatrix::<f64>::zeros(k, k);
    let mut idx = 0;
    for i in 0..k {
        for j in (i + 1)..k {
            skew[(i, j)] = params[idx];
            skew[(j, i)] = -params[idx];
            idx += 1;
        }
    }
    let identity = DMatrix::<f64>::identity(k, k);
    let inverse = (&identity + &skew)
        .try_inverse()
        .ok_or_else(|| FaError::Numerical("I + S is singular".to_string()))?;
    Ok((identity - skew) * inverse)
}

/// Symmetric `n × n` matrix of expected pairwise association between variables.
///
/// The diagonal is fixed to 1 and never takes part in pairwise sums. Pairs can
/// be marked unknown, in which case they are skipped by every index.
#[derive(Clone, Debug)]
pub struct TargetMatrix {
    values: DMatrix<f64>,
    known: DMatrix<bool>,
    embeddings: Option<Arc<Vec<Vec<f64>>>>,
}

impl TargetMatrix {
    /// A target with no off-diagonal signal.
    pub fn identity(n: usize) -> Self {
        Self {
            values: DMatrix::identity(n, n),
            known: DMatrix::from_element(n, n, true),
            embeddings: None,
        }
    }

    /// Wraps a user-supplied matrix. NaN entries become unknown pairs; the
    /// diagonal is reset to 1.
    pub fn from_matrix(matrix: DMatrix<f64>) -> FaResult<Self> {
        let n = matrix.nrows();
        if n == 0 {
            return Err(FaError::ShapeMismatch {
                context: "target rows",
                expected: 1,
                actual: 0,
            });
        }
        if matrix.ncols() != n {
            return Err(FaError::ShapeMismatch {
                context: "target columns",
                expected: n,
                actual: matrix.ncols(),
            });
        }
        let mut values = matrix;
        let mut known = DMatrix::from_element(n, n, true);
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (values[(i, j)], values[(j, i)]);
                if a.is_infinite() || b.is_infinite() {
                    return Err(FaError::NonFinite {
                        context: "target",
                        row: i,
                        col: j,
                    });
                }
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => {
                        known[(i, j)] = false;
                        known[(j, i)] = false;
                        values[(i, j)] = 0.0;
                        values[(j, i)] = 0.0;
                    }
                    (false, false) if (a - b).abs() <= SYMMETRY_TOLERANCE => {
                        // Adding 0.0 turns -0.0 into 0.0 so ranks never see the sign.
                        values[(i, j)] = a + 0.0;
                        values[(j, i)] = b + 0.0;
                    }
                    _ => return Err(FaError::NotSymmetric { row: i, col: j }),
                }
            }
            values[(i, i)] = 1.0;
        }
        Ok(Self {
            values,
            known,
            embeddings: None,
        })
    }

    pub(crate) fn from_parts(
        values: DMatrix<f64>,
        known: DMatrix<bool>,
        embeddings: Option<Arc<Vec<Vec<f64>>>>,
    ) -> Self {
        Self {
            values,
            known,
            embeddings,
        }
    }

    pub fn n(&self) -> usize {
        self.values.nrows()
    }

    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    pub fn is_known(&self, i: usize, j: usize) -> bool {
        self.known[(i, j)]
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Known off-diagonal pairs `(i, j, P[i][j])` with `i < j`, row by row.
    pub fn known_pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.n();
        (0..n).flat_map(move |i| {
            ((i + 1)..n)
                .filter(move |&j| self.known[(i, j)])
                .map(move |j| (i, j, self.values[(i, j)]))
        })
    }

    /// Whether at least two known pairs disagree, i.e. the target can rank anything.
    pub fn has_signal(&self) -> bool {
        let mut pairs = self.known_pairs().map(|(_, _, v)| v);
        match pairs.next() {
            Some(first) => pairs.any(|v| v != first),
            None => false,
        }
    }

    /// Embeddings the target was derived from, when it came from texts.
    pub fn embeddings(&self) -> Option<&Arc<Vec<Vec<f64>>>> {
        self.embeddings.as_ref()
    }

    /// Attaches question embeddings, enabling the horizontal and overall indices.
    pub fn with_embeddings(mut self, embeddings: Vec<Vec<f64>>) -> FaResult<Self> {
        if embeddings.len() != self.n() {
            return Err(FaError::ShapeMismatch {
                context: "embedding count",
                expected: self.n(),
                actual: embeddings.len(),
            });
        }
        if let Some(first) = embeddings.first() {
            let dim = first.len();
            if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
                return Err(FaError::ShapeMismatch {
                    context: "embedding dimension",
                    expected: dim,
                    actual: bad.len(),
                });
            }
        }
        self.embeddings = Some(Arc::new(embeddings));
        Ok(self)
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        rows_of(&self.values)
    }
}
