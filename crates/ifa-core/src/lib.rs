//! Core data model for interpretable factor rotation.
//!
//! A [`TargetMatrix`] encodes which variables are expected to share factor
//! structure, either from explicit groupings or from the semantic similarity
//! of the questions behind each variable. The [`index`] module scores a rotated
//! loading matrix against that target; the score is what the priorimax
//! rotation maximises.

pub mod error;
pub mod index;
pub mod kendall;
pub mod matrix;
pub mod prior;

pub use error::{FaError, FaResult};
pub use index::{
    agreement_index, agreement_pairs, horizontal_index, overall_index, row_similarity_matrix,
    AgreementObjective, IndexKind, IndexReport, IndexScratch, OverallObjective,
    RotationObjective,
};
pub use matrix::{
    cayley, skew_param_count, LoadingMatrix, RotationMatrix, TargetMatrix,
    ORTHOGONALITY_TOLERANCE,
};
pub use prior::{
    build_semantic_prior, generate_grouper_prior, EmbedResult, Embedder, PriorMatrixBuilder,
    UnassignedPolicy,
};
