//! Fitted models keyed by name.

use crate::report::FitDiagnostics;
use ifa_core::{
    FaError, FaResult, IndexKind, IndexReport, LoadingMatrix, RotationMatrix, TargetMatrix,
};
use nalgebra::DMatrix;
use serde::Serialize;
use std::collections::BTreeMap;

/// A rotated solution together with what it was fitted against.
#[derive(Debug, Clone)]
pub struct FittedModel {
    name: String,
    loadings: LoadingMatrix,
    rotation: RotationMatrix,
    rotated: DMatrix<f64>,
    target: TargetMatrix,
    diagnostics: FitDiagnostics,
}

impl FittedModel {
    pub fn new(
        name: impl Into<String>,
        loadings: LoadingMatrix,
        rotation: RotationMatrix,
        target: TargetMatrix,
        diagnostics: FitDiagnostics,
    ) -> FaResult<Self> {
        if target.n() != loadings.n_variables() {
            return Err(FaError::ShapeMismatch {
                context: "target variables",
                expected: loadings.n_variables(),
                actual: target.n(),
            });
        }
        let rotated = loadings.rotate(&rotation)?;
        Ok(Self {
            name: name.into(),
            loadings,
            rotation,
            rotated,
            target,
            diagnostics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &str {
        &self.diagnostics.method
    }

    pub fn loadings(&self) -> &LoadingMatrix {
        &self.loadings
    }

    pub fn rotation(&self) -> &RotationMatrix {
        &self.rotation
    }

    /// `L·R`.
    pub fn rotated_loadings(&self) -> &DMatrix<f64> {
        &self.rotated
    }

    pub fn target(&self) -> &TargetMatrix {
        &self.target
    }

    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    pub fn indices(&self) -> FaResult<IndexReport> {
        IndexReport::compute(&self.rotated, &self.target)
    }

    pub fn summary(&self) -> FaResult<ModelSummary> {
        Ok(ModelSummary {
            name: self.name.clone(),
            method: self.method().to_string(),
            n_variables: self.loadings.n_variables(),
            n_factors: self.loadings.n_factors(),
            indices: self.indices()?.to_map(),
            rotation: self.rotation.to_rows(),
            rotated_loadings: self
                .rotated
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
            diagnostics: self.diagnostics.clone(),
        })
    }

    pub fn to_json(&self) -> FaResult<String> {
        serde_json::to_string_pretty(&self.summary()?)
            .map_err(|err| FaError::Serialization(err.to_string()))
    }
}

/// Serializable view of a fitted model for reporting and plotting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub method: String,
    pub n_variables: usize,
    pub n_factors: usize,
    pub indices: BTreeMap<String, f64>,
    pub rotation: Vec<Vec<f64>>,
    pub rotated_loadings: Vec<Vec<f64>>,
    pub diagnostics: FitDiagnostics,
}

/// Caller-owned registry of fitted models.
///
/// Writes take `&mut self`, so one name has one writer at a time; reads can be
/// shared freely.
#[derive(Debug, Default, Clone)]
pub struct FittedModelStore {
    models: BTreeMap<String, FittedModel>,
}

impl FittedModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `model` under its name, returning the model it replaced.
    pub fn insert(&mut self, model: FittedModel) -> Option<FittedModel> {
        self.models.insert(model.name.clone(), model)
    }

    pub fn get(&self, name: &str) -> FaResult<&FittedModel> {
        self.models
            .get(name)
            .ok_or_else(|| FaError::UnknownModelName(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> FaResult<FittedModel> {
        self.models
            .remove(name)
            .ok_or_else(|| FaError::UnknownModelName(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Model names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn compute_index(&self, name: &str) -> FaResult<BTreeMap<String, f64>> {
        Ok(self.get(name)?.indices()?.to_map())
    }

    /// Summaries of `names` (every model when empty), best `kind` first.
    /// Equal scores keep the order of `names`.
    pub fn rank_models(&self, names: &[&str], kind: IndexKind) -> FaResult<Vec<ModelSummary>> {
        let names: Vec<&str> = if names.is_empty() {
            self.names()
        } else {
            names.to_vec()
        };
        let mut scored = Vec::with_capacity(names.len());
        for name in names {
            let summary = self.get(name)?.summary()?;
            let value = summary.indices.get(kind.as_str()).copied().ok_or(
                FaError::MissingEmbedder(match kind {
                    IndexKind::Overall => "ranking by the overall index",
                    _ => "ranking by the horizontal index",
                }),
            )?;
            scored.push((value, summary));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().map(|(_, summary)| summary).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RotationSource;

    fn model(name: &str, rows: &[f64]) -> FittedModel {
        let loadings = LoadingMatrix::from_row_slice(4, 2, rows).unwrap();
        let target = ifa_core::generate_grouper_prior(4, &[vec![1, 2], vec![3, 4]]).unwrap();
        FittedModel::new(
            name,
            loadings,
            RotationMatrix::identity(2),
            target,
            FitDiagnostics::simple("none", RotationSource::Initial, true),
        )
        .unwrap()
    }

    const CLEAN: [f64; 8] = [0.9, 0.1, 0.8, 0.2, 0.1, 0.7, 0.2, 0.9];
    const MUDDLED: [f64; 8] = [0.9, 0.1, 0.2, 0.8, 0.7, 0.1, 0.2, 0.9];

    #[test]
    fn unknown_names_are_typed_errors() {
        let mut store = FittedModelStore::new();
        assert_eq!(
            store.get("missing").unwrap_err(),
            FaError::UnknownModelName("missing".to_string())
        );
        assert!(matches!(
            store.remove("missing"),
            Err(FaError::UnknownModelName(_))
        ));
        assert!(matches!(
            store.compute_index("missing"),
            Err(FaError::UnknownModelName(_))
        ));
    }

    #[test]
    fn insert_replaces_and_names_are_sorted() {
        let mut store = FittedModelStore::new();
        assert!(store.insert(model("b", &CLEAN)).is_none());
        assert!(store.insert(model("a", &MUDDLED)).is_none());
        let replaced = store.insert(model("b", &MUDDLED)).unwrap();
        assert_eq!(replaced.loadings().as_matrix()[(1, 1)], 0.2);
        assert_eq!(store.names(), vec!["a", "b"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn ranking_puts_the_best_model_first() {
        let mut store = FittedModelStore::new();
        store.insert(model("muddled", &MUDDLED));
        store.insert(model("clean", &CLEAN));
        let ranked = store.rank_models(&[], IndexKind::Agreement).unwrap();
        let names: Vec<_> = ranked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["clean", "muddled"]);
        assert!(matches!(
            store.rank_models(&["clean"], IndexKind::Horizontal),
            Err(FaError::MissingEmbedder(_))
        ));
    }

    #[test]
    fn summary_serializes_rows() {
        let json = model("m", &CLEAN).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["rotated_loadings"][3][1], 0.9);
        assert_eq!(value["indices"]["vertical"], value["indices"]["agreement"]);
    }
}
