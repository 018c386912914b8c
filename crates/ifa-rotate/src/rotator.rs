use crate::priorimax::{budget_duration, PriorimaxConfig};
use crate::report::RotationSource;
use crate::store::{FittedModel, FittedModelStore};
use crate::strategy::{RotationMethod, RotationRequest, RotationStrategy};
use ifa_core::{FaError, FaResult, LoadingMatrix, TargetMatrix};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, info_span};

/// Dispatches fits to built-in methods or to strategies registered by name.
#[derive(Clone, Default)]
pub struct FactorRotator {
    custom: BTreeMap<String, Arc<dyn RotationStrategy>>,
    defaults: PriorimaxConfig,
}

impl FactorRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priorimax configuration used when a fit passes none.
    pub fn with_defaults(mut self, config: PriorimaxConfig) -> Self {
        self.defaults = config;
        self
    }

    /// Registers `strategy` under its lower-cased name. Registered strategies
    /// shadow built-in methods of the same name.
    pub fn register(&mut self, strategy: Arc<dyn RotationStrategy>) -> &mut Self {
        self.custom
            .insert(strategy.name().to_ascii_lowercase(), strategy);
        self
    }

    pub fn resolve(&self, method: &str) -> FaResult<Arc<dyn RotationStrategy>> {
        let key = method.trim().to_ascii_lowercase();
        if let Some(strategy) = self.custom.get(&key) {
            return Ok(Arc::clone(strategy));
        }
        let builtin: RotationMethod = method.parse()?;
        Ok(Arc::new(builtin))
    }

    /// Fits `loadings` against `target` and stores the result as `name`.
    ///
    /// Shapes, the method tag, the budget and the configuration are checked
    /// before any rotation work starts.
    #[allow(clippy::too_many_arguments)]
    pub fn fit<'s>(
        &self,
        store: &'s mut FittedModelStore,
        name: &str,
        loadings: &LoadingMatrix,
        target: &TargetMatrix,
        method: &str,
        time_budget_seconds: f64,
        config: Option<&PriorimaxConfig>,
    ) -> FaResult<&'s FittedModel> {
        if target.n() != loadings.n_variables() {
            return Err(FaError::ShapeMismatch {
                context: "target variables",
                expected: loadings.n_variables(),
                actual: target.n(),
            });
        }
        let strategy = self.resolve(method)?;
        budget_duration(time_budget_seconds)?;
        let config = config.unwrap_or(&self.defaults).clone();
        config.validate()?;

        let span = info_span!("fit", model = name, method = strategy.name());
        let _guard = span.enter();
        let request = RotationRequest::new(time_budget_seconds).with_priorimax(config);
        let (rotation, mut diagnostics) = strategy.rotate(loadings, target, &request)?;
        if rotation.dim() != loadings.n_factors() {
            return Err(FaError::ShapeMismatch {
                context: "strategy rotation",
                expected: loadings.n_factors(),
                actual: rotation.dim(),
            });
        }
        if self.custom.contains_key(&strategy.name().to_ascii_lowercase()) {
            diagnostics.source = RotationSource::External {
                name: strategy.name().to_string(),
            };
        }

        let model = FittedModel::new(name, loadings.clone(), rotation, target.clone(), diagnostics)?;
        info!(
            converged = model.diagnostics().converged,
            objective_value = ?model.diagnostics().objective_value,
            "model fitted"
        );
        store.insert(model);
        store.get(name)
    }
}

/// Fits with the built-in methods and stores the model as `name`.
pub fn fit_rotation<'s>(
    store: &'s mut FittedModelStore,
    name: &str,
    loadings: &LoadingMatrix,
    target: &TargetMatrix,
    method: &str,
    time_budget_seconds: f64,
    config: Option<&PriorimaxConfig>,
) -> FaResult<&'s FittedModel> {
    FactorRotator::new().fit(
        store,
        name,
        loadings,
        target,
        method,
        time_budget_seconds,
        config,
    )
}

/// Every index of the stored model `name`, keyed by index name.
pub fn compute_index(store: &FittedModelStore, name: &str) -> FaResult<BTreeMap<String, f64>> {
    store.compute_index(name)
}
