pub mod orthomax;
pub mod priorimax;
pub mod report;
pub mod rotator;
pub mod search;
pub mod store;
pub mod strategy;

pub use orthomax::{orthomax, OrthomaxConfig, OrthomaxFamily, OrthomaxFit};
pub use priorimax::{budget_duration, PriorimaxConfig, PriorimaxOptimizer, PriorimaxOutcome};
pub use report::{BaselineReport, FitDiagnostics, RestartReport, RotationSource};
pub use rotator::{compute_index, fit_rotation, FactorRotator};
pub use search::{SearchAlgorithm, StopReason};
pub use store::{FittedModel, FittedModelStore, ModelSummary};
pub use strategy::{RotationMethod, RotationRequest, RotationStrategy};
