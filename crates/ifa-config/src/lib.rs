//! Runtime configuration shared by the ifa crates: seed derivation for
//! reproducible rotation searches and the tracing subscriber setup.

pub mod determinism;
pub mod tracing;

pub use determinism::{base_seed, config, derive_seed, lock_reduction_order, DeterminismConfig};
pub use tracing::{flush_chrome_trace, init_tracing, InitError};
