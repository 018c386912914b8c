//! Seeds for reproducible rotation searches.
//!
//! A search resolves one base seed, either the caller's or one derived from the
//! environment, and every restart hashes its index into that base. The restart
//! seeds therefore do not depend on which thread runs a restart or in what
//! order restarts finish.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

const DEFAULT_SEED: u64 = 123;

/// Process-wide reproducibility settings, read once from `IFA_DETERMINISTIC`,
/// `IFA_DETERMINISTIC_SEED` and `IFA_DETERMINISTIC_REDUCTION`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeterminismConfig {
    /// Unseeded searches derive their base seed from `base_seed` instead of
    /// drawing one from the operating system.
    pub enabled: bool,
    pub base_seed: u64,
    /// Restarts run sequentially instead of on the rayon pool.
    pub fix_reduction: bool,
}

impl DeterminismConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| {
            lookup(name).is_some_and(|raw| {
                matches!(
                    raw.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "on" | "yes"
                )
            })
        };
        Self {
            enabled: flag("IFA_DETERMINISTIC"),
            base_seed: lookup("IFA_DETERMINISTIC_SEED")
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(DEFAULT_SEED),
            fix_reduction: flag("IFA_DETERMINISTIC_REDUCTION"),
        }
    }
}

/// Hashes `label` into `base`. Priorimax labels restarts by their index.
pub fn derive_seed<L: Hash>(base: u64, label: L) -> u64 {
    let mut hasher = DefaultHasher::new();
    base.hash(&mut hasher);
    label.hash(&mut hasher);
    hasher.finish()
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| DeterminismConfig::from_lookup(|name| std::env::var(name).ok()))
}

fn resolve_base_seed(cfg: &DeterminismConfig, seed: Option<u64>, label: &str) -> u64 {
    match seed {
        Some(value) => value,
        None if cfg.enabled => derive_seed(cfg.base_seed, label),
        None => rand::random(),
    }
}

/// Base seed of a search. An explicit seed always wins; otherwise it is
/// derived from `label` when determinism is enabled and random when it is not.
pub fn base_seed(seed: Option<u64>, label: &str) -> u64 {
    resolve_base_seed(config(), seed, label)
}

/// Whether restarts must run sequentially.
pub fn lock_reduction_order() -> bool {
    let cfg = config();
    cfg.enabled && cfg.fix_reduction
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn restart_seeds_are_distinct_and_stable() {
        let base = base_seed(Some(4242), "priorimax");
        let seeds: Vec<u64> = (0..64usize).map(|restart| derive_seed(base, restart)).collect();
        assert_eq!(seeds.iter().collect::<HashSet<_>>().len(), seeds.len());
        let again: Vec<u64> = (0..64usize).map(|restart| derive_seed(base, restart)).collect();
        assert_eq!(seeds, again);
        assert_ne!(derive_seed(base, 0usize), derive_seed(base + 1, 0usize));
    }

    #[test]
    fn explicit_seed_ignores_the_environment() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[
            ("IFA_DETERMINISTIC", "1"),
            ("IFA_DETERMINISTIC_SEED", "9"),
        ]));
        assert_eq!(resolve_base_seed(&cfg, Some(7), "priorimax"), 7);
        assert_eq!(base_seed(Some(7), "priorimax"), 7);
    }

    #[test]
    fn deterministic_mode_derives_unseeded_searches_from_the_label() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[
            ("IFA_DETERMINISTIC", "on"),
            ("IFA_DETERMINISTIC_SEED", " 1337 "),
            ("IFA_DETERMINISTIC_REDUCTION", "TRUE"),
        ]));
        assert_eq!(
            cfg,
            DeterminismConfig {
                enabled: true,
                base_seed: 1337,
                fix_reduction: true,
            }
        );
        let first = resolve_base_seed(&cfg, None, "priorimax");
        assert_eq!(first, resolve_base_seed(&cfg, None, "priorimax"));
        assert_eq!(first, derive_seed(1337, "priorimax"));
        assert_ne!(first, resolve_base_seed(&cfg, None, "interpmax"));
    }

    #[test]
    fn unset_or_false_flags_keep_searches_unseeded() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[
            ("IFA_DETERMINISTIC", "off"),
            ("IFA_DETERMINISTIC_SEED", "not a number"),
        ]));
        assert!(!cfg.enabled);
        assert!(!cfg.fix_reduction);
        assert_eq!(cfg.base_seed, DEFAULT_SEED);
    }
}
