//! Chunking-strategy resolution.
//!
//! A job's strategy is fixed at creation time from up to three sources, in
//! precedence order:
//!
//! 1. the request's full strategy override, if the target collection allows
//!    overrides and the override parses;
//! 2. the collection's configured strategy;
//! 3. the built-in default (size 1000, overlap 200), with request-level
//!    ad hoc size/overlap parameters applied field-wise.
//!
//! Malformed caller input never fails resolution: it falls through to the
//! next source with a logged warning. That leniency is deliberate — a bad
//! strategy string should cost the caller their override, not their job.

use tracing::warn;

use crate::models::{parse_positive, ChunkingStrategy, Collection, FixedStrategySpec};

/// Default window size when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap when nothing else is configured.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Resolve the strategy for a new job. Pure; no I/O.
pub fn resolve_strategy(
    requested: Option<&FixedStrategySpec>,
    ad_hoc_size: Option<&str>,
    ad_hoc_overlap: Option<&str>,
    collection: Option<&Collection>,
) -> ChunkingStrategy {
    if let (Some(spec), Some(coll)) = (requested, collection) {
        if coll.allow_strategy_override {
            match spec.parse() {
                Ok(strategy) => return strategy,
                Err(e) => {
                    warn!(
                        collection = %coll.id,
                        error = %e,
                        "requested chunking strategy is invalid, falling back to collection configuration"
                    );
                }
            }
        }
    }

    if let Some(strategy) = collection.and_then(|c| c.chunk_strategy.clone()) {
        return strategy;
    }

    default_with_overrides(ad_hoc_size, ad_hoc_overlap)
}

/// The built-in default strategy with optional field-wise overrides.
fn default_with_overrides(
    ad_hoc_size: Option<&str>,
    ad_hoc_overlap: Option<&str>,
) -> ChunkingStrategy {
    let size = match ad_hoc_size {
        Some(raw) => parse_positive(raw, "size").unwrap_or_else(|e| {
            warn!(error = %e, "ignoring ad hoc chunk size");
            DEFAULT_CHUNK_SIZE
        }),
        None => DEFAULT_CHUNK_SIZE,
    };
    let overlap = match ad_hoc_overlap {
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                warn!(overlap = raw, "ignoring ad hoc chunk overlap");
                DEFAULT_CHUNK_OVERLAP
            }
        },
        None => DEFAULT_CHUNK_OVERLAP,
    };

    match ChunkingStrategy::fixed(size, overlap) {
        Ok(strategy) => strategy,
        Err(e) => {
            warn!(size, overlap, error = %e, "ad hoc chunk parameters are inconsistent, using defaults");
            ChunkingStrategy::Fixed {
                size: DEFAULT_CHUNK_SIZE,
                overlap: DEFAULT_CHUNK_OVERLAP,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn collection(
        strategy: Option<ChunkingStrategy>,
        allow_override: bool,
    ) -> Collection {
        Collection {
            id: "kb-main".to_string(),
            repository_id: "repo-1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chunk_strategy: strategy,
            allow_strategy_override: allow_override,
            owner_id: "bob".to_string(),
            allowed_groups: BTreeSet::new(),
            is_private: false,
        }
    }

    fn spec(size: &str, overlap: &str) -> FixedStrategySpec {
        FixedStrategySpec {
            size: size.to_string(),
            overlap: overlap.to_string(),
        }
    }

    #[test]
    fn test_request_override_wins_when_allowed() {
        let coll = collection(
            Some(ChunkingStrategy::Fixed {
                size: 800,
                overlap: 80,
            }),
            true,
        );
        let resolved = resolve_strategy(Some(&spec("400", "40")), None, None, Some(&coll));
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: 400,
                overlap: 40
            }
        );
    }

    #[test]
    fn test_override_ignored_when_collection_forbids_it() {
        let coll = collection(
            Some(ChunkingStrategy::Fixed {
                size: 800,
                overlap: 80,
            }),
            false,
        );
        let resolved = resolve_strategy(Some(&spec("400", "40")), None, None, Some(&coll));
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: 800,
                overlap: 80
            }
        );
    }

    #[test]
    fn test_invalid_override_falls_back_to_collection() {
        let coll = collection(
            Some(ChunkingStrategy::Fixed {
                size: 800,
                overlap: 80,
            }),
            true,
        );
        // Overlap >= size does not parse; the collection strategy applies.
        let resolved = resolve_strategy(Some(&spec("100", "100")), None, None, Some(&coll));
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: 800,
                overlap: 80
            }
        );
    }

    #[test]
    fn test_collection_strategy_beats_defaults() {
        let coll = collection(
            Some(ChunkingStrategy::Fixed {
                size: 600,
                overlap: 60,
            }),
            true,
        );
        let resolved = resolve_strategy(None, Some("123"), Some("45"), Some(&coll));
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: 600,
                overlap: 60
            }
        );
    }

    #[test]
    fn test_builtin_default_when_nothing_configured() {
        let resolved = resolve_strategy(None, None, None, None);
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: DEFAULT_CHUNK_SIZE,
                overlap: DEFAULT_CHUNK_OVERLAP
            }
        );
    }

    #[test]
    fn test_ad_hoc_overrides_apply_to_default() {
        let coll = collection(None, false);
        let resolved = resolve_strategy(None, Some("500"), Some("25"), Some(&coll));
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: 500,
                overlap: 25
            }
        );
    }

    #[test]
    fn test_unparseable_ad_hoc_values_fall_back_field_wise() {
        let resolved = resolve_strategy(None, Some("many"), Some("30"), None);
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: DEFAULT_CHUNK_SIZE,
                overlap: 30
            }
        );
    }

    #[test]
    fn test_inconsistent_ad_hoc_values_use_full_defaults() {
        // size 100 with default overlap 200 would violate overlap < size.
        let resolved = resolve_strategy(None, Some("100"), None, None);
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: DEFAULT_CHUNK_SIZE,
                overlap: DEFAULT_CHUNK_OVERLAP
            }
        );
    }

    #[test]
    fn test_override_without_collection_uses_defaults() {
        let resolved = resolve_strategy(Some(&spec("400", "40")), None, None, None);
        assert_eq!(
            resolved,
            ChunkingStrategy::Fixed {
                size: DEFAULT_CHUNK_SIZE,
                overlap: DEFAULT_CHUNK_OVERLAP
            }
        );
    }
}
