//! # Backend Adapters for backplane-mcp
//!
//! **Concrete `Provider` implementations, one per backend kind.**
//!
//! ```toml
//! [dependencies]
//! backplane-mcp-providers = "0.1"
//!
//! # Only the adapters you need
//! backplane-mcp-providers = { version = "0.1", default-features = false, features = ["redis"] }
//! ```
//!
//! - **`relational`**: MySQL via sqlx (feature `mysql`)
//! - **`keyvalue`**: Redis via redis-rs (feature `redis`)
//! - **`messaging`**: Pulsar admin REST via reqwest (feature `pulsar`)
//! - **`guard`**: statement and command filtering driven by the `disable_*` settings

use std::sync::Arc;

use backplane_mcp_protocol::ProviderType;
use backplane_mcp_session::Provider;

pub mod common;
pub mod guard;

#[cfg(feature = "mysql")]
pub mod relational;

#[cfg(feature = "redis")]
pub mod keyvalue;

#[cfg(feature = "pulsar")]
pub mod messaging;

#[cfg(feature = "mysql")]
pub use relational::MySqlProvider;

#[cfg(feature = "redis")]
pub use keyvalue::RedisProvider;

#[cfg(feature = "pulsar")]
pub use messaging::PulsarProvider;

/// The adapter for `provider_type`, if it was compiled in.
pub fn provider_for(provider_type: ProviderType) -> Option<Arc<dyn Provider>> {
    match provider_type {
        #[cfg(feature = "mysql")]
        ProviderType::Mysql => Some(Arc::new(MySqlProvider::new())),
        #[cfg(feature = "redis")]
        ProviderType::Redis => Some(Arc::new(RedisProvider::new())),
        #[cfg(feature = "pulsar")]
        ProviderType::Pulsar => Some(Arc::new(PulsarProvider::new())),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Provider types this build can serve.
pub fn compiled_providers() -> Vec<ProviderType> {
    ProviderType::ALL
        .into_iter()
        .filter(|pt| provider_for(*pt).is_some())
        .collect()
}

/// Adapters for `enabled`, in the order given. Types not compiled in are skipped.
pub fn default_providers(enabled: &[ProviderType]) -> Vec<Arc<dyn Provider>> {
    let mut seen = Vec::new();
    enabled
        .iter()
        .filter(|pt| {
            if seen.contains(*pt) {
                false
            } else {
                seen.push(**pt);
                true
            }
        })
        .filter_map(|pt| {
            let provider = provider_for(*pt);
            if provider.is_none() {
                tracing::warn!("Provider {} is not compiled into this build", pt);
            }
            provider
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(all(feature = "mysql", feature = "redis", feature = "pulsar"))]
    fn test_default_build_serves_everything() {
        assert_eq!(compiled_providers(), ProviderType::ALL.to_vec());
    }

    #[test]
    fn test_default_providers_dedup_and_order() {
        let compiled = compiled_providers();
        let mut requested = compiled.clone();
        requested.reverse();
        requested.extend(compiled.iter().copied());

        let providers = default_providers(&requested);
        let types: Vec<ProviderType> = providers.iter().map(|p| p.provider_type()).collect();
        let mut expected = compiled;
        expected.reverse();
        assert_eq!(types, expected);
    }

    #[test]
    fn test_provider_schemas_share_common_options() {
        for pt in compiled_providers() {
            let provider = provider_for(pt).unwrap();
            let schema = provider.describe_config();
            for option in ["connect_timeout_ms", "request_timeout_ms", "history_limit", "retry_policy"] {
                assert!(schema.contains(option), "{} lacks {}", pt, option);
            }
            assert!(!provider.operations().is_empty());
        }
    }
}
