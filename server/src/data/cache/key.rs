//! Type-safe cache key builder with versioning

use uuid::Uuid;

use crate::core::constants::CACHE_KEY_VERSION;

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g. "v1:") so a schema change can
/// invalidate every cached value at once.
pub struct CacheKey;

impl CacheKey {
    /// Cache key for a campaign row
    pub fn campaign(tenant_id: Uuid, campaign_id: Uuid) -> String {
        format!("{}:campaign:{}:{}", CACHE_KEY_VERSION, tenant_id, campaign_id)
    }

    /// Pattern matching every cached entry for one campaign
    pub fn campaign_pattern(tenant_id: Uuid, campaign_id: Uuid) -> String {
        format!("{}:campaign:{}:{}*", CACHE_KEY_VERSION, tenant_id, campaign_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_versioned() {
        let t = Uuid::nil();
        assert!(CacheKey::campaign(t, t).starts_with("v1:campaign:"));
    }

    #[test]
    fn test_campaign_pattern_covers_key() {
        let t = Uuid::nil();
        let key = CacheKey::campaign(t, t);
        let pattern = CacheKey::campaign_pattern(t, t);
        assert!(key.starts_with(pattern.trim_end_matches('*')));
    }
}
