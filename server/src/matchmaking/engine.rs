//! Matchmaking engine
//!
//! Scores advertiser/podcast pairs from six weighted signals and persists the
//! result into `matches`, keyed by (tenant, advertiser, podcast). Signals are
//! deterministic heuristics today; a learned scorer can replace any signal
//! without changing callers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::core::tenant::TenantContext;
use crate::data::{DataError, ReadReplicaRouter, TimescaleService};
use crate::telemetry::MetricsCollector;

const WEIGHT_GEO: f64 = 0.15;
const WEIGHT_DEMO: f64 = 0.20;
const WEIGHT_TOPIC: f64 = 0.25;
const WEIGHT_LIFT: f64 = 0.20;
const WEIGHT_INVENTORY: f64 = 0.15;
const WEIGHT_BRAND_SAFETY: f64 = 0.05;

/// The six scoring signals, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSignals {
    pub geo_overlap: f64,
    pub demographic_overlap: f64,
    pub topic_overlap: f64,
    pub historical_lift: f64,
    pub inventory_fit: f64,
    pub brand_safety: f64,
}

/// Scoring result for one advertiser/podcast pair
#[derive(Debug, Clone, Serialize)]
pub struct MatchScore {
    /// Composite score in [0, 100], rounded to two decimals
    pub score: f64,
    pub rationale: String,
    pub signals: MatchSignals,
}

/// Overlap between two catalog attribute sets (Jaccard).
///
/// Either side absent or empty means no data: neutral 0.5.
fn set_overlap(a: Option<&[String]>, b: Option<&[String]>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.5;
    };
    if a.is_empty() || b.is_empty() {
        return 0.5;
    }

    let a: std::collections::HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let b: std::collections::HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

/// Inventory fit from the count of recent episodes with free ad slots
fn inventory_fit_from_count(episode_count: i64) -> f64 {
    if episode_count > 0 {
        (episode_count as f64 / 10.0).min(1.0)
    } else {
        0.2
    }
}

/// Brand safety from the explicit-content ratio; no episodes means no signal
fn brand_safety_from_counts(explicit_count: i64, total_episodes: i64) -> f64 {
    if total_episodes > 0 {
        let ratio = explicit_count as f64 / total_episodes as f64;
        (1.0 - ratio * 0.5).max(0.0)
    } else {
        1.0
    }
}

/// Compose the weighted score and human-readable rationale from the signals
pub fn compose(signals: &MatchSignals) -> MatchScore {
    let mut rationale_parts = Vec::new();
    if signals.geo_overlap > 0.0 {
        rationale_parts.push(format!("Geo overlap: {:.1}%", signals.geo_overlap * 100.0));
    }
    if signals.demographic_overlap > 0.0 {
        rationale_parts.push(format!(
            "Demographic overlap: {:.1}%",
            signals.demographic_overlap * 100.0
        ));
    }
    if signals.topic_overlap > 0.0 {
        rationale_parts.push(format!("Topic overlap: {:.1}%", signals.topic_overlap * 100.0));
    }
    if signals.historical_lift > 0.0 {
        rationale_parts.push(format!(
            "Historical lift: {:.1}%",
            signals.historical_lift * 100.0
        ));
    }
    if signals.inventory_fit > 0.0 {
        rationale_parts.push(format!("Inventory fit: {:.1}%", signals.inventory_fit * 100.0));
    }
    if signals.brand_safety < 1.0 {
        rationale_parts.push(format!("Brand safety: {:.1}%", signals.brand_safety * 100.0));
    }

    let mut weighted = (signals.geo_overlap * WEIGHT_GEO
        + signals.demographic_overlap * WEIGHT_DEMO
        + signals.topic_overlap * WEIGHT_TOPIC
        + signals.historical_lift * WEIGHT_LIFT
        + signals.inventory_fit * WEIGHT_INVENTORY
        + signals.brand_safety * WEIGHT_BRAND_SAFETY)
        * 100.0;

    // Explicit content reduces the whole score, not just its own term
    if signals.brand_safety < 1.0 {
        weighted *= signals.brand_safety;
    }

    let score = (weighted.clamp(0.0, 100.0) * 100.0).round() / 100.0;

    let rationale = if rationale_parts.is_empty() {
        "Insufficient data for scoring".to_string()
    } else {
        rationale_parts.join("; ")
    };

    MatchScore {
        score,
        rationale,
        signals: *signals,
    }
}

/// Matchmaking engine over the catalog and attribution history
pub struct MatchEngine {
    db: Arc<ReadReplicaRouter>,
    timescale: Arc<TimescaleService>,
    metrics: Arc<MetricsCollector>,
}

impl MatchEngine {
    pub fn new(
        db: Arc<ReadReplicaRouter>,
        timescale: Arc<TimescaleService>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            db,
            timescale,
            metrics,
        }
    }

    /// Calculate the match score for one advertiser/podcast pair
    pub async fn score(
        &self,
        tenant: &TenantContext,
        advertiser_id: Uuid,
        podcast_id: Uuid,
    ) -> Result<MatchScore, DataError> {
        let advertiser = self.advertiser_profile(tenant, advertiser_id).await?;
        let podcast = self.podcast_profile(tenant, podcast_id).await?;

        let geo_overlap = set_overlap(
            advertiser.as_ref().and_then(|a| a.geos.as_deref()),
            podcast.as_ref().and_then(|p| p.geos.as_deref()),
        );
        let demographic_overlap = set_overlap(
            advertiser.as_ref().and_then(|a| a.demographics.as_deref()),
            podcast.as_ref().and_then(|p| p.demographics.as_deref()),
        );
        let topic_overlap = set_overlap(
            advertiser.as_ref().and_then(|a| a.categories.as_deref()),
            podcast.as_ref().and_then(|p| p.categories.as_deref()),
        );

        let historical_lift = self
            .historical_lift(tenant, advertiser_id, podcast_id)
            .await?;
        let inventory_fit = self.inventory_fit(tenant, podcast_id).await?;
        let brand_safety = self.brand_safety(tenant, podcast_id).await?;

        let signals = MatchSignals {
            geo_overlap,
            demographic_overlap,
            topic_overlap,
            historical_lift,
            inventory_fit,
            brand_safety,
        };

        Ok(compose(&signals))
    }

    /// Score a pair and upsert the match row; returns the match id
    pub async fn score_and_store(
        &self,
        tenant: &TenantContext,
        advertiser_id: Uuid,
        podcast_id: Uuid,
    ) -> Result<(Uuid, MatchScore), DataError> {
        let score = self.score(tenant, advertiser_id, podcast_id).await?;
        let match_id = self
            .upsert_match(tenant, advertiser_id, podcast_id, &score)
            .await?;

        self.metrics.increment_counter("matches_scored", &[]);

        Ok((match_id, score))
    }

    /// Upsert the match row keyed by (tenant, advertiser, podcast)
    pub async fn upsert_match(
        &self,
        tenant: &TenantContext,
        advertiser_id: Uuid,
        podcast_id: Uuid,
        score: &MatchScore,
    ) -> Result<Uuid, DataError> {
        let signals = serde_json::to_value(score.signals)?;

        let row = self
            .db
            .fetch_one(
                sqlx::query(
                    "INSERT INTO matches (
                         match_id, tenant_id, advertiser_id, podcast_id,
                         score, rationale, signals, created_at, updated_at
                     )
                     VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                     ON CONFLICT (tenant_id, advertiser_id, podcast_id)
                     DO UPDATE SET
                         score = EXCLUDED.score,
                         rationale = EXCLUDED.rationale,
                         signals = EXCLUDED.signals,
                         updated_at = NOW()
                     RETURNING match_id",
                )
                .bind(Uuid::new_v4())
                .bind(tenant.tenant_id)
                .bind(advertiser_id)
                .bind(podcast_id)
                .bind(score.score)
                .bind(&score.rationale)
                .bind(&signals),
                Some(false),
            )
            .await?;

        Ok(row.try_get("match_id")?)
    }

    // =========================================================================
    // Fanout inputs
    // =========================================================================

    /// Podcast ids in a tenant
    pub async fn list_podcast_ids(&self, tenant: &TenantContext) -> Result<Vec<Uuid>, DataError> {
        let rows = self
            .db
            .fetch_many(
                sqlx::query("SELECT DISTINCT podcast_id FROM podcasts WHERE tenant_id = $1")
                    .bind(tenant.tenant_id),
                None,
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get("podcast_id").map_err(Into::into))
            .collect()
    }

    /// Advertisers (campaign sponsors) in a tenant
    pub async fn list_advertiser_ids(
        &self,
        tenant: &TenantContext,
    ) -> Result<Vec<Uuid>, DataError> {
        let rows = self
            .db
            .fetch_many(
                sqlx::query("SELECT DISTINCT sponsor_id FROM campaigns WHERE tenant_id = $1")
                    .bind(tenant.tenant_id),
                None,
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get("sponsor_id").map_err(Into::into))
            .collect()
    }

    /// Every (tenant, advertiser, podcast) pair; optionally scoped to one
    /// tenant. Pairs never cross tenant boundaries.
    pub async fn list_pairs(
        &self,
        tenant: Option<&TenantContext>,
    ) -> Result<Vec<(Uuid, Uuid, Uuid)>, DataError> {
        let rows = self
            .db
            .fetch_many(
                sqlx::query(
                    "SELECT DISTINCT c.tenant_id, c.sponsor_id AS advertiser_id, p.podcast_id
                     FROM campaigns c
                     CROSS JOIN podcasts p
                     WHERE c.tenant_id = p.tenant_id
                       AND ($1::uuid IS NULL OR c.tenant_id = $1)",
                )
                .bind(tenant.map(|t| t.tenant_id)),
                None,
            )
            .await?;

        rows.iter()
            .map(|r| {
                Ok((
                    r.try_get("tenant_id")?,
                    r.try_get("advertiser_id")?,
                    r.try_get("podcast_id")?,
                ))
            })
            .collect()
    }

    // =========================================================================
    // Signals
    // =========================================================================

    async fn advertiser_profile(
        &self,
        tenant: &TenantContext,
        advertiser_id: Uuid,
    ) -> Result<Option<CatalogProfile>, DataError> {
        let row = self
            .db
            .fetch_optional(
                sqlx::query(
                    "SELECT target_geos AS geos, target_demographics AS demographics, categories
                     FROM sponsors
                     WHERE sponsor_id = $1 AND tenant_id = $2",
                )
                .bind(advertiser_id)
                .bind(tenant.tenant_id),
                None,
            )
            .await?;

        Ok(row.map(|r| CatalogProfile {
            geos: r.try_get("geos").unwrap_or(None),
            demographics: r.try_get("demographics").unwrap_or(None),
            categories: r.try_get("categories").unwrap_or(None),
        }))
    }

    async fn podcast_profile(
        &self,
        tenant: &TenantContext,
        podcast_id: Uuid,
    ) -> Result<Option<CatalogProfile>, DataError> {
        let row = self
            .db
            .fetch_optional(
                sqlx::query(
                    "SELECT listener_geos AS geos, listener_demographics AS demographics, categories
                     FROM podcasts
                     WHERE podcast_id = $1 AND tenant_id = $2",
                )
                .bind(podcast_id)
                .bind(tenant.tenant_id),
                None,
            )
            .await?;

        Ok(row.map(|r| CatalogProfile {
            geos: r.try_get("geos").unwrap_or(None),
            demographics: r.try_get("demographics").unwrap_or(None),
            categories: r.try_get("categories").unwrap_or(None),
        }))
    }

    /// Prior completed campaigns for the pair that produced attribution
    /// events lift the score; the quality dimension is a placeholder.
    async fn historical_lift(
        &self,
        tenant: &TenantContext,
        advertiser_id: Uuid,
        podcast_id: Uuid,
    ) -> Result<f64, DataError> {
        let campaign_ids: Vec<Uuid> = {
            let rows = self
                .db
                .fetch_many(
                    sqlx::query(
                        "SELECT campaign_id FROM campaigns
                         WHERE sponsor_id = $1 AND podcast_id = $2 AND tenant_id = $3
                           AND status = 'completed'",
                    )
                    .bind(advertiser_id)
                    .bind(podcast_id)
                    .bind(tenant.tenant_id),
                    None,
                )
                .await?;
            rows.iter()
                .map(|r| r.try_get("campaign_id"))
                .collect::<Result<_, _>>()?
        };

        if campaign_ids.is_empty() {
            return Ok(0.3);
        }

        let event_count: i64 = self
            .timescale
            .router()
            .fetch_scalar(
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM attribution_events
                     WHERE tenant_id = $1 AND campaign_id = ANY($2)",
                )
                .bind(tenant.tenant_id)
                .bind(&campaign_ids),
                None,
            )
            .await?;

        Ok(if event_count > 0 { 0.7 } else { 0.3 })
    }

    /// Recent episodes with free ad slots indicate available inventory
    async fn inventory_fit(
        &self,
        tenant: &TenantContext,
        podcast_id: Uuid,
    ) -> Result<f64, DataError> {
        let episode_count: i64 = self
            .db
            .fetch_scalar(
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM episodes e
                     WHERE e.podcast_id = $1 AND e.tenant_id = $2
                       AND e.publish_date > NOW() - INTERVAL '30 days'
                       AND (e.ad_slots IS NULL OR jsonb_array_length(e.ad_slots) < 3)",
                )
                .bind(podcast_id)
                .bind(tenant.tenant_id),
                None,
            )
            .await?;

        Ok(inventory_fit_from_count(episode_count))
    }

    /// Explicit-content ratio over the podcast's episodes
    async fn brand_safety(
        &self,
        tenant: &TenantContext,
        podcast_id: Uuid,
    ) -> Result<f64, DataError> {
        let row = self
            .db
            .fetch_one(
                sqlx::query(
                    "SELECT COUNT(*) FILTER (WHERE explicit) AS explicit_count,
                            COUNT(*) AS total_episodes
                     FROM episodes
                     WHERE podcast_id = $1 AND tenant_id = $2",
                )
                .bind(podcast_id)
                .bind(tenant.tenant_id),
                None,
            )
            .await?;

        let explicit_count: i64 = row.try_get("explicit_count")?;
        let total_episodes: i64 = row.try_get("total_episodes")?;
        Ok(brand_safety_from_counts(explicit_count, total_episodes))
    }
}

struct CatalogProfile {
    geos: Option<Vec<String>>,
    demographics: Option<Vec<String>>,
    categories: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_overlap_defaults_to_neutral() {
        assert_eq!(set_overlap(None, None), 0.5);
        assert_eq!(set_overlap(Some(&strings(&["us"])), None), 0.5);
        assert_eq!(set_overlap(Some(&[]), Some(&strings(&["us"]))), 0.5);
    }

    #[test]
    fn test_set_overlap_jaccard() {
        let a = strings(&["us", "ca", "uk"]);
        let b = strings(&["us", "de"]);
        // intersection {us}, union {us, ca, uk, de}
        assert!((set_overlap(Some(&a), Some(&b)) - 0.25).abs() < 1e-9);

        let identical = strings(&["tech", "business"]);
        assert_eq!(set_overlap(Some(&identical), Some(&identical)), 1.0);
    }

    #[test]
    fn test_inventory_fit_scaling() {
        assert_eq!(inventory_fit_from_count(0), 0.2);
        assert_eq!(inventory_fit_from_count(5), 0.5);
        assert_eq!(inventory_fit_from_count(10), 1.0);
        assert_eq!(inventory_fit_from_count(25), 1.0);
    }

    #[test]
    fn test_brand_safety_ratio() {
        assert_eq!(brand_safety_from_counts(0, 0), 1.0);
        assert_eq!(brand_safety_from_counts(0, 10), 1.0);
        assert_eq!(brand_safety_from_counts(5, 10), 0.75);
        assert_eq!(brand_safety_from_counts(10, 10), 0.5);
    }

    #[test]
    fn test_compose_with_defaults_scores_44() {
        // No catalog data, no history, no inventory
        let signals = MatchSignals {
            geo_overlap: 0.5,
            demographic_overlap: 0.5,
            topic_overlap: 0.5,
            historical_lift: 0.3,
            inventory_fit: 0.2,
            brand_safety: 1.0,
        };
        let result = compose(&signals);
        assert!((result.score - 44.0).abs() < 1e-9);
        assert!(result.rationale.contains("Geo overlap: 50.0%"));
        assert!(result.rationale.contains("Historical lift: 30.0%"));
        assert!(!result.rationale.contains("Brand safety"));
    }

    #[test]
    fn test_compose_applies_brand_safety_penalty() {
        let clean = MatchSignals {
            geo_overlap: 0.5,
            demographic_overlap: 0.5,
            topic_overlap: 0.5,
            historical_lift: 0.3,
            inventory_fit: 0.2,
            brand_safety: 1.0,
        };
        let explicit = MatchSignals {
            brand_safety: 0.5,
            ..clean
        };

        let clean_score = compose(&clean).score;
        let explicit_score = compose(&explicit).score;
        assert!(explicit_score < clean_score);

        // Weighted sum drops by the brand-safety term and is then multiplied
        let weighted: f64 = (0.5 * 0.15 + 0.5 * 0.20 + 0.5 * 0.25 + 0.3 * 0.20 + 0.2 * 0.15
            + 0.5 * 0.05)
            * 100.0
            * 0.5;
        assert!((explicit_score - (weighted * 100.0).round() / 100.0).abs() < 1e-9);
        assert!(compose(&explicit).rationale.contains("Brand safety: 50.0%"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let signals = MatchSignals {
            geo_overlap: 0.42,
            demographic_overlap: 0.77,
            topic_overlap: 0.12,
            historical_lift: 0.7,
            inventory_fit: 0.9,
            brand_safety: 0.95,
        };
        let first = compose(&signals);
        let second = compose(&signals);
        assert_eq!(first.score, second.score);
        assert_eq!(first.rationale, second.rationale);
    }

    #[test]
    fn test_compose_rationale_fallback_when_all_zero() {
        let signals = MatchSignals {
            geo_overlap: 0.0,
            demographic_overlap: 0.0,
            topic_overlap: 0.0,
            historical_lift: 0.0,
            inventory_fit: 0.0,
            brand_safety: 1.0,
        };
        let result = compose(&signals);
        assert_eq!(result.rationale, "Insufficient data for scoring");
        // Only the brand-safety weight contributes
        assert!((result.score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_compose_clamps_to_bounds() {
        let maxed = MatchSignals {
            geo_overlap: 1.0,
            demographic_overlap: 1.0,
            topic_overlap: 1.0,
            historical_lift: 1.0,
            inventory_fit: 1.0,
            brand_safety: 1.0,
        };
        assert_eq!(compose(&maxed).score, 100.0);
    }
}
