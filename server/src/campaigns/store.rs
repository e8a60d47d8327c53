//! Tenant-scoped campaign loader
//!
//! Read side used by the analytics paths (ROI requests fetch the campaign
//! here before pulling attribution events). Rows are cached briefly; the
//! CRUD collaborator is expected to call `invalidate` after writes.

use std::sync::Arc;
use std::time::Duration;

use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::types::{AttributionConfig, Campaign};
use crate::core::constants::CAMPAIGN_CACHE_TTL_SECS;
use crate::core::tenant::TenantContext;
use crate::data::cache::{CacheKey, CacheService};
use crate::data::{DataError, ReadReplicaRouter};

pub struct CampaignStore {
    db: Arc<ReadReplicaRouter>,
    cache: Arc<CacheService>,
}

impl CampaignStore {
    pub fn new(db: Arc<ReadReplicaRouter>, cache: Arc<CacheService>) -> Self {
        Self { db, cache }
    }

    /// Fetch one campaign, tenant-scoped
    pub async fn get(
        &self,
        tenant: &TenantContext,
        campaign_id: Uuid,
    ) -> Result<Campaign, DataError> {
        let cache_key = CacheKey::campaign(tenant.tenant_id, campaign_id);
        if let Ok(Some(campaign)) = self.cache.get::<Campaign>(&cache_key).await {
            return Ok(campaign);
        }

        let row = self
            .db
            .fetch_optional(
                sqlx::query(
                    "SELECT campaign_id, tenant_id, podcast_id, sponsor_id, campaign_name,
                            status, start_date, end_date, campaign_value, attribution_method,
                            promo_code, pixel_url, utm_source, utm_medium, utm_campaign,
                            custom_tracking_id, episode_ids, stage, stage_changed_at, notes
                     FROM campaigns
                     WHERE tenant_id = $1 AND campaign_id = $2",
                )
                .bind(tenant.tenant_id)
                .bind(campaign_id),
                None,
            )
            .await?
            .ok_or(DataError::not_found("campaign"))?;

        let campaign = campaign_from_row(&row)?;

        if let Err(e) = self
            .cache
            .set(
                &cache_key,
                &campaign,
                Some(Duration::from_secs(CAMPAIGN_CACHE_TTL_SECS)),
            )
            .await
        {
            tracing::debug!(error = %e, "Failed to cache campaign");
        }

        Ok(campaign)
    }

    /// Drop cached state for one campaign (call after writes)
    pub async fn invalidate(&self, tenant: &TenantContext, campaign_id: Uuid) {
        self.cache
            .invalidate_pattern(&CacheKey::campaign_pattern(tenant.tenant_id, campaign_id))
            .await;
    }
}

/// Map a campaigns row into the domain type
fn campaign_from_row(row: &PgRow) -> Result<Campaign, DataError> {
    let method: String = row.try_get("attribution_method")?;

    let campaign = Campaign {
        campaign_id: row.try_get("campaign_id")?,
        tenant_id: row.try_get("tenant_id")?,
        podcast_id: row.try_get("podcast_id")?,
        sponsor_id: row.try_get("sponsor_id")?,
        name: row.try_get("campaign_name")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        campaign_value: row.try_get("campaign_value")?,
        attribution_config: AttributionConfig {
            method: method.parse()?,
            promo_code: row.try_get("promo_code")?,
            pixel_url: row.try_get("pixel_url")?,
            utm_source: row.try_get("utm_source")?,
            utm_medium: row.try_get("utm_medium")?,
            utm_campaign: row.try_get("utm_campaign")?,
            custom_tracking_id: row.try_get("custom_tracking_id")?,
        },
        episode_ids: row.try_get("episode_ids")?,
        stage: row.try_get("stage")?,
        stage_changed_at: row.try_get("stage_changed_at")?,
        notes: row.try_get("notes")?,
    };

    Ok(campaign)
}

#[cfg(test)]
mod tests {
    // Row mapping is exercised against a live PostgreSQL in integration
    // environments; enum parsing it depends on is covered in types.rs
}
