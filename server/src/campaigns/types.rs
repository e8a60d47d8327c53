//! Campaign row types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::DataError;

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DataError::validation(format!(
                "unknown campaign status: {}",
                other
            ))),
        }
    }
}

/// How listener actions are attributed back to a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    PromoCode,
    Pixel,
    Utm,
    Custom,
    Direct,
}

impl AttributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromoCode => "promo_code",
            Self::Pixel => "pixel",
            Self::Utm => "utm",
            Self::Custom => "custom",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for AttributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionMethod {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promo_code" => Ok(Self::PromoCode),
            "pixel" => Ok(Self::Pixel),
            "utm" => Ok(Self::Utm),
            "custom" => Ok(Self::Custom),
            "direct" => Ok(Self::Direct),
            other => Err(DataError::validation(format!(
                "unknown attribution method: {}",
                other
            ))),
        }
    }
}

/// Attribution configuration attached to a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionConfig {
    pub method: AttributionMethod,
    pub promo_code: Option<String>,
    pub pixel_url: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub custom_tracking_id: Option<String>,
}

impl AttributionConfig {
    pub fn for_method(method: AttributionMethod) -> Self {
        Self {
            method,
            promo_code: None,
            pixel_url: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            custom_tracking_id: None,
        }
    }
}

/// A sponsorship campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: Uuid,
    pub tenant_id: Uuid,
    pub podcast_id: Uuid,
    pub sponsor_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// The cost side of ROI (sponsorship fee)
    pub campaign_value: f64,
    pub attribution_config: AttributionConfig,
    pub episode_ids: Vec<Uuid>,
    pub stage: Option<String>,
    pub stage_changed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl Campaign {
    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<(), DataError> {
        if self.start_date > self.end_date {
            return Err(DataError::validation(format!(
                "campaign {} start_date is after end_date",
                self.campaign_id
            )));
        }
        if self.campaign_value < 0.0 {
            return Err(DataError::validation(format!(
                "campaign {} has a negative value",
                self.campaign_id
            )));
        }
        Ok(())
    }

    /// Campaign duration in whole days
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn campaign(start: DateTime<Utc>, end: DateTime<Utc>, value: f64) -> Campaign {
        Campaign {
            campaign_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            podcast_id: Uuid::new_v4(),
            sponsor_id: Uuid::new_v4(),
            name: "Spring promo".into(),
            status: CampaignStatus::Active,
            start_date: start,
            end_date: end,
            campaign_value: value,
            attribution_config: AttributionConfig::for_method(AttributionMethod::PromoCode),
            episode_ids: vec![],
            stage: None,
            stage_changed_at: None,
            notes: None,
        }
    }

    #[test]
    fn test_validate_rejects_inverted_dates() {
        let start = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert!(campaign(start, end, 100.0).validate().is_err());
        assert!(campaign(end, start, 100.0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_value() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        assert!(campaign(start, end, -1.0).validate().is_err());
    }

    #[test]
    fn test_duration_days() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 11, 0, 0, 0).unwrap();
        assert_eq!(campaign(start, end, 100.0).duration_days(), 10);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Active,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>().unwrap(), status);
        }
        assert!("archived".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_attribution_method_roundtrip() {
        for method in [
            AttributionMethod::PromoCode,
            AttributionMethod::Pixel,
            AttributionMethod::Utm,
            AttributionMethod::Custom,
            AttributionMethod::Direct,
        ] {
            assert_eq!(method.as_str().parse::<AttributionMethod>().unwrap(), method);
        }
    }
}
