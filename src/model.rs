use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Product line a ticket belongs to, derived from the Zendesk brand id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Brand {
    OmniOne,
    OmniArena,
    Unknown,
}

impl Brand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::OmniOne => "omni_one",
            Brand::OmniArena => "omni_arena",
            Brand::Unknown => "unknown",
        }
    }

    pub fn parse_brand(s: &str) -> Option<Brand> {
        match s {
            "omni_one" => Some(Brand::OmniOne),
            "omni_arena" => Some(Brand::OmniArena),
            "unknown" => Some(Brand::Unknown),
            _ => None,
        }
    }
}

/// Brand selector accepted by the sync entrypoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum BrandFilter {
    All,
    OmniOne,
    OmniArena,
}

impl BrandFilter {
    pub fn matches(&self, brand: Brand) -> bool {
        match self {
            BrandFilter::All => true,
            BrandFilter::OmniOne => brand == Brand::OmniOne,
            BrandFilter::OmniArena => brand == Brand::OmniArena,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrandFilter::All => "all",
            BrandFilter::OmniOne => "omni_one",
            BrandFilter::OmniArena => "omni_arena",
        }
    }
}

/// Terminal and in-flight states of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse_status(s: &str) -> Option<SyncStatus> {
        match s {
            "running" => Some(SyncStatus::Running),
            "success" => Some(SyncStatus::Success),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// How the ticket set of a digest was chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DigestSource {
    Selection,
    Filters,
}

impl DigestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestSource::Selection => "selection",
            DigestSource::Filters => "filters",
        }
    }
}

/// Filter snapshot used when a digest is built from a query rather than an
/// explicit id list. Serialized verbatim into the digest row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DigestFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brand_round_trip() {
        for brand in [Brand::OmniOne, Brand::OmniArena, Brand::Unknown] {
            assert_eq!(Brand::parse_brand(brand.as_str()), Some(brand));
        }
        assert_eq!(Brand::parse_brand("omni_two"), None);
    }

    #[test]
    fn brand_filter_matching() {
        assert!(BrandFilter::All.matches(Brand::Unknown));
        assert!(BrandFilter::OmniArena.matches(Brand::OmniArena));
        assert!(!BrandFilter::OmniOne.matches(Brand::OmniArena));
    }

    #[test]
    fn digest_filters_omit_unset_fields() {
        let filters = DigestFilters {
            brand: Some("omni_one".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&filters).unwrap();
        assert_eq!(value, serde_json::json!({ "brand": "omni_one" }));
    }
}
