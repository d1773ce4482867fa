use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::error::PresetError;

/// File name of the top-level playlist every channel publishes.
pub const MASTER_MANIFEST_NAME: &str = "master.m3u8";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Provisioning,
    Ready,
    Failed,
    Retired,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Provisioning => "provisioning",
            ChannelStatus::Ready => "ready",
            ChannelStatus::Failed => "failed",
            ChannelStatus::Retired => "retired",
        }
    }

    /// Retired records are never re-driven; every other status can still
    /// move on a new event or a reconciliation sweep.
    pub fn terminal(&self) -> bool {
        matches!(self, ChannelStatus::Retired)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(ChannelStatus::Provisioning),
            "ready" => Ok(ChannelStatus::Ready),
            "failed" => Ok(ChannelStatus::Failed),
            "retired" => Ok(ChannelStatus::Retired),
            other => Err(format!("unknown channel status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Reel,
    Series,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Reel => "reel",
            Classification::Series => "series",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reel" => Ok(Classification::Reel),
            "series" => Ok(Classification::Series),
            other => Err(format!("unknown classification: {other}")),
        }
    }
}

/// Engine-assigned identifier slot. `Pending` is persisted as the literal
/// string `"pending"` until the engine hands the value back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Assignment {
    Pending,
    Assigned(String),
}

impl Assignment {
    pub const SENTINEL: &'static str = "pending";

    pub fn as_str(&self) -> &str {
        match self {
            Assignment::Pending => Self::SENTINEL,
            Assignment::Assigned(value) => value.as_str(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Assignment::Assigned(_))
    }
}

impl From<String> for Assignment {
    fn from(value: String) -> Self {
        if value == Assignment::SENTINEL {
            Assignment::Pending
        } else {
            Assignment::Assigned(value)
        }
    }
}

impl From<Assignment> for String {
    fn from(value: Assignment) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DrmKeys {
    pub key_id: String,
    pub license_server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoRestrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

/// One rung of an adaptive bitrate ladder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AbrVariant {
    pub name: String,
    pub resolution: String,
    pub bitrate_kbps: u32,
}

/// Parses the compact `name|WxH|kbps (',' ...)` preset form. Entries that
/// are empty after trimming are skipped, so an empty string is a valid
/// empty ladder.
pub fn parse_abr_preset(raw: &str) -> Result<Vec<AbrVariant>, PresetError> {
    let mut ladder = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = entry.split('|').map(str::trim).collect();
        if tokens.len() != 3 {
            return Err(PresetError::Shape {
                entry: entry.to_string(),
            });
        }
        if tokens.iter().any(|token| token.is_empty()) {
            return Err(PresetError::EmptyToken {
                entry: entry.to_string(),
            });
        }
        let bitrate_kbps = tokens[2].parse::<u32>().map_err(|source| PresetError::Bitrate {
            entry: entry.to_string(),
            source,
        })?;
        ladder.push(AbrVariant {
            name: tokens[0].to_string(),
            resolution: tokens[1].to_string(),
            bitrate_kbps,
        });
    }
    Ok(ladder)
}

/// CDN cache key: lowercase hex SHA-1 of `contentId:checksum`. A checksum
/// change yields a new key; the old one is never rewritten.
pub fn cache_key_for(content_id: &str, checksum: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content_id.as_bytes());
    hasher.update(b":");
    hasher.update(checksum.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn manifest_path_for(content_id: &str) -> String {
    format!("manifests/{content_id}/{MASTER_MANIFEST_NAME}")
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProvisioningRequest {
    pub content_id: String,
    pub classification: Classification,
    pub source_uri: String,
    pub ingest_pool: String,
    pub egress_pool: String,
    pub abr_ladder: Vec<AbrVariant>,
    pub output_bucket: String,
    pub manifest_path: String,
    pub cache_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drm: Option<DrmKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_window: Option<AvailabilityWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_restrictions: Option<GeoRestrictions>,
    /// Opaque annotations forwarded verbatim to the engine.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProvisioningResult {
    pub channel_id: String,
    #[serde(default)]
    pub manifest_path: Option<String>,
    pub origin_endpoint: String,
    #[serde(default)]
    pub playback_base_url: Option<String>,
    #[serde(default)]
    pub profile_hash: Option<String>,
}

/// Durable lifecycle record for one piece of content, keyed by content id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMetadata {
    pub content_id: String,
    pub channel_id: Assignment,
    pub classification: Classification,
    pub manifest_path: String,
    pub playback_url: String,
    pub origin_endpoint: Assignment,
    pub cache_key: String,
    pub checksum: String,
    pub status: ChannelStatus,
    pub retries: i64,
    pub source_asset_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drm: Option<DrmKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_window: Option<AvailabilityWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_restrictions: Option<GeoRestrictions>,
    pub last_provisioned_at: DateTime<Utc>,
}

impl ChannelMetadata {
    /// A ready record must carry engine-assigned identifiers; everything
    /// else may still hold the pending sentinel.
    pub fn ready_consistent(&self) -> bool {
        self.status != ChannelStatus::Ready
            || (self.channel_id.is_assigned() && self.origin_endpoint.is_assigned())
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_provisioned_at: NaiveDateTime = row.get("last_provisioned_at")?;
        let starts_at: Option<NaiveDateTime> = row.get("availability_starts_at")?;
        let ends_at: Option<NaiveDateTime> = row.get("availability_ends_at")?;
        let drm_key_id: Option<String> = row.get("drm_key_id")?;
        let drm_license_server: Option<String> = row.get("drm_license_server")?;
        let geo_allow: Option<String> = row.get("geo_allow")?;
        let geo_deny: Option<String> = row.get("geo_deny")?;

        let drm = match (drm_key_id, drm_license_server) {
            (Some(key_id), Some(license_server)) => Some(DrmKeys {
                key_id,
                license_server,
            }),
            _ => None,
        };
        let availability_window = match (starts_at, ends_at) {
            (Some(start), Some(end)) => Some(AvailabilityWindow {
                starts_at: Utc.from_utc_datetime(&start),
                ends_at: Utc.from_utc_datetime(&end),
            }),
            _ => None,
        };
        let geo_restrictions = if geo_allow.is_some() || geo_deny.is_some() {
            Some(GeoRestrictions {
                allow: geo_allow.as_deref().map(split_region_list),
                deny: geo_deny.as_deref().map(split_region_list),
            })
        } else {
            None
        };

        Ok(Self {
            content_id: row.get("content_id")?,
            channel_id: Assignment::from(row.get::<_, String>("channel_id")?),
            classification: row
                .get::<_, String>("classification")?
                .parse()
                .unwrap_or(Classification::Reel),
            manifest_path: row.get("manifest_path")?,
            playback_url: row.get("playback_url")?,
            origin_endpoint: Assignment::from(row.get::<_, String>("origin_endpoint")?),
            cache_key: row.get("cache_key")?,
            checksum: row.get("checksum")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(ChannelStatus::Provisioning),
            retries: row.get::<_, Option<i64>>("retries")?.unwrap_or(0),
            source_asset_uri: row.get("source_asset_uri")?,
            tenant_id: row.get("tenant_id")?,
            duration_seconds: row.get("duration_seconds")?,
            ingest_region: row.get("ingest_region")?,
            drm,
            availability_window,
            geo_restrictions,
            last_provisioned_at: Utc.from_utc_datetime(&last_provisioned_at),
        })
    }

    pub fn serialize_region_list(regions: Option<&Vec<String>>) -> Option<String> {
        regions.and_then(|list| {
            if list.is_empty() {
                None
            } else {
                Some(list.join(","))
            }
        })
    }
}

fn split_region_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|item| !item.trim().is_empty())
        .map(|item| item.trim().to_string())
        .collect()
}
