use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::error::{ChannelError, ChannelResult};
use super::models::{ChannelMetadata, ChannelStatus};

const CHANNEL_SCHEMA: &str = include_str!("../../../sql/channels.sql");

/// Authoritative record of channel lifecycle. The core keeps no cache in
/// front of it; every provisioning pass reads through.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn find_by_content_id(&self, content_id: &str) -> ChannelResult<Option<ChannelMetadata>>;

    /// Full-record replace keyed by content id, durable before returning.
    async fn upsert(&self, record: &ChannelMetadata) -> ChannelResult<()>;

    /// Failed records, oldest provisioning attempt first, so repeated
    /// sweeps cannot starve newer failures.
    async fn list_failed(&self, limit: usize) -> ChannelResult<Vec<ChannelMetadata>>;
}

#[derive(Debug, Clone)]
pub struct SqliteMetadataStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteMetadataStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteMetadataStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> ChannelResult<SqliteMetadataStore> {
        let path = self.path.ok_or(ChannelError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteMetadataStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteMetadataStore {
    pub fn builder() -> SqliteMetadataStoreBuilder {
        SqliteMetadataStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> ChannelResult<Self> {
        SqliteMetadataStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> ChannelResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            ChannelError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| ChannelError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> ChannelResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CHANNEL_SCHEMA)?;
        Ok(())
    }

    pub fn fetch_by_content_id(&self, content_id: &str) -> ChannelResult<Option<ChannelMetadata>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM channels WHERE content_id = ?1")?;
        let record = stmt
            .query_row([content_id], |row| ChannelMetadata::from_row(row))
            .optional()?;
        Ok(record)
    }

    pub fn upsert_record(&self, record: &ChannelMetadata) -> ChannelResult<()> {
        if !record.ready_consistent() {
            return Err(ChannelError::InconsistentRecord {
                content_id: record.content_id.clone(),
                reason: "ready record with pending channel or origin".to_string(),
            });
        }
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO channels (
                content_id, channel_id, classification, manifest_path, playback_url,
                origin_endpoint, cache_key, checksum, status, retries, source_asset_uri,
                tenant_id, duration_seconds, ingest_region, drm_key_id, drm_license_server,
                availability_starts_at, availability_ends_at, geo_allow, geo_deny,
                last_provisioned_at
            ) VALUES (
                :content_id, :channel_id, :classification, :manifest_path, :playback_url,
                :origin_endpoint, :cache_key, :checksum, :status, :retries, :source_asset_uri,
                :tenant_id, :duration_seconds, :ingest_region, :drm_key_id, :drm_license_server,
                :availability_starts_at, :availability_ends_at, :geo_allow, :geo_deny,
                :last_provisioned_at
            )
            ON CONFLICT(content_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                classification = excluded.classification,
                manifest_path = excluded.manifest_path,
                playback_url = excluded.playback_url,
                origin_endpoint = excluded.origin_endpoint,
                cache_key = excluded.cache_key,
                checksum = excluded.checksum,
                status = excluded.status,
                retries = MAX(excluded.retries, channels.retries),
                source_asset_uri = excluded.source_asset_uri,
                tenant_id = excluded.tenant_id,
                duration_seconds = excluded.duration_seconds,
                ingest_region = excluded.ingest_region,
                drm_key_id = excluded.drm_key_id,
                drm_license_server = excluded.drm_license_server,
                availability_starts_at = excluded.availability_starts_at,
                availability_ends_at = excluded.availability_ends_at,
                geo_allow = excluded.geo_allow,
                geo_deny = excluded.geo_deny,
                last_provisioned_at = excluded.last_provisioned_at",
            params![
                &record.content_id,
                record.channel_id.as_str(),
                record.classification.as_str(),
                &record.manifest_path,
                &record.playback_url,
                record.origin_endpoint.as_str(),
                &record.cache_key,
                &record.checksum,
                record.status.as_str(),
                record.retries,
                &record.source_asset_uri,
                &record.tenant_id,
                record.duration_seconds,
                &record.ingest_region,
                record.drm.as_ref().map(|drm| drm.key_id.clone()),
                record.drm.as_ref().map(|drm| drm.license_server.clone()),
                record
                    .availability_window
                    .as_ref()
                    .map(|window| window.starts_at.naive_utc()),
                record
                    .availability_window
                    .as_ref()
                    .map(|window| window.ends_at.naive_utc()),
                ChannelMetadata::serialize_region_list(
                    record
                        .geo_restrictions
                        .as_ref()
                        .and_then(|geo| geo.allow.as_ref())
                ),
                ChannelMetadata::serialize_region_list(
                    record
                        .geo_restrictions
                        .as_ref()
                        .and_then(|geo| geo.deny.as_ref())
                ),
                record.last_provisioned_at.naive_utc(),
            ],
        )?;
        Ok(())
    }

    pub fn fetch_failed(&self, limit: usize) -> ChannelResult<Vec<ChannelMetadata>> {
        self.fetch_by_status(Some(ChannelStatus::Failed), limit)
    }

    pub fn fetch_by_status(
        &self,
        status: Option<ChannelStatus>,
        limit: usize,
    ) -> ChannelResult<Vec<ChannelMetadata>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM channels
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY last_provisioned_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                (status.as_ref().map(ChannelStatus::as_str), limit as i64),
                |row| ChannelMetadata::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Admin-only: the provisioning core never deletes records.
    pub fn delete(&self, content_id: &str) -> ChannelResult<()> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM channels WHERE content_id = ?1", [content_id])?;
        if affected == 0 {
            return Err(ChannelError::NotFound {
                content_id: content_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn update_status(&self, content_id: &str, status: ChannelStatus) -> ChannelResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE channels
             SET status = ?2, last_provisioned_at = CURRENT_TIMESTAMP
             WHERE content_id = ?1",
            params![content_id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(ChannelError::NotFound {
                content_id: content_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn count_by_status(&self) -> ChannelResult<HashMap<String, usize>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM channels GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count as usize);
        }
        Ok(map)
    }
}

#[async_trait]
impl MetadataRepository for SqliteMetadataStore {
    async fn find_by_content_id(&self, content_id: &str) -> ChannelResult<Option<ChannelMetadata>> {
        self.fetch_by_content_id(content_id)
    }

    async fn upsert(&self, record: &ChannelMetadata) -> ChannelResult<()> {
        self.upsert_record(record)
    }

    async fn list_failed(&self, limit: usize) -> ChannelResult<Vec<ChannelMetadata>> {
        self.fetch_failed(limit)
    }
}
