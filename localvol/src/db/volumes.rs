//! Volume persistence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use localvol_shared::errors::{LocalvolError, LocalvolResult};

use super::{Database, db_err};
use crate::util::size::whole_gigabytes;
use crate::volume::types::{
    AttachStatus, NewVolume, Volume, VolumeId, VolumeStatus, VolumeTimestamps,
};

const VOLUME_COLUMNS: &str = "id, created_at, updated_at, deleted_at, deleted, user_id, \
     project_id, host, instance_id, device, size, status, attach_status, snapshot_id, \
     volume_type_id, display_description, metadata, attach_time, scheduled_at, launched_at, \
     terminated_at";

/// Live consumption of one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectUsage {
    pub volumes: u64,
    /// Sum of whole gigabytes over all live volumes.
    pub gigabytes: u64,
}

/// Column values as stored, before conversion into a [`Volume`].
struct VolumeRow {
    id: i64,
    created_at: Option<String>,
    updated_at: Option<String>,
    deleted_at: Option<String>,
    deleted: bool,
    user_id: String,
    project_id: String,
    host: String,
    instance_id: i64,
    device: String,
    size: i64,
    status: String,
    attach_status: String,
    snapshot_id: Option<String>,
    volume_type_id: Option<String>,
    display_description: Option<String>,
    metadata: String,
    attach_time: Option<String>,
    scheduled_at: Option<String>,
    launched_at: Option<String>,
    terminated_at: Option<String>,
}

impl VolumeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            deleted_at: row.get(3)?,
            deleted: row.get(4)?,
            user_id: row.get(5)?,
            project_id: row.get(6)?,
            host: row.get(7)?,
            instance_id: row.get(8)?,
            device: row.get(9)?,
            size: row.get(10)?,
            status: row.get(11)?,
            attach_status: row.get(12)?,
            snapshot_id: row.get(13)?,
            volume_type_id: row.get(14)?,
            display_description: row.get(15)?,
            metadata: row.get(16)?,
            attach_time: row.get(17)?,
            scheduled_at: row.get(18)?,
            launched_at: row.get(19)?,
            terminated_at: row.get(20)?,
        })
    }

    fn into_volume(self) -> LocalvolResult<Volume> {
        let metadata: HashMap<String, String> = serde_json::from_str(&self.metadata)
            .map_err(|e| LocalvolError::Database(format!("volume {} metadata: {}", self.id, e)))?;
        let size = u64::try_from(self.size)
            .map_err(|_| LocalvolError::Database(format!("volume {} has negative size", self.id)))?;

        Ok(Volume {
            id: self.id,
            user_id: self.user_id,
            project_id: self.project_id,
            host: self.host,
            instance_id: self.instance_id,
            device: self.device,
            size,
            status: self.status.parse()?,
            attach_status: self.attach_status.parse()?,
            snapshot_id: self.snapshot_id,
            volume_type_id: self.volume_type_id,
            display_description: self.display_description,
            metadata,
            deleted: self.deleted,
            timestamps: VolumeTimestamps {
                created_at: parse_time(self.created_at)?,
                updated_at: parse_time(self.updated_at)?,
                deleted_at: parse_time(self.deleted_at)?,
                attach_time: parse_time(self.attach_time)?,
                scheduled_at: parse_time(self.scheduled_at)?,
                launched_at: parse_time(self.launched_at)?,
                terminated_at: parse_time(self.terminated_at)?,
            },
        })
    }
}

fn parse_time(value: Option<String>) -> LocalvolResult<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| LocalvolError::Database(format!("bad timestamp {}: {}", s, e)))
        })
        .transpose()
}

fn format_time(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn size_to_sql(size: u64) -> LocalvolResult<i64> {
    i64::try_from(size).map_err(|_| {
        LocalvolError::InvalidParameter(format!("size {} exceeds storable range", size))
    })
}

/// Store for volume records.
///
/// Deleted rows are kept for audit and hidden from every read.
#[derive(Clone)]
pub struct VolumeStore {
    db: Database,
}

impl VolumeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new volume in `creating`/`detached`, stamping scheduled-at.
    pub fn create(&self, new: &NewVolume) -> LocalvolResult<Volume> {
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&new.metadata)
            .map_err(|e| LocalvolError::Internal(format!("serialize metadata: {}", e)))?;
        let size = size_to_sql(new.size)?;

        let id = {
            let conn = self.db.conn();
            db_err!(conn.execute(
                "INSERT INTO local_volumes (created_at, updated_at, user_id, project_id, host, \
                 instance_id, device, size, status, attach_status, snapshot_id, volume_type_id, \
                 display_description, metadata, scheduled_at) \
                 VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?1)",
                params![
                    now,
                    new.user_id,
                    new.project_id,
                    new.host,
                    new.instance_id,
                    new.device,
                    size,
                    VolumeStatus::Creating.as_str(),
                    AttachStatus::Detached.as_str(),
                    new.snapshot_id,
                    new.volume_type_id,
                    new.display_description,
                    metadata,
                ],
            ))?;
            conn.last_insert_rowid()
        };

        tracing::debug!(volume_id = id, project_id = %new.project_id, "Inserted volume record");
        self.get(id)?
            .ok_or_else(|| LocalvolError::Database(format!("volume {} vanished after insert", id)))
    }

    /// Live volume by id.
    pub fn get(&self, id: VolumeId) -> LocalvolResult<Option<Volume>> {
        let row = {
            let conn = self.db.conn();
            db_err!(
                conn.query_row(
                    &format!(
                        "SELECT {} FROM local_volumes WHERE id = ?1 AND deleted = 0",
                        VOLUME_COLUMNS
                    ),
                    params![id],
                    VolumeRow::from_row,
                )
                .optional()
            )?
        };
        row.map(VolumeRow::into_volume).transpose()
    }

    /// All live volumes, newest first.
    pub fn list_all(&self) -> LocalvolResult<Vec<Volume>> {
        self.query_many(
            &format!(
                "SELECT {} FROM local_volumes WHERE deleted = 0 ORDER BY id DESC",
                VOLUME_COLUMNS
            ),
            None,
        )
    }

    /// Live volumes of `project_id`, newest first.
    pub fn list_by_project(&self, project_id: &str) -> LocalvolResult<Vec<Volume>> {
        self.query_many(
            &format!(
                "SELECT {} FROM local_volumes WHERE deleted = 0 AND project_id = ?1 \
                 ORDER BY id DESC",
                VOLUME_COLUMNS
            ),
            Some(project_id),
        )
    }

    fn query_many(&self, sql: &str, project_id: Option<&str>) -> LocalvolResult<Vec<Volume>> {
        let rows = {
            let conn = self.db.conn();
            let mut stmt = db_err!(conn.prepare(sql))?;
            let mapped = match project_id {
                Some(project) => db_err!(stmt.query_map(params![project], VolumeRow::from_row))?
                    .collect::<Result<Vec<_>, _>>(),
                None => db_err!(stmt.query_map([], VolumeRow::from_row))?
                    .collect::<Result<Vec<_>, _>>(),
            };
            db_err!(mapped)?
        };
        rows.into_iter().map(VolumeRow::into_volume).collect()
    }

    fn update_live(
        &self,
        id: VolumeId,
        assignments: &str,
        value: &dyn rusqlite::ToSql,
    ) -> LocalvolResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = db_err!(self.db.conn().execute(
            &format!(
                "UPDATE local_volumes SET {}, updated_at = ?2 WHERE id = ?3 AND deleted = 0",
                assignments
            ),
            params![value, now, id],
        ))?;
        if changed == 0 {
            return Err(LocalvolError::NotFound(format!("volume {}", id)));
        }
        Ok(())
    }

    pub fn update_status(&self, id: VolumeId, status: VolumeStatus) -> LocalvolResult<()> {
        self.update_live(id, "status = ?1", &status.as_str())
    }

    pub fn update_size(&self, id: VolumeId, size: u64) -> LocalvolResult<()> {
        self.update_live(id, "size = ?1", &size_to_sql(size)?)
    }

    /// Move to `deleting` and stamp terminated-at.
    pub fn mark_deleting(&self, id: VolumeId) -> LocalvolResult<()> {
        self.update_live(
            id,
            "status = ?1, terminated_at = ?2",
            &VolumeStatus::Deleting.as_str(),
        )
    }

    /// Move to `deleted` and hide the record.
    pub fn mark_deleted(&self, id: VolumeId) -> LocalvolResult<()> {
        self.update_live(
            id,
            "status = ?1, deleted = 1, deleted_at = ?2",
            &VolumeStatus::Deleted.as_str(),
        )
    }

    /// Set the lifecycle timestamps present in `stamps`. Unset ones are kept.
    pub fn update_timestamps(
        &self,
        id: VolumeId,
        stamps: &VolumeTimestamps,
    ) -> LocalvolResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = db_err!(self.db.conn().execute(
            "UPDATE local_volumes SET \
             attach_time = COALESCE(?1, attach_time), \
             scheduled_at = COALESCE(?2, scheduled_at), \
             launched_at = COALESCE(?3, launched_at), \
             terminated_at = COALESCE(?4, terminated_at), \
             updated_at = ?5 \
             WHERE id = ?6 AND deleted = 0",
            params![
                format_time(stamps.attach_time),
                format_time(stamps.scheduled_at),
                format_time(stamps.launched_at),
                format_time(stamps.terminated_at),
                now,
                id,
            ],
        ))?;
        if changed == 0 {
            return Err(LocalvolError::NotFound(format!("volume {}", id)));
        }
        Ok(())
    }

    pub fn usage_for_project(&self, project_id: &str) -> LocalvolResult<ProjectUsage> {
        let sizes: Vec<i64> = {
            let conn = self.db.conn();
            let mut stmt = db_err!(conn.prepare(
                "SELECT size FROM local_volumes WHERE deleted = 0 AND project_id = ?1"
            ))?;
            let rows = db_err!(stmt.query_map(params![project_id], |row| row.get(0)))?;
            db_err!(rows.collect::<Result<Vec<_>, _>>())?
        };

        Ok(ProjectUsage {
            volumes: sizes.len() as u64,
            gigabytes: sizes
                .into_iter()
                .map(|s| whole_gigabytes(u64::try_from(s).unwrap_or(0)))
                .sum(),
        })
    }
}
