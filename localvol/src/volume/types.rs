//! Volume records and their lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use localvol_shared::errors::LocalvolError;
use serde::{Deserialize, Serialize};

pub type VolumeId = i64;

/// Lifecycle status of a volume.
///
/// ```text
/// creating → available ⇄ in_use
///    │           │          │
///    └──→ error ←┴──────────┘
///           │
/// (any) → deleting → deleted
///           │
///           └──→ error_deleting → deleting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    ErrorDeleting,
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Creating => "creating",
            VolumeStatus::Available => "available",
            VolumeStatus::InUse => "in_use",
            VolumeStatus::Deleting => "deleting",
            VolumeStatus::Deleted => "deleted",
            VolumeStatus::Error => "error",
            VolumeStatus::ErrorDeleting => "error_deleting",
        }
    }

    /// No further transition leaves this status except a deletion request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VolumeStatus::Deleted | VolumeStatus::Error)
    }

    pub fn can_transition_to(&self, target: VolumeStatus) -> bool {
        use VolumeStatus::*;

        if target == Deleting {
            return *self != Deleted;
        }

        matches!(
            (self, target),
            (Creating, Available)
                | (Creating, Error)
                | (Available, InUse)
                | (Available, Error)
                | (InUse, Available)
                | (InUse, Error)
                | (Deleting, Deleted)
                | (Deleting, ErrorDeleting)
        )
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeStatus {
    type Err = LocalvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(VolumeStatus::Creating),
            "available" => Ok(VolumeStatus::Available),
            "in_use" => Ok(VolumeStatus::InUse),
            "deleting" => Ok(VolumeStatus::Deleting),
            "deleted" => Ok(VolumeStatus::Deleted),
            "error" => Ok(VolumeStatus::Error),
            "error_deleting" => Ok(VolumeStatus::ErrorDeleting),
            other => Err(LocalvolError::Internal(format!(
                "unknown volume status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachStatus {
    Attached,
    Detached,
}

impl AttachStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachStatus::Attached => "attached",
            AttachStatus::Detached => "detached",
        }
    }
}

impl FromStr for AttachStatus {
    type Err = LocalvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attached" => Ok(AttachStatus::Attached),
            "detached" => Ok(AttachStatus::Detached),
            other => Err(LocalvolError::Internal(format!(
                "unknown attach status: {}",
                other
            ))),
        }
    }
}

/// Lifecycle timestamps. Unset ones have not happened yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTimestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub attach_time: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub launched_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
}

/// A persisted local volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub user_id: String,
    pub project_id: String,
    pub host: String,
    pub instance_id: i64,
    pub device: String,
    pub size: u64,
    pub status: VolumeStatus,
    pub attach_status: AttachStatus,
    pub snapshot_id: Option<String>,
    pub volume_type_id: Option<String>,
    pub display_description: Option<String>,
    pub metadata: HashMap<String, String>,
    pub deleted: bool,
    pub timestamps: VolumeTimestamps,
}

impl Volume {
    pub fn name(&self) -> String {
        volume_name(self.id)
    }
}

/// `local-volume-<id as 8 hex digits>`.
pub fn volume_name(id: VolumeId) -> String {
    format!("local-volume-{:08x}", id)
}

/// Fields of a volume about to be persisted. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewVolume {
    pub user_id: String,
    pub project_id: String,
    pub host: String,
    pub instance_id: i64,
    pub device: String,
    pub size: u64,
    pub snapshot_id: Option<String>,
    pub volume_type_id: Option<String>,
    pub display_description: Option<String>,
    pub metadata: HashMap<String, String>,
}
