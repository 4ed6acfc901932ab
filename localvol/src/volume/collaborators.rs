//! Services the orchestrator consumes but does not own.

use std::collections::HashMap;

use localvol_shared::errors::LocalvolResult;
use serde::{Deserialize, Serialize};

/// Caller identity attached to every orchestrator operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// An instance as reported by the instance directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: i64,
    pub uuid: String,
    /// Compute host running the instance.
    pub host: String,
    pub running: bool,
}

/// Instance and host lookup.
pub trait InstanceDirectory: Send + Sync {
    /// `None` when no such instance exists.
    fn get_instance(
        &self,
        ctx: &RequestContext,
        instance_id: i64,
    ) -> LocalvolResult<Option<InstanceInfo>>;
}

/// Image record as returned by the image service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub id: String,
    pub name: String,
    /// Reported image size in bytes.
    pub size: u64,
    pub status: String,
    pub is_public: bool,
    pub deleted: bool,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCreateRequest {
    pub name: String,
    pub is_public: bool,
    pub status: String,
    pub properties: HashMap<String, String>,
}

/// Image metadata service.
pub trait ImageService: Send + Sync {
    /// `None` when the image is unknown. Deleted images are still returned.
    fn show(&self, ctx: &RequestContext, image_id: &str) -> LocalvolResult<Option<ImageMeta>>;

    fn create(
        &self,
        ctx: &RequestContext,
        request: ImageCreateRequest,
    ) -> LocalvolResult<ImageMeta>;
}
