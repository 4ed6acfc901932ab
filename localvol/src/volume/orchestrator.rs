//! Control-plane entry point for local volumes.
//!
//! Every mutating operation follows the same order: validate, check quota,
//! write local state, then cast to the host owning the instance. Casts are
//! fire-and-forget. The host reports completion back through
//! [`VolumeOrchestrator::apply_status`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use localvol_shared::errors::{LocalvolError, LocalvolResult};
use localvol_shared::messages::ComputeMessage;
use regex::Regex;

use super::collaborators::{
    ImageCreateRequest, ImageMeta, ImageService, InstanceDirectory, InstanceInfo, RequestContext,
};
use super::dispatch::{CastTransport, ComputeDispatcher};
use super::quota::{QuotaGuard, QuotaService};
use super::types::{NewVolume, Volume, VolumeId, VolumeStatus, VolumeTimestamps};
use crate::db::VolumeStore;
use crate::disk::ImageBackend;
use crate::util::parse_size;

static DEVICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/dev/[a-z]d[a-z]+$").expect("device regex is valid"));

/// Reject device paths other than `/dev/<x>d<letters>`.
pub fn validate_device(device: &str) -> LocalvolResult<()> {
    if !DEVICE_PATTERN.is_match(device) {
        return Err(LocalvolError::InvalidParameter(format!(
            "invalid device specified: {}",
            device
        )));
    }
    Ok(())
}

/// Arguments of [`VolumeOrchestrator::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateVolumeRequest {
    pub instance_id: i64,
    pub device: String,
    /// Bytes. Defaults to the source image size when a snapshot is given.
    pub size: Option<u64>,
    /// Image the volume is populated from.
    pub snapshot_id: Option<String>,
    pub volume_type: Option<String>,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl CreateVolumeRequest {
    pub fn new(instance_id: i64, device: impl Into<String>) -> Self {
        Self {
            instance_id,
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }
}

/// External services the orchestrator depends on.
pub struct Collaborators {
    pub instances: Arc<dyn InstanceDirectory>,
    pub images: Arc<dyn ImageService>,
    pub quota: Arc<dyn QuotaService>,
    pub transport: Arc<dyn CastTransport>,
}

pub struct VolumeOrchestrator {
    store: VolumeStore,
    instances: Arc<dyn InstanceDirectory>,
    images: Arc<dyn ImageService>,
    quota: QuotaGuard,
    dispatcher: ComputeDispatcher,
    /// Backend active on the compute hosts.
    backend: ImageBackend,
}

impl VolumeOrchestrator {
    pub fn new(
        store: VolumeStore,
        collaborators: Collaborators,
        backend: ImageBackend,
        compute_topic: &str,
    ) -> Self {
        Self {
            store,
            instances: collaborators.instances,
            images: collaborators.images,
            quota: QuotaGuard::new(collaborators.quota),
            dispatcher: ComputeDispatcher::new(collaborators.transport, compute_topic),
            backend,
        }
    }

    fn instance(&self, ctx: &RequestContext, instance_id: i64) -> LocalvolResult<InstanceInfo> {
        self.instances
            .get_instance(ctx, instance_id)?
            .ok_or_else(|| LocalvolError::NotFound(format!("instance {}", instance_id)))
    }

    /// Live volume visible to `ctx`. Volumes of other projects read as absent
    /// for non-admin callers.
    pub fn get(&self, ctx: &RequestContext, volume_id: VolumeId) -> LocalvolResult<Volume> {
        match self.store.get(volume_id)? {
            Some(volume) if ctx.is_admin || volume.project_id == ctx.project_id => Ok(volume),
            _ => Err(LocalvolError::NotFound(format!("volume {}", volume_id))),
        }
    }

    /// Live volumes visible to `ctx`, newest first.
    pub fn list(&self, ctx: &RequestContext) -> LocalvolResult<Vec<Volume>> {
        if ctx.is_admin {
            self.store.list_all()
        } else {
            self.store.list_by_project(&ctx.project_id)
        }
    }

    pub fn create(
        &self,
        ctx: &RequestContext,
        request: CreateVolumeRequest,
    ) -> LocalvolResult<Volume> {
        validate_device(&request.device)?;
        let instance = self.instance(ctx, request.instance_id)?;

        let mut size = request.size;
        if let Some(snapshot_id) = request.snapshot_id.as_deref() {
            let source = self
                .images
                .show(ctx, snapshot_id)?
                .ok_or_else(|| LocalvolError::NotFound(format!("image {}", snapshot_id)))?;
            if source.deleted {
                return Err(LocalvolError::SourceUnavailable(format!(
                    "image {} has been deleted",
                    snapshot_id
                )));
            }
            size = size.or(Some(source.size));
        }
        let size = size.ok_or_else(|| {
            LocalvolError::InvalidParameter("size is required without a snapshot".into())
        })?;

        self.quota.check(ctx, size)?;

        let volume = self.store.create(&NewVolume {
            user_id: ctx.user_id.clone(),
            project_id: ctx.project_id.clone(),
            host: instance.host.clone(),
            instance_id: instance.id,
            device: request.device,
            size,
            snapshot_id: request.snapshot_id,
            volume_type_id: request.volume_type,
            display_description: request.description,
            metadata: request.metadata,
        })?;

        tracing::info!(
            volume_id = volume.id,
            host = %volume.host,
            size = volume.size,
            "Volume scheduled"
        );

        self.dispatcher.cast(
            &volume.host,
            ComputeMessage::CreateLocalVolume {
                instance_id: volume.instance_id,
                device: volume.device.clone(),
                volume_id: volume.id,
                snapshot_id: volume.snapshot_id.clone(),
                size: volume.size,
            },
        );

        Ok(volume)
    }

    pub fn delete(&self, ctx: &RequestContext, volume_id: VolumeId) -> LocalvolResult<()> {
        let volume = self.get(ctx, volume_id)?;
        self.store.mark_deleting(volume.id)?;

        tracing::info!(volume_id = volume.id, host = %volume.host, "Volume deleting");
        self.dispatcher.cast(
            &volume.host,
            ComputeMessage::DeleteLocalVolume {
                volume_id: volume.id,
            },
        );
        Ok(())
    }

    /// Resize to `new_size`, a size literal such as `"20G"`.
    pub fn resize(
        &self,
        ctx: &RequestContext,
        volume_id: VolumeId,
        new_size: &str,
    ) -> LocalvolResult<Volume> {
        let size = match parse_size(Some(new_size)) {
            Ok(Some(size)) => size,
            Ok(None) => {
                return Err(LocalvolError::InvalidParameter(
                    "resize requires a size".into(),
                ));
            }
            Err(e) => return Err(LocalvolError::InvalidParameter(e.to_string())),
        };

        let volume = self.get(ctx, volume_id)?;
        self.store.update_size(volume.id, size)?;

        tracing::info!(volume_id = volume.id, from = volume.size, to = size, "Volume resizing");
        self.dispatcher.cast(
            &volume.host,
            ComputeMessage::ResizeLocalVolume {
                volume_id: volume.id,
                new_size: size,
            },
        );

        Ok(Volume { size, ..volume })
    }

    /// Snapshot the volume into a new private image named `image_name`.
    pub fn snapshot(
        &self,
        ctx: &RequestContext,
        volume_id: VolumeId,
        image_name: &str,
        force_snapshot: bool,
    ) -> LocalvolResult<ImageMeta> {
        let volume = self.get(ctx, volume_id)?;
        let instance = self.instance(ctx, volume.instance_id)?;

        if self.backend == ImageBackend::Lvm && instance.running && !force_snapshot {
            return Err(LocalvolError::PreconditionFailed(format!(
                "instance {} must suspend before LVM snapshot",
                instance.uuid
            )));
        }

        let properties = HashMap::from([
            ("instance_uuid".to_string(), instance.uuid.clone()),
            ("user_id".to_string(), ctx.user_id.clone()),
            ("image_state".to_string(), "creating".to_string()),
            ("image_type".to_string(), "snapshot".to_string()),
        ]);
        let image = self.images.create(
            ctx,
            ImageCreateRequest {
                name: image_name.to_string(),
                is_public: false,
                status: "creating".to_string(),
                properties,
            },
        )?;

        tracing::info!(
            volume_id = volume.id,
            image_id = %image.id,
            force_snapshot,
            "Volume snapshot requested"
        );
        self.dispatcher.cast(
            &volume.host,
            ComputeMessage::SnapshotLocalVolume {
                volume_name: volume.name(),
                instance_id: volume.instance_id,
                image_id: image.id.clone(),
                force_snapshot,
            },
        );

        Ok(image)
    }

    /// Record a status reported by the host owning the volume.
    pub fn apply_status(
        &self,
        volume_id: VolumeId,
        status: VolumeStatus,
    ) -> LocalvolResult<Volume> {
        let volume = self
            .store
            .get(volume_id)?
            .ok_or_else(|| LocalvolError::NotFound(format!("volume {}", volume_id)))?;

        if !volume.status.can_transition_to(status) {
            return Err(LocalvolError::InvalidState(format!(
                "volume {} cannot move from {} to {}",
                volume_id, volume.status, status
            )));
        }

        match status {
            VolumeStatus::Deleted => self.store.mark_deleted(volume_id)?,
            VolumeStatus::Deleting => self.store.mark_deleting(volume_id)?,
            VolumeStatus::Available => {
                self.store.update_status(volume_id, status)?;
                if volume.timestamps.launched_at.is_none() {
                    self.store.update_timestamps(
                        volume_id,
                        &VolumeTimestamps {
                            launched_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )?;
                }
            }
            _ => self.store.update_status(volume_id, status)?,
        }

        tracing::info!(volume_id, from = %volume.status, to = %status, "Volume status updated");

        Ok(Volume {
            status,
            deleted: status == VolumeStatus::Deleted,
            ..volume
        })
    }
}
