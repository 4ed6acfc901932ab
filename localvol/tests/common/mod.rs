#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use localvol::db::{Database, VolumeStore};
use localvol::disk::ImageBackend;
use localvol::util::{CommandRunner, ToolCommand, ToolOutput};
use localvol::volume::{
    ChannelTransport, Collaborators, ImageCreateRequest, ImageMeta, ImageService,
    InstanceDirectory, InstanceInfo, QuotaService, RequestContext, VolumeOrchestrator,
};
use localvol::{CastEnvelope, LocalvolResult};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

pub const HOST: &str = "node-1";
pub const RUNNING_INSTANCE: i64 = 1;
pub const STOPPED_INSTANCE: i64 = 2;

#[derive(Default)]
pub struct FakeInstances {
    instances: HashMap<i64, InstanceInfo>,
}

impl FakeInstances {
    pub fn with_defaults() -> Self {
        let mut instances = HashMap::new();
        for (id, running) in [(RUNNING_INSTANCE, true), (STOPPED_INSTANCE, false)] {
            instances.insert(
                id,
                InstanceInfo {
                    id,
                    uuid: format!("uuid-{}", id),
                    host: HOST.to_string(),
                    running,
                },
            );
        }
        Self { instances }
    }
}

impl InstanceDirectory for FakeInstances {
    fn get_instance(
        &self,
        _ctx: &RequestContext,
        instance_id: i64,
    ) -> LocalvolResult<Option<InstanceInfo>> {
        Ok(self.instances.get(&instance_id).cloned())
    }
}

/// Image service keeping records in memory.
#[derive(Default)]
pub struct FakeImages {
    images: Mutex<HashMap<String, ImageMeta>>,
    created: Mutex<Vec<ImageCreateRequest>>,
}

impl FakeImages {
    pub fn insert(&self, id: &str, size: u64, deleted: bool) {
        self.images.lock().insert(
            id.to_string(),
            ImageMeta {
                id: id.to_string(),
                name: id.to_string(),
                size,
                status: "active".to_string(),
                is_public: false,
                deleted,
                properties: HashMap::new(),
            },
        );
    }

    pub fn created(&self) -> Vec<ImageCreateRequest> {
        self.created.lock().clone()
    }
}

impl ImageService for FakeImages {
    fn show(&self, _ctx: &RequestContext, image_id: &str) -> LocalvolResult<Option<ImageMeta>> {
        Ok(self.images.lock().get(image_id).cloned())
    }

    fn create(
        &self,
        _ctx: &RequestContext,
        request: ImageCreateRequest,
    ) -> LocalvolResult<ImageMeta> {
        let mut created = self.created.lock();
        created.push(request.clone());
        let meta = ImageMeta {
            id: format!("img-{}", created.len()),
            name: request.name,
            size: 0,
            status: request.status,
            is_public: request.is_public,
            deleted: false,
            properties: request.properties,
        };
        self.images.lock().insert(meta.id.clone(), meta.clone());
        Ok(meta)
    }
}

/// Quota allowing a fixed number of volumes per request.
pub struct FixedQuota(pub u64);

impl QuotaService for FixedQuota {
    fn allowed_volumes(
        &self,
        _ctx: &RequestContext,
        count: u64,
        _gigabytes: u64,
    ) -> LocalvolResult<u64> {
        Ok(count.min(self.0))
    }
}

/// Runner that succeeds without running anything.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<String>>,
}

impl CommandRunner for RecordingRunner {
    fn execute(&self, command: &ToolCommand) -> LocalvolResult<ToolOutput> {
        self.calls.lock().push(command.command_line());
        Ok(ToolOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }
}

pub struct Harness {
    pub orchestrator: VolumeOrchestrator,
    pub images: Arc<FakeImages>,
    pub casts: UnboundedReceiver<CastEnvelope>,
}

impl Harness {
    pub fn new(backend: ImageBackend) -> Self {
        Self::with_quota(backend, Arc::new(FixedQuota(u64::MAX)))
    }

    pub fn with_quota(backend: ImageBackend, quota: Arc<dyn QuotaService>) -> Self {
        let store = VolumeStore::new(Database::open_in_memory().unwrap());
        let images = Arc::new(FakeImages::default());
        let (transport, casts) = ChannelTransport::channel();

        let orchestrator = VolumeOrchestrator::new(
            store,
            Collaborators {
                instances: Arc::new(FakeInstances::with_defaults()),
                images: images.clone(),
                quota,
                transport: Arc::new(transport),
            },
            backend,
            "compute",
        );

        Self {
            orchestrator,
            images,
            casts,
        }
    }

    /// Casts sent since the last call, in order.
    pub fn drain_casts(&mut self) -> Vec<CastEnvelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.casts.try_recv() {
            out.push(envelope);
        }
        out
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new("alice", "project-a")
}
