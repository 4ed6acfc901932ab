//! Volume control plane: records, admission, dispatch and orchestration.

pub mod collaborators;
pub mod dispatch;
pub mod orchestrator;
pub mod quota;
pub mod types;

pub use collaborators::{
    ImageCreateRequest, ImageMeta, ImageService, InstanceDirectory, InstanceInfo, RequestContext,
};
pub use dispatch::{CastTransport, ChannelTransport, ComputeDispatcher};
pub use orchestrator::{Collaborators, CreateVolumeRequest, VolumeOrchestrator, validate_device};
pub use quota::{ProjectQuota, QuotaGuard, QuotaService};
pub use types::{AttachStatus, Volume, VolumeId, VolumeStatus, VolumeTimestamps, volume_name};
