use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};

use super::layout::FilesystemLayout;
use super::options::LocalvolOptions;
use crate::db::{Database, VolumeStore};
use crate::disk::{ImageDriver, ImageWorkerPool};
use crate::init_logging_for;
use crate::util::{CommandRunner, SystemRunner};
use crate::volume::{
    CastTransport, Collaborators, ImageService, InstanceDirectory, ProjectQuota, QuotaService,
    VolumeOrchestrator,
};

/// Services provided by the embedding process.
pub struct RuntimeServices {
    pub instances: Arc<dyn InstanceDirectory>,
    pub images: Arc<dyn ImageService>,
    pub transport: Arc<dyn CastTransport>,
    /// Defaults to [`ProjectQuota`] over `options.quota`.
    pub quota: Option<Arc<dyn QuotaService>>,
    /// Defaults to [`SystemRunner`] with `options.root_helper`.
    pub runner: Option<Arc<dyn CommandRunner>>,
}

/// A fully initialized localvol process.
///
/// Owns the orchestrator used by the control plane and the image driver and
/// worker pool used on compute hosts.
pub struct LocalvolRuntime {
    options: LocalvolOptions,
    layout: FilesystemLayout,
    driver: ImageDriver,
    pool: ImageWorkerPool,
    orchestrator: VolumeOrchestrator,
}

impl LocalvolRuntime {
    /// Validate `options`, prepare the home directory, start logging, open
    /// the database and select the image backend.
    pub fn new(options: LocalvolOptions, services: RuntimeServices) -> LocalvolResult<Self> {
        options.validate()?;

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            LocalvolError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;

        let runner: Arc<dyn CommandRunner> = match services.runner {
            Some(runner) => runner,
            None => Arc::new(SystemRunner::new(options.root_helper())),
        };
        let driver = ImageDriver::from_options(&options, runner)?;

        let db_path = layout.db_path();
        let db = Database::open(&db_path).map_err(|e| {
            LocalvolError::Storage(format!(
                "Failed to initialize database at {}: {}",
                db_path.display(),
                e
            ))
        })?;
        let store = VolumeStore::new(db);

        let quota: Arc<dyn QuotaService> = match services.quota {
            Some(quota) => quota,
            None => Arc::new(ProjectQuota::new(options.quota.clone(), store.clone())),
        };

        let orchestrator = VolumeOrchestrator::new(
            store,
            Collaborators {
                instances: services.instances,
                images: services.images,
                quota,
                transport: services.transport,
            },
            driver.backend(),
            &options.compute_topic,
        );
        let pool = ImageWorkerPool::new(options.max_concurrent_operations);

        tracing::debug!(home_dir = %layout.home_dir().display(), "initialized runtime");

        Ok(Self {
            options,
            layout,
            driver,
            pool,
            orchestrator,
        })
    }

    pub fn options(&self) -> &LocalvolOptions {
        &self.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.layout
    }

    pub fn driver(&self) -> &ImageDriver {
        &self.driver
    }

    pub fn pool(&self) -> &ImageWorkerPool {
        &self.pool
    }

    pub fn orchestrator(&self) -> &VolumeOrchestrator {
        &self.orchestrator
    }
}

impl std::fmt::Debug for LocalvolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalvolRuntime")
            .field("home_dir", &self.layout.home_dir())
            .field("backend", &self.driver.backend())
            .finish()
    }
}
