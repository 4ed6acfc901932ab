//! Blocking worker pool for image and snapshot operations.
//!
//! Backend tools block for their whole run, so every operation is moved onto
//! tokio's blocking threads. Two limits apply:
//!
//! - at most `max_concurrent` operations run at once across the process;
//! - at most one operation runs per resource (image path), so mutations of
//!   the same image are serialized while distinct images proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use parking_lot::Mutex;
use tokio::sync::{OwnedMutexGuard, Semaphore};

use super::image::Image;

type ResourceLocks = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

#[derive(Clone)]
pub struct ImageWorkerPool {
    permits: Arc<Semaphore>,
    locks: Arc<Mutex<ResourceLocks>>,
}

impl std::fmt::Debug for ImageWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageWorkerPool")
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl ImageWorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the blocking `op` against `resource`.
    ///
    /// The resource lock and the pool permit travel with `op` onto the
    /// blocking thread, so they are held until `op` returns even if the
    /// caller stops waiting.
    pub async fn run<T, F>(&self, resource: &Path, op: F) -> LocalvolResult<T>
    where
        F: FnOnce() -> LocalvolResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let entry = ResourceEntry::attach(&self.locks, resource);
        let guard = entry.acquire().await;
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| LocalvolError::Internal(format!("worker pool closed: {}", e)))?;

        tracing::trace!(resource = %resource.display(), "Running image operation");
        tokio::task::spawn_blocking(move || {
            let result = op();
            drop(permit);
            drop(guard);
            drop(entry);
            result
        })
        .await
        .map_err(|e| LocalvolError::Internal(format!("image operation panicked: {}", e)))?
    }

    /// Run `op` against `image`, keyed by the image path.
    pub async fn with_image<T, F>(&self, image: Image, op: F) -> LocalvolResult<T>
    where
        F: FnOnce(&Image) -> LocalvolResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let resource = image.path().to_path_buf();
        self.run(&resource, move || op(&image)).await
    }

    /// Resources with an operation running or queued.
    pub fn busy_resources(&self) -> usize {
        self.locks.lock().len()
    }
}

/// A caller's claim on one resource's lock entry.
///
/// Dropping the last claim removes the entry from the map.
struct ResourceEntry {
    locks: Arc<Mutex<ResourceLocks>>,
    resource: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl ResourceEntry {
    fn attach(locks: &Arc<Mutex<ResourceLocks>>, resource: &Path) -> Self {
        let lock = Arc::clone(
            locks
                .lock()
                .entry(resource.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        Self {
            locks: Arc::clone(locks),
            resource: resource.to_path_buf(),
            lock,
        }
    }

    async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }
}

impl Drop for ResourceEntry {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::tools::DiskTools;
    use crate::util::process::testing::ScriptedRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn timed_op(gauge: Arc<Gauge>) -> impl FnOnce() -> LocalvolResult<()> + Send + 'static {
        move || {
            gauge.enter();
            std::thread::sleep(Duration::from_millis(50));
            gauge.leave();
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_resource_is_serialized() {
        let pool = ImageWorkerPool::new(8);
        let gauge = Gauge::new();
        let path = PathBuf::from("/dev/vg0/lv");

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let gauge = gauge.clone();
                let path = path.clone();
                tokio::spawn(async move { pool.run(&path, timed_op(gauge)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.busy_resources(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_resources_run_concurrently() {
        let pool = ImageWorkerPool::new(8);
        let gauge = Gauge::new();

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let pool = pool.clone();
                let gauge = gauge.clone();
                tokio::spawn(async move {
                    let path = PathBuf::from(format!("/dev/vg0/lv{}", i));
                    pool.run(&path, timed_op(gauge)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(gauge.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_global_bound_applies() {
        let pool = ImageWorkerPool::new(2);
        let gauge = Gauge::new();

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let pool = pool.clone();
                let gauge = gauge.clone();
                tokio::spawn(async move {
                    let path = PathBuf::from(format!("/images/{}", i));
                    pool.run(&path, timed_op(gauge)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abandoned_caller_keeps_resource_locked() {
        let pool = ImageWorkerPool::new(4);
        let gauge = Gauge::new();
        let path = PathBuf::from("/dev/vg0/lv");

        let slow = {
            let gauge = gauge.clone();
            move || {
                gauge.enter();
                std::thread::sleep(Duration::from_millis(300));
                gauge.leave();
                Ok(())
            }
        };
        let abandoned = tokio::time::timeout(Duration::from_millis(50), pool.run(&path, slow)).await;
        assert!(abandoned.is_err());

        pool.run(&path, timed_op(gauge.clone())).await.unwrap();

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.busy_resources(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let pool = ImageWorkerPool::new(4);
        let gauge = Gauge::new();
        let path = PathBuf::from("/images/a");

        let holder = {
            let pool = pool.clone();
            let path = path.clone();
            let gauge = gauge.clone();
            tokio::spawn(async move {
                pool.run(&path, move || {
                    gauge.enter();
                    std::thread::sleep(Duration::from_millis(200));
                    gauge.leave();
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let waiter =
            tokio::time::timeout(Duration::from_millis(20), pool.run(&path, timed_op(gauge))).await;
        assert!(waiter.is_err());

        holder.await.unwrap().unwrap();
        assert_eq!(pool.busy_resources(), 0);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let pool = ImageWorkerPool::new(1);
        let result: LocalvolResult<()> = pool
            .run(Path::new("/x"), || Err(LocalvolError::Internal("boom".into())))
            .await;
        assert!(matches!(result, Err(LocalvolError::Internal(_))));
    }

    #[tokio::test]
    async fn test_with_image_runs_driver_operation() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.with_virtual_size("/dev/vg0/lv", 10);
        let image = Image::lvm("vg0", "lv", DiskTools::new(runner.clone()));

        let pool = ImageWorkerPool::new(2);
        pool.with_image(image, |img| img.resize(20)).await.unwrap();

        assert_eq!(runner.count("lvresize -f -L 20b /dev/vg0/lv"), 1);
    }
}
