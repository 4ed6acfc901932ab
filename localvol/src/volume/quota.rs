//! Admission control for new volumes.

use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};

use super::collaborators::RequestContext;
use crate::db::VolumeStore;
use crate::runtime::QuotaLimits;
use crate::util::size::whole_gigabytes;

/// Quota backend.
pub trait QuotaService: Send + Sync {
    /// How many of `count` requested volumes of `gigabytes` each fit in the
    /// caller's project.
    fn allowed_volumes(
        &self,
        ctx: &RequestContext,
        count: u64,
        gigabytes: u64,
    ) -> LocalvolResult<u64>;
}

/// Rejects requests before any resource is allocated.
#[derive(Clone)]
pub struct QuotaGuard {
    service: Arc<dyn QuotaService>,
}

impl QuotaGuard {
    pub fn new(service: Arc<dyn QuotaService>) -> Self {
        Self { service }
    }

    /// Admit one volume of `size` bytes, charged in whole gigabytes.
    pub fn check(&self, ctx: &RequestContext, size: u64) -> LocalvolResult<()> {
        let gigabytes = whole_gigabytes(size);
        let allowed = self.service.allowed_volumes(ctx, 1, gigabytes)?;
        if allowed < 1 {
            tracing::warn!(
                project_id = %ctx.project_id,
                gigabytes,
                "Quota exceeded for volume request"
            );
            return Err(LocalvolError::QuotaExceeded(format!(
                "requested {}G volume exceeds quota of project {}",
                gigabytes, ctx.project_id
            )));
        }
        Ok(())
    }
}

/// Quota computed from configured limits and the live volumes in the store.
pub struct ProjectQuota {
    limits: QuotaLimits,
    store: VolumeStore,
}

impl ProjectQuota {
    pub fn new(limits: QuotaLimits, store: VolumeStore) -> Self {
        Self { limits, store }
    }
}

fn remaining(limit: Option<u64>, used: u64) -> u64 {
    limit.map_or(u64::MAX, |l| l.saturating_sub(used))
}

impl QuotaService for ProjectQuota {
    fn allowed_volumes(
        &self,
        ctx: &RequestContext,
        count: u64,
        gigabytes: u64,
    ) -> LocalvolResult<u64> {
        let usage = self.store.usage_for_project(&ctx.project_id)?;
        let volumes_left = remaining(self.limits.volumes, usage.volumes);
        let gigabytes_left = remaining(self.limits.gigabytes, usage.gigabytes);

        let mut allowed = count.min(volumes_left);
        if gigabytes > 0 && count > 0 {
            let per_request = gigabytes.saturating_mul(count);
            allowed = allowed.min(gigabytes_left / per_request);
        }

        tracing::debug!(
            project_id = %ctx.project_id,
            volumes_left,
            gigabytes_left,
            allowed,
            "Computed volume quota"
        );
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::util::size::GIB;
    use crate::volume::types::NewVolume;
    use rstest::rstest;
    use std::collections::HashMap;

    fn store_with_usage(sizes: &[u64]) -> VolumeStore {
        let store = VolumeStore::new(Database::open_in_memory().unwrap());
        for size in sizes {
            store
                .create(&NewVolume {
                    user_id: "u".into(),
                    project_id: "p".into(),
                    host: "h".into(),
                    instance_id: 1,
                    device: "/dev/vdb".into(),
                    size: *size,
                    snapshot_id: None,
                    volume_type_id: None,
                    display_description: None,
                    metadata: HashMap::new(),
                })
                .unwrap();
        }
        store
    }

    #[rstest]
    #[case(None, None, &[], 1, 100, 1)]
    #[case(Some(2), None, &[GIB], 1, 1, 1)]
    #[case(Some(2), None, &[GIB, GIB], 1, 1, 0)]
    #[case(None, Some(10), &[4 * GIB], 1, 6, 1)]
    #[case(None, Some(10), &[4 * GIB], 1, 7, 0)]
    #[case(None, Some(10), &[20 * GIB], 1, 0, 1)]
    #[case(None, Some(10), &[], 5, 2, 1)]
    #[case(None, Some(10), &[], 5, 3, 0)]
    #[case(Some(3), None, &[], 5, 1, 3)]
    fn test_allowed_volumes(
        #[case] volumes: Option<u64>,
        #[case] gigabytes: Option<u64>,
        #[case] existing: &[u64],
        #[case] count: u64,
        #[case] requested: u64,
        #[case] expected: u64,
    ) {
        let quota = ProjectQuota::new(
            QuotaLimits { volumes, gigabytes },
            store_with_usage(existing),
        );
        let ctx = RequestContext::new("u", "p");
        assert_eq!(quota.allowed_volumes(&ctx, count, requested).unwrap(), expected);
    }

    #[test]
    fn test_guard_rejects_when_nothing_allowed() {
        let quota = ProjectQuota::new(
            QuotaLimits {
                volumes: None,
                gigabytes: Some(1),
            },
            store_with_usage(&[]),
        );
        let guard = QuotaGuard::new(Arc::new(quota));
        let ctx = RequestContext::new("u", "p");

        assert!(guard.check(&ctx, GIB).is_ok());
        // Sub-gigabyte remainders are not charged.
        assert!(guard.check(&ctx, GIB + GIB / 2).is_ok());
        let err = guard.check(&ctx, 2 * GIB).unwrap_err();
        assert!(matches!(err, LocalvolError::QuotaExceeded(_)));
    }
}
