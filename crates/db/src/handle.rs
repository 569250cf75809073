use std::sync::Arc;

use sqlx::PgPool;

use crate::entity::pg_repository::PgEntityRepository;
use crate::entity::repositories::EntityRepository;
use crate::following::pg_repository::PgFollowingRepository;
use crate::following::repositories::FollowingStore;
#[cfg(any(test, feature = "test-util"))]
use crate::memory::MemoryStore;
use crate::record::pg_repository::PgRecordRepository;
use crate::record::repositories::RecordStore;
use crate::run::pg_repository::PgRunRepository;
use crate::run::repositories::RunRepository;

/// Every repository the harvester needs, bound to one backing store.
///
/// Passed explicitly into each component; there is no process-wide handle.
#[derive(Clone)]
pub struct StoreHandle {
    pub records: Arc<dyn RecordStore>,
    pub entities: Arc<dyn EntityRepository>,
    pub followings: Arc<dyn FollowingStore>,
    pub runs: Arc<dyn RunRepository>,
}

impl StoreHandle {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            records: Arc::new(PgRecordRepository::new(pool.clone())),
            entities: Arc::new(PgEntityRepository::new(pool.clone())),
            followings: Arc::new(PgFollowingRepository::new(pool.clone())),
            runs: Arc::new(PgRunRepository::new(pool)),
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            records: store.clone(),
            entities: store.clone(),
            followings: store.clone(),
            runs: store,
        }
    }
}
