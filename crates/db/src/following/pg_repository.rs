use async_trait::async_trait;
use sqlx::PgPool;

use crate::following::models::Following;
use crate::following::repositories::FollowingStore;
use crate::map_sqlx_error;
use crate::record::models::InsertOutcome;
use tidemark_common::error::TidemarkResult;

#[derive(Clone)]
pub struct PgFollowingRepository {
    pool: PgPool,
}

impl PgFollowingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FollowingStore for PgFollowingRepository {
    async fn insert_if_absent(&self, following: &Following) -> TidemarkResult<InsertOutcome> {
        let result = sqlx::query(
            "insert into followings (follower_id, followed_id, username, display_name, payload)
             values ($1, $2, $3, $4, $5)
             on conflict (follower_id, followed_id) do nothing",
        )
        .bind(&following.follower_id)
        .bind(&following.followed_id)
        .bind(&following.username)
        .bind(&following.display_name)
        .bind(&following.payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(InsertOutcome::Inserted),
            Ok(_) => Ok(InsertOutcome::AlreadyExists),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn count_for(&self, follower_id: &str) -> TidemarkResult<u64> {
        let count: i64 =
            sqlx::query_scalar("select count(*) from followings where follower_id = $1")
                .bind(follower_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::schema::ensure_schema;
    use uuid::Uuid;

    #[tokio::test]
    async fn same_pair_from_two_followers_is_two_rows() {
        let url = match std::env::var("TEST_DATABASE_URL").ok() {
            Some(u) => u,
            None => return,
        };
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.expect("schema");
        let repo = PgFollowingRepository::new(pool);

        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        let edge = |follower: &str| Following {
            follower_id: follower.to_string(),
            followed_id: "shared".to_string(),
            username: Some("shared".to_string()),
            display_name: None,
            payload: serde_json::json!({ "id": "shared" }),
        };

        assert!(repo.insert_if_absent(&edge(&a)).await.unwrap().is_inserted());
        assert!(repo.insert_if_absent(&edge(&b)).await.unwrap().is_inserted());
        assert_eq!(
            repo.insert_if_absent(&edge(&a)).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(repo.count_for(&a).await.unwrap(), 1);
    }
}
