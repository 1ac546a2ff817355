//! 幂等记录仓储
//!
//! 声明通过 `(operation, idempotency_key)` 主键上的插入完成：并发的重复请求会在唯一索引上
//! 等待先到者提交，然后读到已完成的记录并重放或冲突。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::traits::IdempotencyRepositoryTrait;
use crate::error::Result;
use crate::models::{IdempotencyClaim, IdempotencyRecord};

pub struct IdempotencyRepository {
    pool: PgPool,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, operation: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT operation, idempotency_key, request_hash, response, created_at, expires_at
            FROM idempotency_records
            WHERE operation = $1 AND idempotency_key = $2
            "#,
        )
        .bind(operation)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// 在事务中声明幂等键
    ///
    /// 返回 `None` 表示声明成功；返回已有记录表示重复请求。已过期的记录会被覆盖。
    pub async fn claim_in_tx(
        tx: &mut PgConnection,
        claim: &IdempotencyClaim,
    ) -> Result<Option<IdempotencyRecord>> {
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_records
                (operation, idempotency_key, request_hash, response, created_at, expires_at)
            VALUES ($1, $2, $3, 'null'::jsonb, $4, $5)
            ON CONFLICT (operation, idempotency_key) DO UPDATE SET
                request_hash = EXCLUDED.request_hash,
                response = EXCLUDED.response,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_records.expires_at <= EXCLUDED.created_at
            RETURNING operation
            "#,
        )
        .bind(&claim.operation)
        .bind(&claim.key)
        .bind(&claim.request_hash)
        .bind(claim.created_at)
        .bind(claim.expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            return Ok(None);
        }

        let existing = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT operation, idempotency_key, request_hash, response, created_at, expires_at
            FROM idempotency_records
            WHERE operation = $1 AND idempotency_key = $2
            "#,
        )
        .bind(&claim.operation)
        .bind(&claim.key)
        .fetch_one(&mut *tx)
        .await?;

        Ok(Some(existing))
    }

    /// 在事务中写入最终响应
    pub async fn complete_in_tx(
        tx: &mut PgConnection,
        claim: &IdempotencyClaim,
        response: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_records
            SET response = $3
            WHERE operation = $1 AND idempotency_key = $2
            "#,
        )
        .bind(&claim.operation)
        .bind(&claim.key)
        .bind(response)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 分批删除过期记录
    pub async fn purge_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE (operation, idempotency_key) IN (
                SELECT operation, idempotency_key
                FROM idempotency_records
                WHERE expires_at <= $1
                ORDER BY expires_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyRepositoryTrait for IdempotencyRepository {
    async fn find(&self, operation: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.find(operation, key).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64> {
        self.purge_expired(now, limit).await
    }
}
