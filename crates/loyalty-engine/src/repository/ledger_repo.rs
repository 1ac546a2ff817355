//! 积分账本仓储
//!
//! 流水只追加不修改；余额始终由未过期流水实时汇总，不做缓存

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use super::idempotency_repo::IdempotencyRepository;
use super::order_repo::OrderRepository;
use super::traits::{AccrualCommand, AccrualOutcome, PointLedgerRepositoryTrait};
use crate::error::Result;
use crate::models::{
    Claimed, IdempotencyClaim, PointTransaction, Scope, ScopeBalance, ScopeRef,
};

/// 余额聚合行
#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    scope: Scope,
    scope_id: Option<Uuid>,
    points: i64,
}

pub struct PointLedgerRepository {
    pool: PgPool,
}

impl PointLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, transaction: &PointTransaction) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_in_tx(&mut conn, transaction).await
    }

    /// 在事务中写入流水
    pub async fn insert_in_tx(tx: &mut PgConnection, transaction: &PointTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO point_transactions
                (id, person_id, scope, scope_id, delta, reason, expires_at, order_ref,
                 store_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.person_id)
        .bind(transaction.scope)
        .bind(transaction.scope_id)
        .bind(transaction.delta)
        .bind(transaction.reason)
        .bind(transaction.expires_at)
        .bind(&transaction.order_ref)
        .bind(transaction.store_id)
        .bind(&transaction.details)
        .bind(transaction.created_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 在事务中串行化同一 `(person, scope, scope_id)` 的积分结算
    ///
    /// 事务级 advisory lock，提交或回滚时自动释放
    pub async fn lock_balance_in_tx(
        tx: &mut PgConnection,
        person_id: Uuid,
        scope: ScopeRef,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(scope.lock_key(person_id))
            .execute(tx)
            .await?;

        Ok(())
    }

    pub async fn balance(
        &self,
        person_id: Uuid,
        scope: ScopeRef,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::balance_in_tx(&mut conn, person_id, scope, now).await
    }

    /// 在事务中计算未过期余额
    pub async fn balance_in_tx(
        tx: &mut PgConnection,
        person_id: Uuid,
        scope: ScopeRef,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let balance: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(delta), 0)::BIGINT
            FROM point_transactions
            WHERE person_id = $1
              AND scope = $2
              AND scope_id IS NOT DISTINCT FROM $3
              AND (expires_at IS NULL OR expires_at > $4)
            "#,
        )
        .bind(person_id)
        .bind(scope.scope())
        .bind(scope.scope_id())
        .bind(now)
        .fetch_one(tx)
        .await?;

        Ok(balance)
    }

    /// 按范围汇总用户的所有余额
    pub async fn balances(&self, person_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ScopeBalance>> {
        let rows = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT scope, scope_id, COALESCE(SUM(delta), 0)::BIGINT AS points
            FROM point_transactions
            WHERE person_id = $1
              AND (expires_at IS NULL OR expires_at > $2)
            GROUP BY scope, scope_id
            ORDER BY scope, scope_id
            "#,
        )
        .bind(person_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ScopeBalance {
                    scope: ScopeRef::from_parts(row.scope, row.scope_id)?,
                    points: row.points,
                })
            })
            .collect()
    }

    /// 列出用户最近的流水
    pub async fn list_by_person(&self, person_id: Uuid, limit: i64) -> Result<Vec<PointTransaction>> {
        let transactions = sqlx::query_as::<_, PointTransaction>(
            r#"
            SELECT id, person_id, scope, scope_id, delta, reason, expires_at, order_ref,
                   store_id, details, created_at
            FROM point_transactions
            WHERE person_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(person_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    pub async fn accrue(
        &self,
        command: &AccrualCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<AccrualOutcome>> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = IdempotencyRepository::claim_in_tx(&mut tx, claim).await? {
            tx.rollback().await?;
            return existing.replay_for(claim);
        }

        let transaction = &command.transaction;
        let scope = transaction.scope_ref()?;

        Self::insert_in_tx(&mut tx, transaction).await?;

        if let Some(order) = &command.order {
            OrderRepository::insert_in_tx(&mut tx, order).await?;
        }

        let balance =
            Self::balance_in_tx(&mut tx, transaction.person_id, scope, transaction.created_at)
                .await?;

        let outcome = AccrualOutcome {
            transaction_id: transaction.id,
            scope,
            points_earned: transaction.delta,
            balance,
            expires_at: transaction.expires_at,
            order_id: command.order.as_ref().map(|o| o.id),
        };

        IdempotencyRepository::complete_in_tx(&mut tx, claim, &serde_json::to_value(&outcome)?)
            .await?;
        tx.commit().await?;

        info!(
            person_id = %transaction.person_id,
            scope = %scope.scope(),
            points = transaction.delta,
            balance,
            "积分已累积"
        );

        Ok(Claimed::Fresh(outcome))
    }
}

#[async_trait]
impl PointLedgerRepositoryTrait for PointLedgerRepository {
    async fn append(&self, transaction: &PointTransaction) -> Result<()> {
        self.append(transaction).await
    }

    async fn balance(&self, person_id: Uuid, scope: ScopeRef, now: DateTime<Utc>) -> Result<i64> {
        self.balance(person_id, scope, now).await
    }

    async fn balances(&self, person_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ScopeBalance>> {
        self.balances(person_id, now).await
    }

    async fn list_by_person(&self, person_id: Uuid, limit: i64) -> Result<Vec<PointTransaction>> {
        self.list_by_person(person_id, limit).await
    }

    async fn accrue(
        &self,
        command: &AccrualCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<AccrualOutcome>> {
        self.accrue(command, claim).await
    }
}
