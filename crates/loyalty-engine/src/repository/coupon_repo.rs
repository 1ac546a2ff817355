//! 券仓储
//!
//! 发放与核销各自在一个事务内完成全部变更。并发控制策略：
//!
//! - 发放：活动行 `FOR UPDATE`（阻塞、短持有），只覆盖校验与扣减
//! - 验券预占：券行 `FOR UPDATE NOWAIT`，锁被占用时立即返回 `ALREADY_RESERVED`
//! - 回收任务：`FOR UPDATE SKIP LOCKED`，跳过正在被处理的行
//! - 积分结算：按 `(person, scope, scope_id)` 的事务级 advisory lock 串行化

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use super::idempotency_repo::IdempotencyRepository;
use super::ledger_repo::PointLedgerRepository;
use super::offer_repo::OfferRepository;
use super::order_repo::OrderRepository;
use super::traits::{CouponRepositoryTrait, RedeemCommand, RedeemOutcome};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    Claimed, Coupon, CouponCount, IdempotencyClaim, NewPointTransaction, OutboxEvent, PdvActor,
    Person, PointReason, ReserveDecision, topics,
};

pub struct CouponRepository {
    pool: PgPool,
}

impl CouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(coupon)
    }

    pub async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE code_hash = $1 ORDER BY issued_at DESC LIMIT 1",
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }

    pub async fn list_by_person(&self, person_id: Uuid) -> Result<Vec<Coupon>> {
        let coupons = sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE person_id = $1 ORDER BY issued_at DESC",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(coupons)
    }

    pub async fn count_by_offer(&self, person_id: Uuid) -> Result<Vec<CouponCount>> {
        let counts = sqlx::query_as::<_, CouponCount>(
            r#"
            SELECT offer_id,
                   COUNT(*) FILTER (WHERE status IN ('ISSUED', 'RESERVED')) AS available,
                   COUNT(*) FILTER (WHERE status = 'REDEEMED') AS redeemed
            FROM coupons
            WHERE person_id = $1
            GROUP BY offer_id
            ORDER BY offer_id
            "#,
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    /// 在事务中统计用户在某活动下未作废的券
    pub async fn count_person_coupons_in_tx(
        tx: &mut PgConnection,
        offer_id: Uuid,
        person_id: Uuid,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM coupons
            WHERE offer_id = $1 AND person_id = $2 AND status <> 'CANCELLED'
            "#,
        )
        .bind(offer_id)
        .bind(person_id)
        .fetch_one(tx)
        .await?;

        Ok(count)
    }

    pub async fn insert_in_tx(tx: &mut PgConnection, coupon: &Coupon) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, offer_id, person_id, code_hash, status, issued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(coupon.id)
        .bind(coupon.offer_id)
        .bind(coupon.person_id)
        .bind(&coupon.code_hash)
        .bind(coupon.status)
        .bind(coupon.issued_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 在事务中写回券的可变字段
    pub async fn update_state_in_tx(tx: &mut PgConnection, coupon: &Coupon) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE coupons SET
                status = $2,
                reserved_at = $3,
                reservation_expires_at = $4,
                reserved_by_store_id = $5,
                reserved_by_session = $6,
                reservation_preview = $7,
                redeemed_at = $8,
                redeemed_store_id = $9,
                redeemed_order_id = $10,
                cancelled_at = $11,
                cancelled_by = $12,
                expired_at = $13
            WHERE id = $1
            "#,
        )
        .bind(coupon.id)
        .bind(coupon.status)
        .bind(coupon.reserved_at)
        .bind(coupon.reservation_expires_at)
        .bind(coupon.reserved_by_store_id)
        .bind(&coupon.reserved_by_session)
        .bind(coupon.reservation_preview)
        .bind(coupon.redeemed_at)
        .bind(coupon.redeemed_store_id)
        .bind(coupon.redeemed_order_id)
        .bind(coupon.cancelled_at)
        .bind(&coupon.cancelled_by)
        .bind(coupon.expired_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    pub async fn issue_coupon(
        &self,
        coupon: &Coupon,
        person: &Person,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<Coupon>> {
        let now = coupon.issued_at;
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = IdempotencyRepository::claim_in_tx(&mut tx, claim).await? {
            tx.rollback().await?;
            return existing.replay_for(claim);
        }

        let offer =
            OfferRepository::reserve_slot_in_tx(&mut tx, coupon.offer_id, person, now).await?;
        Self::insert_in_tx(&mut tx, coupon).await?;

        let event = OutboxEvent::pending(
            topics::COUPON_ISSUED,
            json!({
                "couponId": coupon.id,
                "offerId": coupon.offer_id,
                "personId": coupon.person_id,
                "issuedAt": now,
            }),
            now,
        );
        OrderRepository::insert_outbox_in_tx(&mut tx, &event).await?;
        IdempotencyRepository::complete_in_tx(&mut tx, claim, &serde_json::to_value(coupon)?)
            .await?;

        tx.commit().await?;

        info!(
            coupon_id = %coupon.id,
            offer_id = %coupon.offer_id,
            remaining = offer.current_quantity - 1,
            "券已发放"
        );

        Ok(Claimed::Fresh(coupon.clone()))
    }

    pub async fn try_reserve(
        &self,
        coupon_id: Uuid,
        actor: &PdvActor,
        preview: Decimal,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Coupon> {
        let mut tx = self.pool.begin().await?;

        // NOWAIT：锁不可用时立即失败，终端不会在收银台前等待
        let mut coupon =
            sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE NOWAIT")
                .bind(coupon_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| LoyaltyError::from_nowait(e, coupon_id))?
                .ok_or(LoyaltyError::CouponNotFound)?;

        if coupon.reserve_decision(actor, now)? == ReserveDecision::Reuse {
            tx.rollback().await?;
            return Ok(coupon);
        }

        coupon.reserve(actor, preview, now, ttl);
        Self::update_state_in_tx(&mut tx, &coupon).await?;
        tx.commit().await?;

        Ok(coupon)
    }

    pub async fn redeem(
        &self,
        command: &RedeemCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<RedeemOutcome>> {
        let now = command.now;
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = IdempotencyRepository::claim_in_tx(&mut tx, claim).await? {
            tx.rollback().await?;
            return existing.replay_for(claim);
        }

        let mut coupon =
            sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
                .bind(command.coupon_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(LoyaltyError::CouponNotFound)?;
        coupon.check_redeemable(&command.actor, now)?;

        let offer = OfferRepository::get_in_tx(&mut tx, coupon.offer_id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(coupon.offer_id))?;

        let mut settlement_transaction_id = None;
        if offer.points_cost > 0 {
            let scope = offer.scope_ref();
            PointLedgerRepository::lock_balance_in_tx(&mut tx, coupon.person_id, scope).await?;
            let available =
                PointLedgerRepository::balance_in_tx(&mut tx, coupon.person_id, scope, now).await?;
            if available < offer.points_cost {
                return Err(LoyaltyError::InsufficientPoints {
                    required: offer.points_cost,
                    available,
                });
            }

            let mut debit = NewPointTransaction::new(
                coupon.person_id,
                scope,
                -offer.points_cost,
                PointReason::CouponSettlement,
            );
            debit.store_id = Some(command.actor.store_id);
            debit.order_ref = Some(coupon.id.to_string());
            debit.details = json!({ "couponId": coupon.id, "offerId": offer.id });
            let debit = debit.into_transaction(now);
            PointLedgerRepository::insert_in_tx(&mut tx, &debit).await?;
            settlement_transaction_id = Some(debit.id);
        }

        if let Some(order) = &command.order {
            OrderRepository::insert_in_tx(&mut tx, order).await?;
        }
        let order_id = command.order.as_ref().map(|o| o.id);

        coupon.mark_redeemed(&command.actor, order_id, now);
        Self::update_state_in_tx(&mut tx, &coupon).await?;

        let outcome = RedeemOutcome {
            coupon,
            order_id,
            points_charged: offer.points_cost,
            settlement_transaction_id,
        };

        let event = OutboxEvent::pending(
            topics::COUPON_REDEEMED,
            json!({
                "couponId": outcome.coupon.id,
                "offerId": offer.id,
                "personId": outcome.coupon.person_id,
                "storeId": command.actor.store_id,
                "orderId": order_id,
                "pointsCharged": offer.points_cost,
                "redeemedAt": now,
            }),
            now,
        );
        OrderRepository::insert_outbox_in_tx(&mut tx, &event).await?;
        IdempotencyRepository::complete_in_tx(&mut tx, claim, &serde_json::to_value(&outcome)?)
            .await?;

        tx.commit().await?;

        Ok(Claimed::Fresh(outcome))
    }

    pub async fn cancel(
        &self,
        coupon_id: Uuid,
        cancelled_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Coupon> {
        let mut tx = self.pool.begin().await?;

        let mut coupon =
            sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
                .bind(coupon_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(LoyaltyError::CouponNotFound)?;

        if !coupon.cancel(cancelled_by, now)? {
            tx.rollback().await?;
            return Ok(coupon);
        }
        Self::update_state_in_tx(&mut tx, &coupon).await?;
        tx.commit().await?;

        Ok(coupon)
    }

    pub async fn release_stale_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM coupons
            WHERE status = 'RESERVED'
              AND reservation_expires_at < $1
            ORDER BY reservation_expires_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(ids);
        }

        sqlx::query(
            r#"
            UPDATE coupons SET
                status = 'ISSUED',
                reserved_at = NULL,
                reservation_expires_at = NULL,
                reserved_by_store_id = NULL,
                reserved_by_session = NULL,
                reservation_preview = NULL
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    pub async fn expire_elapsed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT c.id
            FROM coupons c
            JOIN coupon_offers o ON o.id = c.offer_id
            WHERE c.status IN ('ISSUED', 'RESERVED')
              AND o.end_at < $1
            ORDER BY c.issued_at ASC
            LIMIT $2
            FOR UPDATE OF c SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(ids);
        }

        sqlx::query(
            r#"
            UPDATE coupons SET
                status = 'EXPIRED',
                expired_at = $2,
                reserved_at = NULL,
                reservation_expires_at = NULL,
                reserved_by_store_id = NULL,
                reserved_by_session = NULL,
                reservation_preview = NULL
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }
}

#[async_trait]
impl CouponRepositoryTrait for CouponRepository {
    async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>> {
        self.get_coupon(id).await
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<Coupon>> {
        self.find_by_code_hash(code_hash).await
    }

    async fn list_by_person(&self, person_id: Uuid) -> Result<Vec<Coupon>> {
        self.list_by_person(person_id).await
    }

    async fn count_by_offer(&self, person_id: Uuid) -> Result<Vec<CouponCount>> {
        self.count_by_offer(person_id).await
    }

    async fn issue_coupon(
        &self,
        coupon: &Coupon,
        person: &Person,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<Coupon>> {
        self.issue_coupon(coupon, person, claim).await
    }

    async fn try_reserve(
        &self,
        coupon_id: Uuid,
        actor: &PdvActor,
        preview: Decimal,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Coupon> {
        self.try_reserve(coupon_id, actor, preview, now, ttl).await
    }

    async fn redeem(
        &self,
        command: &RedeemCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<RedeemOutcome>> {
        self.redeem(command, claim).await
    }

    async fn cancel(
        &self,
        coupon_id: Uuid,
        cancelled_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Coupon> {
        self.cancel(coupon_id, cancelled_by, now).await
    }

    async fn release_stale_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        self.release_stale_reservations(now, limit).await
    }

    async fn expire_elapsed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        self.expire_elapsed(now, limit).await
    }
}
