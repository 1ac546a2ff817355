//! 券类型与活动仓储
//!
//! 库存扣减只通过 `lock_in_tx` + `decrement_in_tx` 在发放事务内完成，不做任何读缓存

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use super::traits::OfferRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use super::coupon_repo::CouponRepository;
use crate::models::{CouponOffer, CouponType, Person};

pub struct OfferRepository {
    pool: PgPool,
}

impl OfferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_coupon_type(&self, coupon_type: &CouponType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupon_types
                (id, name, kind, discount_amount, discount_percentage, valid_skus, min_order_total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(coupon_type.id)
        .bind(&coupon_type.name)
        .bind(coupon_type.kind)
        .bind(coupon_type.discount_amount)
        .bind(coupon_type.discount_percentage)
        .bind(&coupon_type.valid_skus)
        .bind(coupon_type.min_order_total)
        .bind(coupon_type.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_coupon_type(&self, id: Uuid) -> Result<Option<CouponType>> {
        let coupon_type = sqlx::query_as::<_, CouponType>(
            r#"
            SELECT id, name, kind, discount_amount, discount_percentage, valid_skus,
                   min_order_total, created_at
            FROM coupon_types
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon_type)
    }

    pub async fn create_offer(&self, offer: &CouponOffer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupon_offers
                (id, name, coupon_type_id, scope, scope_id, initial_quantity, current_quantity,
                 max_per_customer, is_active, start_at, end_at, segment, points_cost,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(offer.id)
        .bind(&offer.name)
        .bind(offer.coupon_type_id)
        .bind(offer.scope)
        .bind(offer.scope_id)
        .bind(offer.initial_quantity)
        .bind(offer.current_quantity)
        .bind(offer.max_per_customer)
        .bind(offer.is_active)
        .bind(offer.start_at)
        .bind(offer.end_at)
        .bind(&offer.segment)
        .bind(offer.points_cost)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_offer(&self, id: Uuid) -> Result<Option<CouponOffer>> {
        let offer = sqlx::query_as::<_, CouponOffer>("SELECT * FROM coupon_offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(offer)
    }

    /// 在事务中读取活动（不加锁）
    pub async fn get_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<CouponOffer>> {
        let offer = sqlx::query_as::<_, CouponOffer>("SELECT * FROM coupon_offers WHERE id = $1")
            .bind(id)
            .fetch_optional(tx)
            .await?;

        Ok(offer)
    }

    /// 在事务中对活动行加排他锁（阻塞等待，持有时间仅覆盖校验与扣减）
    pub async fn lock_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<CouponOffer>> {
        let offer = sqlx::query_as::<_, CouponOffer>(
            "SELECT * FROM coupon_offers WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(tx)
        .await?;

        Ok(offer)
    }

    /// 在事务中扣减一个库存
    pub async fn decrement_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE coupon_offers
            SET current_quantity = current_quantity - 1, updated_at = $2
            WHERE id = $1 AND current_quantity > 0
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::OutOfStock(id));
        }
        Ok(())
    }

    /// 在发放事务中占用一个名额：锁行 → 统计该用户已领数量 → `check_slot` → 扣减
    ///
    /// 返回扣减前的活动快照，行锁持续到事务结束
    pub async fn reserve_slot_in_tx(
        tx: &mut PgConnection,
        offer_id: Uuid,
        person: &Person,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        let offer = Self::lock_in_tx(&mut *tx, offer_id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(offer_id))?;
        let issued_to_person =
            CouponRepository::count_person_coupons_in_tx(&mut *tx, offer.id, person.id).await?;
        offer.check_slot(person, issued_to_person, now)?;

        Self::decrement_in_tx(&mut *tx, offer.id, now).await?;
        Ok(offer)
    }

    pub async fn adjust_quantity(
        &self,
        offer_id: Uuid,
        new_initial: i32,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        let mut tx = self.pool.begin().await?;

        let offer = Self::lock_in_tx(&mut tx, offer_id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(offer_id))?;
        let new_current = offer.adjusted_current(new_initial)?;

        let updated = sqlx::query_as::<_, CouponOffer>(
            r#"
            UPDATE coupon_offers
            SET initial_quantity = $2, current_quantity = $3, updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(offer_id)
        .bind(new_initial)
        .bind(new_current)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            offer_id = %offer_id,
            issued = offer.issued_count(),
            initial_quantity = new_initial,
            current_quantity = new_current,
            "活动总量已调整"
        );

        Ok(updated)
    }

    pub async fn set_active(
        &self,
        offer_id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        sqlx::query_as::<_, CouponOffer>(
            r#"
            UPDATE coupon_offers
            SET is_active = $2, updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(offer_id)
        .bind(is_active)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LoyaltyError::OfferNotFound(offer_id))
    }
}

#[async_trait]
impl OfferRepositoryTrait for OfferRepository {
    async fn create_coupon_type(&self, coupon_type: &CouponType) -> Result<()> {
        self.create_coupon_type(coupon_type).await
    }

    async fn get_coupon_type(&self, id: Uuid) -> Result<Option<CouponType>> {
        self.get_coupon_type(id).await
    }

    async fn create_offer(&self, offer: &CouponOffer) -> Result<()> {
        self.create_offer(offer).await
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<CouponOffer>> {
        self.get_offer(id).await
    }

    async fn adjust_quantity(
        &self,
        offer_id: Uuid,
        new_initial: i32,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        self.adjust_quantity(offer_id, new_initial, now).await
    }

    async fn set_active(
        &self,
        offer_id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        self.set_active(offer_id, is_active, now).await
    }
}
