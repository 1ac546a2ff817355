//! 活动库存管理
//!
//! 负责券类型与活动的创建、总量调整和启停。发放时的库存扣减在券仓储的发放事务中完成，
//! 校验顺序由 `CouponOffer::check_slot` 定义。

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{LoyaltyError, Result};
use crate::models::{CouponOffer, CouponType, NewOffer};
use crate::repository::{DirectoryRepositoryTrait, OfferRepositoryTrait};

pub struct InventoryManager {
    offers: Arc<dyn OfferRepositoryTrait>,
    directory: Arc<dyn DirectoryRepositoryTrait>,
    clock: Arc<dyn Clock>,
}

impl InventoryManager {
    pub fn new(
        offers: Arc<dyn OfferRepositoryTrait>,
        directory: Arc<dyn DirectoryRepositoryTrait>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            offers,
            directory,
            clock,
        }
    }

    #[instrument(skip(self, coupon_type), fields(kind = ?coupon_type.kind))]
    pub async fn create_coupon_type(&self, coupon_type: CouponType) -> Result<CouponType> {
        coupon_type.validate()?;
        self.offers.create_coupon_type(&coupon_type).await?;

        info!(coupon_type_id = %coupon_type.id, name = %coupon_type.name, "券类型已创建");
        Ok(coupon_type)
    }

    #[instrument(skip(self, request), fields(owner = %request.owner, quantity = request.quantity))]
    pub async fn create_offer(&self, request: NewOffer) -> Result<CouponOffer> {
        request.validate()?;

        if self
            .offers
            .get_coupon_type(request.coupon_type_id)
            .await?
            .is_none()
        {
            return Err(LoyaltyError::CouponTypeNotFound(request.coupon_type_id));
        }
        if !self.directory.scope_exists(request.owner).await? {
            return Err(LoyaltyError::ScopeNotFound(request.owner.to_string()));
        }

        let offer = request.into_offer(self.clock.now());
        self.offers.create_offer(&offer).await?;

        info!(offer_id = %offer.id, name = %offer.name, "活动已创建");
        Ok(offer)
    }

    pub async fn get_offer(&self, offer_id: Uuid) -> Result<CouponOffer> {
        self.offers
            .get_offer(offer_id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(offer_id))
    }

    /// 调整活动总量，剩余库存 = 新总量 − 已发放
    #[instrument(skip(self))]
    pub async fn adjust_quantity(&self, offer_id: Uuid, new_initial: i32) -> Result<CouponOffer> {
        if new_initial < 0 {
            return Err(LoyaltyError::Validation("活动总量不能为负数".to_string()));
        }

        let offer = self
            .offers
            .adjust_quantity(offer_id, new_initial, self.clock.now())
            .await?;

        info!(
            offer_id = %offer.id,
            initial_quantity = offer.initial_quantity,
            current_quantity = offer.current_quantity,
            "活动总量已调整"
        );
        Ok(offer)
    }

    /// 启用或停用活动，活动不会被删除
    #[instrument(skip(self))]
    pub async fn set_active(&self, offer_id: Uuid, is_active: bool) -> Result<CouponOffer> {
        let offer = self
            .offers
            .set_active(offer_id, is_active, self.clock.now())
            .await?;

        info!(offer_id = %offer.id, is_active, "活动状态已更新");
        Ok(offer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::{DiscountKind, ScopeRef};
    use crate::repository::{MockDirectoryRepositoryTrait, MockOfferRepositoryTrait};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn new_offer(coupon_type_id: Uuid, owner: ScopeRef) -> NewOffer {
        NewOffer {
            name: "Café grátis".to_string(),
            coupon_type_id,
            owner,
            quantity: 10,
            max_per_customer: 1,
            start_at: None,
            end_at: None,
            segment: None,
            points_cost: 0,
        }
    }

    fn coupon_type() -> CouponType {
        CouponType {
            id: Uuid::new_v4(),
            name: "R$ 5 off".to_string(),
            kind: DiscountKind::FixedAmount,
            discount_amount: Some(Decimal::new(500, 2)),
            discount_percentage: None,
            valid_skus: vec![],
            min_order_total: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_offer_requires_existing_type_and_scope() {
        let known_type = coupon_type();
        let known_type_id = known_type.id;
        let store = ScopeRef::Store(Uuid::new_v4());

        let mut offers = MockOfferRepositoryTrait::new();
        offers
            .expect_get_coupon_type()
            .returning(move |id| Ok((id == known_type_id).then(|| known_type.clone())));
        offers.expect_create_offer().times(1).returning(|_| Ok(()));

        let mut directory = MockDirectoryRepositoryTrait::new();
        directory
            .expect_scope_exists()
            .returning(move |scope| Ok(scope == store));

        let manager = InventoryManager::new(
            Arc::new(offers),
            Arc::new(directory),
            Arc::new(SystemClock),
        );

        let missing_type = manager
            .create_offer(new_offer(Uuid::new_v4(), store))
            .await;
        assert!(matches!(
            missing_type,
            Err(LoyaltyError::CouponTypeNotFound(_))
        ));

        let missing_scope = manager
            .create_offer(new_offer(known_type_id, ScopeRef::Store(Uuid::new_v4())))
            .await;
        assert!(matches!(missing_scope, Err(LoyaltyError::ScopeNotFound(_))));

        let offer = manager
            .create_offer(new_offer(known_type_id, store))
            .await
            .unwrap();
        assert_eq!(offer.current_quantity, 10);
        assert!(offer.is_active);
    }

    #[tokio::test]
    async fn test_invalid_coupon_type_rejected_before_storage() {
        let mut offers = MockOfferRepositoryTrait::new();
        offers.expect_create_coupon_type().never();

        let manager = InventoryManager::new(
            Arc::new(offers),
            Arc::new(MockDirectoryRepositoryTrait::new()),
            Arc::new(SystemClock),
        );

        let mut bad = coupon_type();
        bad.discount_percentage = Some(Decimal::TEN);
        assert!(matches!(
            manager.create_coupon_type(bad).await,
            Err(LoyaltyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_quantity_rejected() {
        let manager = InventoryManager::new(
            Arc::new(MockOfferRepositoryTrait::new()),
            Arc::new(MockDirectoryRepositoryTrait::new()),
            Arc::new(SystemClock),
        );
        assert!(matches!(
            manager.adjust_quantity(Uuid::new_v4(), -1).await,
            Err(LoyaltyError::Validation(_))
        ));
    }
}
