//! 券核销服务
//!
//! 状态机：
//!
//! ```text
//! ISSUED ──attempt──▶ RESERVED ──redeem──▶ REDEEMED
//!   ▲                    │
//!   └──── 预占超时回退 ───┘
//! ISSUED | RESERVED ──cancel──▶ CANCELLED
//! ISSUED | RESERVED ──活动结束──▶ EXPIRED
//! ```
//!
//! 验券时订单不满足使用条件只返回 `redeemable = false`，不改变券状态。

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::observability::metrics;

use crate::clock::Clock;
use crate::coupon_code;
use crate::error::{LoyaltyError, Result};
use crate::models::{Claimed, Coupon, Order, PdvActor};
use crate::repository::{
    CouponRepositoryTrait, OfferRepositoryTrait, RedeemCommand, RedeemOutcome,
};
use crate::service::dto::{AttemptRequest, AttemptResponse, RedeemRequest, RedeemResponse};
use crate::service::idempotency::{Admission, IdempotencyLayer, operations};

pub struct RedemptionService {
    offers: Arc<dyn OfferRepositoryTrait>,
    coupons: Arc<dyn CouponRepositoryTrait>,
    idempotency: Arc<IdempotencyLayer>,
    clock: Arc<dyn Clock>,
    reservation_ttl: Duration,
}

impl RedemptionService {
    pub fn new(
        offers: Arc<dyn OfferRepositoryTrait>,
        coupons: Arc<dyn CouponRepositoryTrait>,
        idempotency: Arc<IdempotencyLayer>,
        clock: Arc<dyn Clock>,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            offers,
            coupons,
            idempotency,
            clock,
            reservation_ttl,
        }
    }

    /// PDV 验券并预占
    ///
    /// 同一终端重复验券返回已保存的折扣预览；其他终端持有未超时的预占时返回 `ALREADY_RESERVED`
    #[instrument(skip(self, request), fields(store_id = %request.store_id, session_id = %request.session_id))]
    pub async fn attempt(&self, request: AttemptRequest) -> Result<AttemptResponse> {
        let result = self.execute_attempt(&request).await;

        match &result {
            Ok(response) if response.redeemable => metrics::record_coupon_attempt("reserved"),
            Ok(_) => metrics::record_coupon_attempt("not_redeemable"),
            Err(e) => metrics::record_coupon_attempt(e.error_code()),
        }

        result
    }

    async fn execute_attempt(&self, request: &AttemptRequest) -> Result<AttemptResponse> {
        request.order.validate()?;
        let now = self.clock.now();
        let actor = PdvActor::new(request.store_id, request.session_id.clone());

        let coupon = self
            .coupons
            .find_by_code_hash(&coupon_code::hash(&request.code))
            .await?
            .ok_or(LoyaltyError::CouponNotFound)?;

        let invalid = LoyaltyError::InvalidState {
            status: coupon.status,
            operation: "attempt",
        };
        if coupon.status.is_terminal() {
            return Err(invalid);
        }

        let offer = self
            .offers
            .get_offer(coupon.offer_id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(coupon.offer_id))?;
        if offer.has_elapsed(now) {
            return Err(invalid);
        }

        let coupon_type = self
            .offers
            .get_coupon_type(offer.coupon_type_id)
            .await?
            .ok_or(LoyaltyError::CouponTypeNotFound(offer.coupon_type_id))?;

        if !coupon_type.applies_to(&request.order) {
            info!(coupon_id = %coupon.id, "订单不满足券使用条件");
            return Ok(AttemptResponse::not_redeemable(coupon.id));
        }

        let preview = coupon_type.preview_discount(&request.order)?;
        let reserved = self
            .coupons
            .try_reserve(coupon.id, &actor, preview, now, self.reservation_ttl)
            .await?;

        info!(
            coupon_id = %reserved.id,
            discount = %reserved.reservation_preview.unwrap_or(preview),
            "券已预占"
        );
        Ok(AttemptResponse::reserved(&reserved, preview))
    }

    /// 核销已预占的券
    ///
    /// 同一幂等键 + 相同请求体返回首次结果且不产生新的副作用；请求体不同返回 `CONFLICT`
    #[instrument(skip(self, request), fields(coupon_id = %request.coupon_id, store_id = %request.store_id))]
    pub async fn redeem(&self, request: RedeemRequest) -> Result<RedeemResponse> {
        let start = Instant::now();
        let result = self.execute_redeem(&request).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(response) if response.replayed => metrics::record_redemption("replay", elapsed),
            Ok(_) => metrics::record_redemption("success", elapsed),
            Err(e) => {
                metrics::record_redemption(e.error_code(), elapsed);
                if !e.is_business_error() {
                    warn!(error = %e, "券核销失败");
                }
            }
        }

        result
    }

    async fn execute_redeem(&self, request: &RedeemRequest) -> Result<RedeemResponse> {
        if let Some(order) = &request.order {
            order.validate()?;
        }
        let now = self.clock.now();

        let claim = match self
            .idempotency
            .begin(operations::COUPON_REDEEM, &request.idempotency_key, request, now)
            .await?
        {
            Admission::Proceed(claim) => claim,
            Admission::Replay(response) => {
                let outcome: RedeemOutcome = serde_json::from_value(response)?;
                info!(coupon_id = %outcome.coupon.id, "幂等请求，返回首次核销结果");
                return Ok(Self::to_response(outcome, true));
            }
        };

        let coupon = self.get_coupon(request.coupon_id).await?;
        let order = request
            .order
            .as_ref()
            .map(|ctx| Order::from_context(ctx, coupon.person_id, Some(request.store_id), now))
            .transpose()?;

        let command = RedeemCommand {
            coupon_id: coupon.id,
            actor: PdvActor::new(request.store_id, request.session_id.clone()),
            order,
            now,
        };

        match self.coupons.redeem(&command, &claim).await? {
            Claimed::Fresh(outcome) => {
                info!(
                    coupon_id = %outcome.coupon.id,
                    points_charged = outcome.points_charged,
                    "券核销成功"
                );
                Ok(Self::to_response(outcome, false))
            }
            Claimed::Replay(outcome) => Ok(Self::to_response(outcome, true)),
        }
    }

    /// 作废券（ISSUED / RESERVED），库存不回收
    ///
    /// 同一操作人重复作废返回首次结果
    #[instrument(skip(self))]
    pub async fn cancel(&self, coupon_id: Uuid, cancelled_by: &str) -> Result<Coupon> {
        let coupon = self
            .coupons
            .cancel(coupon_id, cancelled_by, self.clock.now())
            .await?;

        info!(coupon_id = %coupon.id, "券已作废");
        Ok(coupon)
    }

    pub async fn get_coupon(&self, coupon_id: Uuid) -> Result<Coupon> {
        self.coupons
            .get_coupon(coupon_id)
            .await?
            .ok_or(LoyaltyError::CouponNotFound)
    }

    pub async fn list_person_coupons(&self, person_id: Uuid) -> Result<Vec<Coupon>> {
        self.coupons.list_by_person(person_id).await
    }

    fn to_response(outcome: RedeemOutcome, replayed: bool) -> RedeemResponse {
        RedeemResponse {
            coupon_id: outcome.coupon.id,
            status: outcome.coupon.status,
            redeemed_at: outcome.coupon.redeemed_at,
            order_id: outcome.order_id,
            points_charged: outcome.points_charged,
            replayed,
        }
    }
}
