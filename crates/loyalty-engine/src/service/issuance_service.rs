//! 券发放服务
//!
//! ## 发放流程
//!
//! 1. 幂等快速路径 -> 2. 用户存在性 -> 3. 生成券码 -> 4. 原子单元（声明 + 扣减 + 写入 + outbox）
//!
//! 券码明文只出现在首次发放的响应中，幂等重放返回同一张券但不含券码。

use std::sync::Arc;

use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics;

use crate::clock::Clock;
use crate::coupon_code;
use crate::error::{LoyaltyError, Result};
use crate::models::{Claimed, Coupon};
use crate::repository::{CouponRepositoryTrait, DirectoryRepositoryTrait};
use crate::service::dto::{IssueCouponRequest, IssueCouponResponse};
use crate::service::idempotency::{Admission, IdempotencyLayer, operations};

pub struct IssuanceService {
    coupons: Arc<dyn CouponRepositoryTrait>,
    directory: Arc<dyn DirectoryRepositoryTrait>,
    idempotency: Arc<IdempotencyLayer>,
    clock: Arc<dyn Clock>,
    code_length: usize,
}

impl IssuanceService {
    pub fn new(
        coupons: Arc<dyn CouponRepositoryTrait>,
        directory: Arc<dyn DirectoryRepositoryTrait>,
        idempotency: Arc<IdempotencyLayer>,
        clock: Arc<dyn Clock>,
        code_length: usize,
    ) -> Self {
        Self {
            coupons,
            directory,
            idempotency,
            clock,
            code_length,
        }
    }

    /// 向用户发放一张活动券
    #[instrument(skip(self, request), fields(offer_id = %request.offer_id, person_id = %request.person_id))]
    pub async fn issue(&self, request: IssueCouponRequest) -> Result<IssueCouponResponse> {
        let result = self.execute_issue(&request).await;

        match &result {
            Ok(response) if response.replayed => metrics::record_coupon_issue("replay"),
            Ok(_) => metrics::record_coupon_issue("success"),
            Err(e) => {
                metrics::record_coupon_issue(e.error_code());
                if !e.is_business_error() {
                    warn!(error = %e, "券发放失败");
                }
            }
        }

        result
    }

    async fn execute_issue(&self, request: &IssueCouponRequest) -> Result<IssueCouponResponse> {
        let now = self.clock.now();

        let claim = match self
            .idempotency
            .begin(operations::COUPON_ISSUE, &request.idempotency_key, request, now)
            .await?
        {
            Admission::Proceed(claim) => claim,
            Admission::Replay(response) => {
                let coupon: Coupon = serde_json::from_value(response)?;
                info!(coupon_id = %coupon.id, "幂等请求，返回已发放的券");
                return Ok(IssueCouponResponse::replayed(&coupon));
            }
        };

        let person = self
            .directory
            .get_person(request.person_id)
            .await?
            .ok_or_else(|| LoyaltyError::PersonNotFound(request.person_id.to_string()))?;

        let code = coupon_code::generate(self.code_length);
        let coupon = Coupon::issued(
            request.offer_id,
            person.id,
            coupon_code::hash(&code),
            now,
        );

        match self.coupons.issue_coupon(&coupon, &person, &claim).await? {
            Claimed::Fresh(coupon) => {
                info!(coupon_id = %coupon.id, "券发放成功");
                let qr = coupon_code::qr_payload(&code);
                Ok(IssueCouponResponse::issued(&coupon, code, qr))
            }
            Claimed::Replay(coupon) => {
                info!(coupon_id = %coupon.id, "并发重复请求，返回已发放的券");
                Ok(IssueCouponResponse::replayed(&coupon))
            }
        }
    }
}
