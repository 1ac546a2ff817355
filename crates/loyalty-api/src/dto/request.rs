//! 请求 DTO 定义
//!
//! 所有 REST API 的请求参数和请求体结构。幂等键既可放在请求体 `idempotencyKey`，
//! 也可放在 `Idempotency-Key` 请求头。

use chrono::{DateTime, Utc};
use loyalty_engine::segment::SegmentPredicate;
use loyalty_engine::{
    CouponType, DiscountKind, DisplayAs, MAX_ORDER_TOTAL, NewOffer, OrderContext, PointRule,
    ScopeRef,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// 订单金额须在 [0, MAX_ORDER_TOTAL]
fn validate_order_total(total: &Decimal) -> Result<(), ValidationError> {
    if *total < Decimal::ZERO || *total > MAX_ORDER_TOTAL {
        let mut err = ValidationError::new("range");
        err.message = Some(format!("订单金额必须在 0-{} 之间", MAX_ORDER_TOTAL).into());
        return Err(err);
    }
    Ok(())
}

/// 发券请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponBody {
    pub offer_id: Uuid,
    pub person_id: Uuid,
    #[validate(length(min = 1, max = 128, message = "幂等键长度必须在1-128个字符之间"))]
    pub idempotency_key: Option<String>,
}

/// 作废券请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelCouponBody {
    #[validate(length(min = 1, max = 64, message = "操作人长度必须在1-64个字符之间"))]
    pub cancelled_by: String,
}

/// PDV 验券请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AttemptBody {
    #[validate(length(min = 1, max = 256, message = "券码不能为空"))]
    pub code: String,
    pub store_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "终端会话长度必须在1-64个字符之间"))]
    pub session_id: String,
    pub order: OrderContext,
}

/// PDV 核销请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemBody {
    pub coupon_id: Uuid,
    #[validate(length(min = 1, max = 128, message = "幂等键长度必须在1-128个字符之间"))]
    pub idempotency_key: Option<String>,
    pub store_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "终端会话长度必须在1-64个字符之间"))]
    pub session_id: String,
    pub order: Option<OrderContext>,
}

/// 积分累积请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EarnPointsBody {
    pub person_id: Option<Uuid>,
    #[validate(length(min = 11, max = 14, message = "CPF 格式不正确"))]
    pub national_id: Option<String>,
    pub store_id: Uuid,
    #[validate(custom(function = "validate_order_total"))]
    pub order_total: Decimal,
    #[validate(length(min = 1, max = 128, message = "幂等键长度必须在1-128个字符之间"))]
    pub idempotency_key: Option<String>,
    pub order: Option<OrderContext>,
}

/// 钱包查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletQuery {
    pub display_as: Option<DisplayAs>,
}

/// 积分流水查询参数
#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub limit: Option<i64>,
}

/// 创建券类型请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponTypeRequest {
    #[validate(length(min = 1, max = 100, message = "券类型名称长度必须在1-100个字符之间"))]
    pub name: String,
    pub kind: DiscountKind,
    pub discount_amount: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub valid_skus: Vec<String>,
    pub min_order_total: Option<Decimal>,
}

impl CreateCouponTypeRequest {
    pub fn into_coupon_type(self, now: DateTime<Utc>) -> CouponType {
        CouponType {
            id: Uuid::new_v4(),
            name: self.name,
            kind: self.kind,
            discount_amount: self.discount_amount,
            discount_percentage: self.discount_percentage,
            valid_skus: self.valid_skus,
            min_order_total: self.min_order_total,
            created_at: now,
        }
    }
}

/// 创建活动请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOfferRequest {
    #[validate(length(min = 1, max = 200, message = "活动名称长度必须在1-200个字符之间"))]
    pub name: String,
    pub coupon_type_id: Uuid,
    pub owner: ScopeRef,
    #[validate(range(min = 0, message = "活动总量不能为负数"))]
    pub quantity: i32,
    #[serde(default)]
    #[validate(range(min = 0, message = "每人限领不能为负数"))]
    pub max_per_customer: i32,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub segment: Option<SegmentPredicate>,
    #[serde(default)]
    #[validate(range(min = 0, message = "积分消耗不能为负数"))]
    pub points_cost: i64,
}

impl From<CreateOfferRequest> for NewOffer {
    fn from(req: CreateOfferRequest) -> Self {
        Self {
            name: req.name,
            coupon_type_id: req.coupon_type_id,
            owner: req.owner,
            quantity: req.quantity,
            max_per_customer: req.max_per_customer,
            start_at: req.start_at,
            end_at: req.end_at,
            segment: req.segment,
            points_cost: req.points_cost,
        }
    }
}

/// 调整活动总量请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustQuantityRequest {
    #[validate(range(min = 0, message = "活动总量不能为负数"))]
    pub initial_quantity: i32,
}

/// 启用/停用活动请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOfferStatusRequest {
    pub is_active: bool,
}

/// 创建积分规则请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePointRuleRequest {
    pub owner: ScopeRef,
    pub points_per_brl: Decimal,
    #[validate(range(min = 1, max = 36500, message = "积分有效天数必须在1-36500之间"))]
    pub expires_in_days: Option<i32>,
}

impl CreatePointRuleRequest {
    pub fn into_rule(self, now: DateTime<Utc>) -> PointRule {
        PointRule::new(self.owner, self.points_per_brl, self.expires_in_days, now)
    }
}
