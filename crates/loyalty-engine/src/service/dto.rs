//! 服务层数据传输对象
//!
//! 请求体参与幂等指纹计算，幂等键本身不计入指纹

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Coupon, CouponCount, CouponStatus, DisplayAs, OrderContext, ScopeRef};

/// 券发放请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponRequest {
    pub offer_id: Uuid,
    pub person_id: Uuid,
    #[serde(skip_serializing, default)]
    pub idempotency_key: String,
}

/// 券发放响应
///
/// 券码明文只在首次发放时返回，幂等重放时 `code`/`qr` 为空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponResponse {
    pub coupon_id: Uuid,
    pub offer_id: Uuid,
    pub person_id: Uuid,
    pub code: Option<String>,
    pub qr: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub replayed: bool,
}

impl IssueCouponResponse {
    pub fn issued(coupon: &Coupon, code: String, qr: String) -> Self {
        Self {
            coupon_id: coupon.id,
            offer_id: coupon.offer_id,
            person_id: coupon.person_id,
            code: Some(code),
            qr: Some(qr),
            issued_at: coupon.issued_at,
            replayed: false,
        }
    }

    pub fn replayed(coupon: &Coupon) -> Self {
        Self {
            coupon_id: coupon.id,
            offer_id: coupon.offer_id,
            person_id: coupon.person_id,
            code: None,
            qr: None,
            issued_at: coupon.issued_at,
            replayed: true,
        }
    }
}

/// PDV 验券请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRequest {
    /// 券码或二维码内容
    pub code: String,
    pub store_id: Uuid,
    pub session_id: String,
    pub order: OrderContext,
}

/// 验券不可用的原因码
pub const NOT_REDEEMABLE: &str = "NOT_REDEEMABLE";

/// PDV 验券响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub coupon_id: Uuid,
    pub redeemable: bool,
    pub discount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_expires_at: Option<DateTime<Utc>>,
}

impl AttemptResponse {
    pub fn not_redeemable(coupon_id: Uuid) -> Self {
        Self {
            coupon_id,
            redeemable: false,
            discount: Decimal::ZERO,
            reason: Some(NOT_REDEEMABLE.to_string()),
            reservation_expires_at: None,
        }
    }

    pub fn reserved(coupon: &Coupon, fallback_discount: Decimal) -> Self {
        Self {
            coupon_id: coupon.id,
            redeemable: true,
            discount: coupon.reservation_preview.unwrap_or(fallback_discount),
            reason: None,
            reservation_expires_at: coupon.reservation_expires_at,
        }
    }
}

/// PDV 核销请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub coupon_id: Uuid,
    #[serde(skip_serializing, default)]
    pub idempotency_key: String,
    pub store_id: Uuid,
    pub session_id: String,
    #[serde(default)]
    pub order: Option<OrderContext>,
}

/// 核销响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub coupon_id: Uuid,
    pub status: CouponStatus,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub order_id: Option<Uuid>,
    pub points_charged: i64,
    pub replayed: bool,
}

/// 积分累积请求，`person_id` 与 `national_id` 二选一
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnPointsRequest {
    #[serde(default)]
    pub person_id: Option<Uuid>,
    #[serde(default)]
    pub national_id: Option<String>,
    pub store_id: Uuid,
    pub order_total: Decimal,
    #[serde(skip_serializing, default)]
    pub idempotency_key: String,
    #[serde(default)]
    pub order: Option<OrderContext>,
}

/// 积分累积响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnPointsResponse {
    pub transaction_id: Uuid,
    pub person_id: Uuid,
    pub scope: ScopeRef,
    pub points_earned: i64,
    pub balance: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub replayed: bool,
}

/// 钱包中某个范围的余额
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    #[serde(flatten)]
    pub scope: ScopeRef,
    pub points: i64,
    /// 按该范围适用规则换算的金额；没有适用规则时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brl: Option<Decimal>,
}

/// 钱包视图
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub person_id: Uuid,
    pub display_as: DisplayAs,
    pub balances: Vec<WalletBalance>,
    pub coupons: Vec<CouponCount>,
}
