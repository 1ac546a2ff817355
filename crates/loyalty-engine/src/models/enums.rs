//! 引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;

use serde::{Deserialize, Serialize};

/// 归属范围
///
/// 积分与活动所属的层级，`Global` 仅用于积分规则和积分流水
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Global,
    Customer,
    Franchise,
    Store,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Customer => "CUSTOMER",
            Self::Franchise => "FRANCHISE",
            Self::Store => "STORE",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 券状态
///
/// ```text
/// ISSUED ──attempt──▶ RESERVED ──redeem──▶ REDEEMED
///    ▲                   │
///    └──── 预占超时 ──────┘
/// ISSUED | RESERVED ──▶ CANCELLED | EXPIRED
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponStatus {
    /// 已发放，可在 PDV 使用
    #[default]
    Issued,
    /// 已被某个 PDV 终端预占
    Reserved,
    /// 已核销（终态）
    Redeemed,
    /// 已作废（终态）
    Cancelled,
    /// 活动结束后失效（终态）
    Expired,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "ISSUED",
            Self::Reserved => "RESERVED",
            Self::Redeemed => "REDEEMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Redeemed | Self::Cancelled | Self::Expired)
    }

    /// 检查状态迁移是否合法
    pub fn can_transition_to(&self, target: CouponStatus) -> bool {
        use CouponStatus::*;
        matches!(
            (self, target),
            (Issued, Reserved)
                | (Reserved, Redeemed)
                | (Reserved, Issued)
                | (Issued | Reserved, Cancelled)
                | (Issued | Reserved, Expired)
        )
    }
}

impl fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 折扣方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    /// 固定金额
    FixedAmount,
    /// 百分比
    Percentage,
    /// 指定商品免单
    FreeItems,
}

/// 积分流水原因
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointReason {
    /// 消费累积
    #[default]
    Accrual,
    /// 券核销扣减
    CouponSettlement,
    /// 人工调整
    Adjustment,
}

/// 钱包展示单位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayAs {
    #[default]
    Points,
    Brl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_status_transitions() {
        use CouponStatus::*;

        assert!(Issued.can_transition_to(Reserved));
        assert!(Reserved.can_transition_to(Redeemed));
        assert!(Reserved.can_transition_to(Issued));
        assert!(Issued.can_transition_to(Cancelled));
        assert!(Reserved.can_transition_to(Expired));

        assert!(!Issued.can_transition_to(Redeemed));
        assert!(!Redeemed.can_transition_to(Reserved));
        assert!(!Cancelled.can_transition_to(Issued));
        assert!(!Expired.can_transition_to(Reserved));
        assert!(!Redeemed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CouponStatus::Redeemed.is_terminal());
        assert!(CouponStatus::Cancelled.is_terminal());
        assert!(CouponStatus::Expired.is_terminal());
        assert!(!CouponStatus::Issued.is_terminal());
        assert!(!CouponStatus::Reserved.is_terminal());
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&DiscountKind::FreeItems).unwrap(),
            "\"FREE_ITEMS\""
        );
        assert_eq!(
            serde_json::to_string(&PointReason::CouponSettlement).unwrap(),
            "\"COUPON_SETTLEMENT\""
        );
        let display: DisplayAs = serde_json::from_str("\"brl\"").unwrap();
        assert_eq!(display, DisplayAs::Brl);
    }
}
