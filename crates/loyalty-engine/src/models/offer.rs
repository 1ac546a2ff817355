//! 券类型与券活动
//!
//! 券类型描述折扣机制；券活动是归属于某个主体的有限库存

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::{DiscountKind, OrderContext, Person, Scope, ScopeRef};
use crate::error::{LoyaltyError, Result};
use crate::segment::SegmentPredicate;

/// 券类型
///
/// 三种折扣方式各自只使用一个折扣字段：
/// - `FIXED_AMOUNT` → `discount_amount`
/// - `PERCENTAGE` → `discount_percentage`，取值 (0, 100]
/// - `FREE_ITEMS` → 非空 `valid_skus`
///
/// 其他类型携带 `valid_skus` 时视为指定商品券，订单中必须包含其中一个 SKU。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CouponType {
    pub id: Uuid,
    pub name: String,
    pub kind: DiscountKind,
    pub discount_amount: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    pub valid_skus: Vec<String>,
    pub min_order_total: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl CouponType {
    /// 校验折扣字段与类型标签一致
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoyaltyError::Validation("券类型名称不能为空".to_string()));
        }

        let ok = match self.kind {
            DiscountKind::FixedAmount => {
                self.discount_percentage.is_none()
                    && self.discount_amount.is_some_and(|a| a > Decimal::ZERO)
            }
            DiscountKind::Percentage => {
                self.discount_amount.is_none()
                    && self
                        .discount_percentage
                        .is_some_and(|p| p > Decimal::ZERO && p <= Decimal::ONE_HUNDRED)
            }
            DiscountKind::FreeItems => {
                self.discount_amount.is_none()
                    && self.discount_percentage.is_none()
                    && !self.valid_skus.is_empty()
            }
        };

        if !ok {
            return Err(LoyaltyError::Validation(format!(
                "券类型 {:?} 的折扣字段不匹配",
                self.kind
            )));
        }

        if self.min_order_total.is_some_and(|m| m < Decimal::ZERO) {
            return Err(LoyaltyError::Validation("最低消费不能为负数".to_string()));
        }

        Ok(())
    }

    pub fn is_item_specific(&self) -> bool {
        !self.valid_skus.is_empty()
    }

    /// 订单是否满足使用条件（最低消费、指定商品）
    pub fn applies_to(&self, order: &OrderContext) -> bool {
        if self.min_order_total.is_some_and(|min| order.total < min) {
            return false;
        }
        if self.is_item_specific() && !order.has_any_sku(&self.valid_skus) {
            return false;
        }
        true
    }

    /// 计算折扣预览金额，金额运算溢出视为输入错误
    pub fn preview_discount(&self, order: &OrderContext) -> Result<Decimal> {
        let overflow = || LoyaltyError::Validation("订单金额超出折扣计算范围".to_string());
        let total = order.total.max(Decimal::ZERO);
        let discount = match self.kind {
            DiscountKind::FixedAmount => self.discount_amount.unwrap_or_default().min(total),
            DiscountKind::Percentage => total
                .checked_mul(self.discount_percentage.unwrap_or_default())
                .and_then(|amount| amount.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(overflow)?
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            DiscountKind::FreeItems => {
                let free = order
                    .items
                    .iter()
                    .filter(|item| {
                        self.valid_skus
                            .iter()
                            .any(|s| s.eq_ignore_ascii_case(&item.sku))
                    })
                    .try_fold(Decimal::ZERO, |acc, item| {
                        acc.checked_add(item.unit_price.unwrap_or_default())
                    })
                    .ok_or_else(overflow)?;
                free.min(total)
            }
        };
        Ok(discount.max(Decimal::ZERO))
    }
}

/// 券活动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CouponOffer {
    pub id: Uuid,
    pub name: String,
    pub coupon_type_id: Uuid,
    pub scope: Scope,
    pub scope_id: Uuid,
    pub initial_quantity: i32,
    pub current_quantity: i32,
    /// 每人限领，0 表示不限
    pub max_per_customer: i32,
    pub is_active: bool,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub segment: Option<Json<SegmentPredicate>>,
    /// 核销时需要扣减的积分，0 表示免费
    pub points_cost: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponOffer {
    pub fn scope_ref(&self) -> ScopeRef {
        match self.scope {
            Scope::Customer => ScopeRef::Customer(self.scope_id),
            Scope::Franchise => ScopeRef::Franchise(self.scope_id),
            Scope::Store => ScopeRef::Store(self.scope_id),
            Scope::Global => ScopeRef::Global,
        }
    }

    pub fn issued_count(&self) -> i32 {
        self.initial_quantity - self.current_quantity
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_at.is_none_or(|start| now >= start) && self.end_at.is_none_or(|end| now <= end)
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.end_at.is_some_and(|end| end < now)
    }

    /// 发放前校验，按固定顺序快速失败：
    /// 启用状态 → 有效期 → 人群 → 库存 → 每人限领
    ///
    /// `issued_to_person` 为该用户在本活动下未作废的券数量
    pub fn check_slot(
        &self,
        person: &Person,
        issued_to_person: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_active {
            return Err(LoyaltyError::OfferInactive(self.id));
        }
        if !self.is_within_window(now) {
            return Err(LoyaltyError::OutsideWindow(self.id));
        }
        if let Some(Json(segment)) = &self.segment {
            if !segment.matches(person, now) {
                return Err(LoyaltyError::SegmentMismatch(self.id));
            }
        }
        if self.current_quantity <= 0 {
            return Err(LoyaltyError::OutOfStock(self.id));
        }
        if self.max_per_customer > 0 && issued_to_person >= i64::from(self.max_per_customer) {
            return Err(LoyaltyError::QuotaExceeded {
                offer_id: self.id,
                limit: self.max_per_customer,
            });
        }
        Ok(())
    }

    /// 调整总量后的剩余库存
    pub fn adjusted_current(&self, new_initial: i32) -> Result<i32> {
        let issued = self.issued_count();
        if new_initial < issued {
            return Err(LoyaltyError::QuantityBelowIssued {
                requested: new_initial,
                issued,
            });
        }
        Ok(new_initial - issued)
    }
}

/// 新建活动参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOffer {
    pub name: String,
    pub coupon_type_id: Uuid,
    pub owner: ScopeRef,
    pub quantity: i32,
    #[serde(default)]
    pub max_per_customer: i32,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub segment: Option<SegmentPredicate>,
    #[serde(default)]
    pub points_cost: i64,
}

impl NewOffer {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoyaltyError::Validation("活动名称不能为空".to_string()));
        }
        if matches!(self.owner, ScopeRef::Global) {
            return Err(LoyaltyError::Validation(
                "活动必须归属于客户、加盟商或门店".to_string(),
            ));
        }
        if self.quantity < 0 || self.max_per_customer < 0 || self.points_cost < 0 {
            return Err(LoyaltyError::Validation(
                "数量、限领与积分消耗不能为负数".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if start > end {
                return Err(LoyaltyError::Validation(
                    "活动开始时间晚于结束时间".to_string(),
                ));
            }
        }
        if let Some(segment) = &self.segment {
            segment.validate().map_err(LoyaltyError::Validation)?;
        }
        Ok(())
    }

    pub fn into_offer(self, now: DateTime<Utc>) -> CouponOffer {
        CouponOffer {
            id: Uuid::new_v4(),
            name: self.name,
            coupon_type_id: self.coupon_type_id,
            scope: self.owner.scope(),
            scope_id: self.owner.scope_id().unwrap_or_default(),
            initial_quantity: self.quantity,
            current_quantity: self.quantity,
            max_per_customer: self.max_per_customer,
            is_active: true,
            start_at: self.start_at,
            end_at: self.end_at,
            segment: self.segment.map(Json),
            points_cost: self.points_cost,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{SegmentAttribute, SegmentCondition, SegmentOp};
    use chrono::Duration;

    fn coupon_type(kind: DiscountKind) -> CouponType {
        CouponType {
            id: Uuid::new_v4(),
            name: "teste".to_string(),
            kind,
            discount_amount: None,
            discount_percentage: None,
            valid_skus: vec![],
            min_order_total: None,
            created_at: Utc::now(),
        }
    }

    fn offer(quantity: i32, max_per_customer: i32) -> CouponOffer {
        NewOffer {
            name: "Café grátis".to_string(),
            coupon_type_id: Uuid::new_v4(),
            owner: ScopeRef::Store(Uuid::new_v4()),
            quantity,
            max_per_customer,
            start_at: None,
            end_at: None,
            segment: None,
            points_cost: 0,
        }
        .into_offer(Utc::now())
    }

    #[test]
    fn test_coupon_type_discount_field_invariant() {
        let mut fixed = coupon_type(DiscountKind::FixedAmount);
        assert!(fixed.validate().is_err());
        fixed.discount_amount = Some(Decimal::new(10, 0));
        assert!(fixed.validate().is_ok());
        fixed.discount_percentage = Some(Decimal::new(5, 0));
        assert!(fixed.validate().is_err());

        let mut pct = coupon_type(DiscountKind::Percentage);
        pct.discount_percentage = Some(Decimal::new(101, 0));
        assert!(pct.validate().is_err());
        pct.discount_percentage = Some(Decimal::new(15, 0));
        assert!(pct.validate().is_ok());

        let mut free = coupon_type(DiscountKind::FreeItems);
        assert!(free.validate().is_err());
        free.valid_skus = vec!["CAFE".to_string()];
        assert!(free.validate().is_ok());
    }

    #[test]
    fn test_preview_discount() {
        let order = OrderContext::new(Decimal::new(3333, 2))
            .with_item("CAFE", Some(Decimal::new(650, 2)))
            .with_item("PAO", Some(Decimal::new(400, 2)));

        let mut fixed = coupon_type(DiscountKind::FixedAmount);
        fixed.discount_amount = Some(Decimal::new(50, 0));
        assert_eq!(fixed.preview_discount(&order).unwrap(), Decimal::new(3333, 2));

        let mut pct = coupon_type(DiscountKind::Percentage);
        pct.discount_percentage = Some(Decimal::new(15, 0));
        // 33.33 * 15% = 4.9995 → 5.00
        assert_eq!(pct.preview_discount(&order).unwrap(), Decimal::new(500, 2));

        let mut free = coupon_type(DiscountKind::FreeItems);
        free.valid_skus = vec!["cafe".to_string()];
        assert_eq!(free.preview_discount(&order).unwrap(), Decimal::new(650, 2));
    }

    #[test]
    fn test_preview_discount_overflow() {
        let mut pct = coupon_type(DiscountKind::Percentage);
        pct.discount_percentage = Some(Decimal::new(50, 0));
        let err = pct
            .preview_discount(&OrderContext::new(Decimal::MAX))
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let mut free = coupon_type(DiscountKind::FreeItems);
        free.valid_skus = vec!["A1".to_string()];
        let order = OrderContext::new(Decimal::new(10, 0))
            .with_item("A1", Some(Decimal::MAX))
            .with_item("A1", Some(Decimal::MAX));
        assert!(free.preview_discount(&order).is_err());
    }

    #[test]
    fn test_applies_to() {
        let mut ct = coupon_type(DiscountKind::FixedAmount);
        ct.discount_amount = Some(Decimal::new(5, 0));
        ct.min_order_total = Some(Decimal::new(20, 0));
        assert!(!ct.applies_to(&OrderContext::new(Decimal::new(1999, 2))));
        assert!(ct.applies_to(&OrderContext::new(Decimal::new(20, 0))));

        ct.valid_skus = vec!["SKU-1".to_string()];
        assert!(!ct.applies_to(&OrderContext::new(Decimal::new(50, 0))));
        assert!(ct.applies_to(&OrderContext::new(Decimal::new(50, 0)).with_item("sku-1", None)));
    }

    #[test]
    fn test_check_slot_order() {
        let person = Person::new("11122233344", "Carla");
        let now = Utc::now();

        let mut o = offer(0, 1);
        o.is_active = false;
        o.end_at = Some(now - Duration::days(1));
        // 停用优先于其他错误
        assert!(matches!(
            o.check_slot(&person, 5, now),
            Err(LoyaltyError::OfferInactive(_))
        ));

        o.is_active = true;
        assert!(matches!(
            o.check_slot(&person, 5, now),
            Err(LoyaltyError::OutsideWindow(_))
        ));

        o.end_at = None;
        o.segment = Some(Json(SegmentPredicate {
            all: vec![SegmentCondition {
                attribute: SegmentAttribute::Tags,
                op: SegmentOp::Contains,
                value: serde_json::json!("vip"),
            }],
            any: vec![],
        }));
        assert!(matches!(
            o.check_slot(&person, 5, now),
            Err(LoyaltyError::SegmentMismatch(_))
        ));

        o.segment = None;
        assert!(matches!(
            o.check_slot(&person, 5, now),
            Err(LoyaltyError::OutOfStock(_))
        ));

        o.current_quantity = 1;
        o.initial_quantity = 1;
        assert!(matches!(
            o.check_slot(&person, 1, now),
            Err(LoyaltyError::QuotaExceeded { limit: 1, .. })
        ));
        assert!(o.check_slot(&person, 0, now).is_ok());
    }

    #[test]
    fn test_unlimited_quota() {
        let o = offer(10, 0);
        let person = Person::new("11122233344", "Carla");
        assert!(o.check_slot(&person, 1_000, Utc::now()).is_ok());
    }

    #[test]
    fn test_adjusted_current() {
        let mut o = offer(100, 0);
        o.current_quantity = 60;
        assert_eq!(o.adjusted_current(40).unwrap(), 0);
        assert_eq!(o.adjusted_current(150).unwrap(), 110);
        assert!(matches!(
            o.adjusted_current(39),
            Err(LoyaltyError::QuantityBelowIssued {
                requested: 39,
                issued: 40
            })
        ));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = Utc::now();
        let mut o = offer(1, 0);
        o.start_at = Some(now);
        o.end_at = Some(now);
        assert!(o.is_within_window(now));
        assert!(!o.has_elapsed(now));
        assert!(o.has_elapsed(now + Duration::seconds(1)));
    }

    #[test]
    fn test_new_offer_validation() {
        let mut new_offer = NewOffer {
            name: "x".to_string(),
            coupon_type_id: Uuid::new_v4(),
            owner: ScopeRef::Global,
            quantity: 1,
            max_per_customer: 0,
            start_at: None,
            end_at: None,
            segment: None,
            points_cost: 0,
        };
        assert!(new_offer.validate().is_err());

        new_offer.owner = ScopeRef::Franchise(Uuid::new_v4());
        assert!(new_offer.validate().is_ok());

        new_offer.start_at = Some(Utc::now());
        new_offer.end_at = Some(Utc::now() - Duration::days(1));
        assert!(new_offer.validate().is_err());
    }
}
