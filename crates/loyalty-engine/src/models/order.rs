//! 订单上下文
//!
//! PDV 提交的订单信息，用于券适用性校验、折扣预览以及核销/积分时的订单落库

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LoyaltyError, Result};

/// 单笔订单金额上限（BRL）
pub const MAX_ORDER_TOTAL: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// 订单金额必须落在 [0, MAX_ORDER_TOTAL]
pub fn check_order_total(total: Decimal) -> Result<()> {
    if total < Decimal::ZERO {
        return Err(LoyaltyError::Validation("订单金额不能为负数".to_string()));
    }
    if total > MAX_ORDER_TOTAL {
        return Err(LoyaltyError::Validation(format!(
            "订单金额不能超过 {}",
            MAX_ORDER_TOTAL
        )));
    }
    Ok(())
}

/// 订单行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub sku: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

fn default_quantity() -> i32 {
    1
}

/// 订单上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderContext {
    /// PDV 侧的订单号
    #[serde(default)]
    pub external_id: Option<String>,
    pub total: Decimal,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl OrderContext {
    pub fn new(total: Decimal) -> Self {
        Self {
            external_id: None,
            total,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, sku: impl Into<String>, unit_price: Option<Decimal>) -> Self {
        self.items.push(OrderItem {
            sku: sku.into(),
            quantity: 1,
            unit_price,
        });
        self
    }

    /// 订单总额与各行单价都受金额上限约束
    pub fn validate(&self) -> Result<()> {
        check_order_total(self.total)?;
        for item in &self.items {
            if let Some(price) = item.unit_price {
                check_order_total(price)?;
            }
        }
        Ok(())
    }

    pub fn has_any_sku(&self, skus: &[String]) -> bool {
        self.items
            .iter()
            .any(|item| skus.iter().any(|s| s.eq_ignore_ascii_case(&item.sku)))
    }
}

/// 已落库的订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub person_id: Uuid,
    pub store_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub total: Decimal,
    pub items: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn from_context(
        context: &OrderContext,
        person_id: Uuid,
        store_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            person_id,
            store_id,
            external_id: context.external_id.clone(),
            total: context.total,
            items: serde_json::to_value(&context.items)?,
            created_at: now,
        })
    }
}

/// Outbox 事件主题
pub mod topics {
    pub const COUPON_ISSUED: &str = "coupon.issued";
    pub const COUPON_REDEEMED: &str = "coupon.redeemed";
}

/// Outbox 事件
///
/// 与业务变更在同一事务中写入，由下游投递进程消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn pending(topic: &str, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            payload,
            status: "PENDING".to_string(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_any_sku_is_case_insensitive() {
        let order = OrderContext::new(Decimal::new(3000, 2))
            .with_item("sku-cafe", Some(Decimal::new(850, 2)));
        assert!(order.has_any_sku(&["SKU-CAFE".to_string()]));
        assert!(!order.has_any_sku(&["SKU-PAO".to_string()]));
    }

    #[test]
    fn test_validate_bounds_total_and_prices() {
        assert!(OrderContext::new(Decimal::new(3000, 2)).validate().is_ok());
        assert!(OrderContext::new(MAX_ORDER_TOTAL).validate().is_ok());
        assert!(OrderContext::new(Decimal::new(-1, 2)).validate().is_err());
        assert!(OrderContext::new(Decimal::MAX).validate().is_err());

        let order = OrderContext::new(Decimal::new(3000, 2)).with_item("A1", Some(Decimal::MAX));
        let err = order.validate().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_order_item_defaults() {
        let item: OrderItem = serde_json::from_value(serde_json::json!({"sku": "A1"})).unwrap();
        assert_eq!(item.quantity, 1);
        assert!(item.unit_price.is_none());
    }
}
