//! 积分流水与积分规则

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PointReason, Scope, ScopeRef};
use crate::error::{LoyaltyError, Result};

/// 积分流水（不可变）
///
/// 余额 = 未过期流水的 `delta` 之和
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointTransaction {
    pub id: Uuid,
    pub person_id: Uuid,
    pub scope: Scope,
    pub scope_id: Option<Uuid>,
    pub delta: i64,
    pub reason: PointReason,
    pub expires_at: Option<DateTime<Utc>>,
    pub order_ref: Option<String>,
    pub store_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PointTransaction {
    pub fn scope_ref(&self) -> Result<ScopeRef> {
        ScopeRef::from_parts(self.scope, self.scope_id)
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// 追加积分流水的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPointTransaction {
    pub person_id: Uuid,
    pub scope: ScopeRef,
    pub delta: i64,
    #[serde(default)]
    pub reason: PointReason,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order_ref: Option<String>,
    #[serde(default)]
    pub store_id: Option<Uuid>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl NewPointTransaction {
    pub fn new(person_id: Uuid, scope: ScopeRef, delta: i64, reason: PointReason) -> Self {
        Self {
            person_id,
            scope,
            delta,
            reason,
            expires_at: None,
            order_ref: None,
            store_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.delta == 0 {
            return Err(LoyaltyError::Validation("积分变动不能为 0".to_string()));
        }
        Ok(())
    }

    pub fn into_transaction(self, now: DateTime<Utc>) -> PointTransaction {
        PointTransaction {
            id: Uuid::new_v4(),
            person_id: self.person_id,
            scope: self.scope.scope(),
            scope_id: self.scope.scope_id(),
            delta: self.delta,
            reason: self.reason,
            expires_at: self.expires_at,
            order_ref: self.order_ref,
            store_id: self.store_id,
            details: self.details,
            created_at: now,
        }
    }
}

/// 积分规则
///
/// 与 scope 标签对应的那个 ID 有值，其余为空；GLOBAL 全为空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointRule {
    pub id: Uuid,
    pub scope: Scope,
    pub customer_id: Option<Uuid>,
    pub franchise_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    /// 每 1 BRL 获得的积分
    pub points_per_brl: Decimal,
    pub expires_in_days: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl PointRule {
    pub fn new(
        owner: ScopeRef,
        points_per_brl: Decimal,
        expires_in_days: Option<i32>,
        now: DateTime<Utc>,
    ) -> Self {
        let (customer_id, franchise_id, store_id) = owner.rule_columns();
        Self {
            id: Uuid::new_v4(),
            scope: owner.scope(),
            customer_id,
            franchise_id,
            store_id,
            points_per_brl,
            expires_in_days,
            created_at: now,
        }
    }

    pub fn owner(&self) -> Result<ScopeRef> {
        let id = match self.scope {
            Scope::Global => None,
            Scope::Customer => self.customer_id,
            Scope::Franchise => self.franchise_id,
            Scope::Store => self.store_id,
        };
        ScopeRef::from_parts(self.scope, id)
    }

    /// 积分有效天数上限
    pub const MAX_EXPIRES_IN_DAYS: i32 = 36_500;

    /// 每 BRL 积分上限
    pub const MAX_POINTS_PER_BRL: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

    pub fn validate(&self) -> Result<()> {
        if self.points_per_brl <= Decimal::ZERO || self.points_per_brl > Self::MAX_POINTS_PER_BRL {
            return Err(LoyaltyError::Validation(format!(
                "每 BRL 积分必须在 (0, {}] 之间",
                Self::MAX_POINTS_PER_BRL
            )));
        }
        if self
            .expires_in_days
            .is_some_and(|days| days <= 0 || days > Self::MAX_EXPIRES_IN_DAYS)
        {
            return Err(LoyaltyError::Validation(format!(
                "积分有效天数必须在 1-{} 之间",
                Self::MAX_EXPIRES_IN_DAYS
            )));
        }
        Ok(())
    }

    /// `floor(total × points_per_brl)`，溢出视为输入错误
    pub fn compute_points(&self, order_total: Decimal) -> Result<i64> {
        order_total
            .checked_mul(self.points_per_brl)
            .and_then(|points| points.floor().to_i64())
            .ok_or_else(|| {
                LoyaltyError::Validation(format!("订单金额 {} 超出积分计算范围", order_total))
            })
    }

    pub fn compute_expiry(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(days) = self.expires_in_days else {
            return Ok(None);
        };
        Duration::try_days(i64::from(days))
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map(Some)
            .ok_or_else(|| LoyaltyError::Validation(format!("积分有效天数 {} 超出范围", days)))
    }

    /// 积分换算为 BRL，保留两位小数
    pub fn points_to_brl(&self, points: i64) -> Option<Decimal> {
        if self.points_per_brl <= Decimal::ZERO {
            return None;
        }
        Some(
            (Decimal::from(points) / self.points_per_brl)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

/// 某个范围下的积分余额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeBalance {
    pub scope: ScopeRef,
    pub points: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_points_floors() {
        let rule = PointRule::new(ScopeRef::Global, Decimal::new(15, 1), None, Utc::now());
        // 33.33 * 1.5 = 49.995
        assert_eq!(rule.compute_points(Decimal::new(3333, 2)).unwrap(), 49);
        assert_eq!(rule.compute_points(Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_compute_points_overflow_is_validation_error() {
        let rule = PointRule::new(ScopeRef::Global, Decimal::TWO, None, Utc::now());
        let err = rule.compute_points(Decimal::MAX).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        // 乘积未溢出 Decimal 但超出 i64
        let rule = PointRule::new(ScopeRef::Global, Decimal::ONE, None, Utc::now());
        assert!(rule.compute_points(Decimal::from(i64::MAX) * Decimal::TEN).is_err());
    }

    #[test]
    fn test_compute_expiry() {
        let now = Utc::now();
        let store = ScopeRef::Store(Uuid::new_v4());
        let rule = PointRule::new(store, Decimal::TWO, Some(30), now);
        assert_eq!(rule.compute_expiry(now).unwrap(), Some(now + Duration::days(30)));

        let rule = PointRule::new(store, Decimal::TWO, None, now);
        assert_eq!(rule.compute_expiry(now).unwrap(), None);
    }

    #[test]
    fn test_compute_expiry_out_of_range() {
        let rule = PointRule::new(ScopeRef::Global, Decimal::ONE, Some(i32::MAX), Utc::now());
        let err = rule.compute_expiry(Utc::now()).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_rule_validate_bounds() {
        let now = Utc::now();
        let ok = |rate: Decimal, days: Option<i32>| {
            PointRule::new(ScopeRef::Global, rate, days, now).validate().is_ok()
        };
        assert!(ok(Decimal::ONE, None));
        assert!(ok(Decimal::ONE, Some(PointRule::MAX_EXPIRES_IN_DAYS)));
        assert!(ok(PointRule::MAX_POINTS_PER_BRL, Some(1)));
        assert!(!ok(Decimal::ZERO, None));
        assert!(!ok(Decimal::ONE, Some(0)));
        assert!(!ok(Decimal::ONE, Some(PointRule::MAX_EXPIRES_IN_DAYS + 1)));
        assert!(!ok(Decimal::ONE, Some(i32::MAX)));
        assert!(!ok(PointRule::MAX_POINTS_PER_BRL + Decimal::ONE, None));
    }

    #[test]
    fn test_rule_owner_round_trip() {
        let franchise = ScopeRef::Franchise(Uuid::new_v4());
        let rule = PointRule::new(franchise, Decimal::ONE, None, Utc::now());
        assert_eq!(rule.owner().unwrap(), franchise);
        assert!(rule.customer_id.is_none());
        assert!(rule.store_id.is_none());
    }

    #[test]
    fn test_points_to_brl() {
        let rule = PointRule::new(ScopeRef::Global, Decimal::new(3, 0), None, Utc::now());
        assert_eq!(rule.points_to_brl(100), Some(Decimal::new(3333, 2)));
    }

    #[test]
    fn test_zero_delta_rejected() {
        let tx = NewPointTransaction::new(
            Uuid::new_v4(),
            ScopeRef::Global,
            0,
            PointReason::Adjustment,
        );
        assert!(tx.validate().is_err());
    }
}
