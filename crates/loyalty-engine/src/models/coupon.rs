//! 已发放的券
//!
//! 券码明文从不落库，只保存规范化后的 SHA-256 哈希

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CouponStatus;
use crate::error::{LoyaltyError, Result};

/// PDV 终端身份：门店 + 终端会话
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdvActor {
    pub store_id: Uuid,
    pub session_id: String,
}

impl PdvActor {
    pub fn new(store_id: Uuid, session_id: impl Into<String>) -> Self {
        Self {
            store_id,
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub offer_id: Uuid,
    pub person_id: Uuid,
    #[serde(skip_serializing, default)]
    pub code_hash: String,
    pub status: CouponStatus,
    pub issued_at: DateTime<Utc>,

    pub reserved_at: Option<DateTime<Utc>>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub reserved_by_store_id: Option<Uuid>,
    pub reserved_by_session: Option<String>,
    /// 预占时计算的折扣预览
    pub reservation_preview: Option<Decimal>,

    pub redeemed_at: Option<DateTime<Utc>>,
    pub redeemed_store_id: Option<Uuid>,
    pub redeemed_order_id: Option<Uuid>,

    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
}

/// 预占判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveDecision {
    /// 同一终端重复验券，沿用已保存的预览
    Reuse,
    /// 可以（重新）预占
    Take,
}

impl Coupon {
    pub fn issued(offer_id: Uuid, person_id: Uuid, code_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            offer_id,
            person_id,
            code_hash,
            status: CouponStatus::Issued,
            issued_at: now,
            reserved_at: None,
            reservation_expires_at: None,
            reserved_by_store_id: None,
            reserved_by_session: None,
            reservation_preview: None,
            redeemed_at: None,
            redeemed_store_id: None,
            redeemed_order_id: None,
            cancelled_at: None,
            cancelled_by: None,
            expired_at: None,
        }
    }

    pub fn is_reservation_live(&self, now: DateTime<Utc>) -> bool {
        self.status == CouponStatus::Reserved
            && self.reservation_expires_at.is_some_and(|exp| exp > now)
    }

    pub fn is_reserved_by(&self, actor: &PdvActor) -> bool {
        self.reserved_by_store_id == Some(actor.store_id)
            && self.reserved_by_session.as_deref() == Some(actor.session_id.as_str())
    }

    fn invalid(&self, operation: &'static str) -> LoyaltyError {
        LoyaltyError::InvalidState {
            status: self.status,
            operation,
        }
    }

    /// 验券时的预占判定（需在行锁内调用）
    pub fn reserve_decision(&self, actor: &PdvActor, now: DateTime<Utc>) -> Result<ReserveDecision> {
        if self.status.is_terminal() {
            return Err(self.invalid("attempt"));
        }
        if self.is_reservation_live(now) {
            if self.is_reserved_by(actor) {
                return Ok(ReserveDecision::Reuse);
            }
            return Err(LoyaltyError::AlreadyReserved(self.id));
        }
        Ok(ReserveDecision::Take)
    }

    /// 预占：ISSUED（或预占已超时的 RESERVED）→ RESERVED
    pub fn reserve(
        &mut self,
        actor: &PdvActor,
        preview: Decimal,
        now: DateTime<Utc>,
        ttl: Duration,
    ) {
        self.status = CouponStatus::Reserved;
        self.reserved_at = Some(now);
        self.reservation_expires_at = Some(now + ttl);
        self.reserved_by_store_id = Some(actor.store_id);
        self.reserved_by_session = Some(actor.session_id.clone());
        self.reservation_preview = Some(preview);
    }

    /// 核销前校验，预占超时在此处即时判断，不依赖回收任务
    pub fn check_redeemable(&self, actor: &PdvActor, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            CouponStatus::Reserved => {}
            CouponStatus::Issued => return Err(LoyaltyError::NotReserved(self.id)),
            _ => return Err(self.invalid("redeem")),
        }
        if !self.is_reservation_live(now) {
            return Err(LoyaltyError::ReservationExpired(self.id));
        }
        if !self.is_reserved_by(actor) {
            return Err(LoyaltyError::NotReservationOwner(self.id));
        }
        Ok(())
    }

    pub fn mark_redeemed(&mut self, actor: &PdvActor, order_id: Option<Uuid>, now: DateTime<Utc>) {
        self.status = CouponStatus::Redeemed;
        self.redeemed_at = Some(now);
        self.redeemed_store_id = Some(actor.store_id);
        self.redeemed_order_id = order_id;
    }

    /// 作废券，返回是否发生了状态变更
    ///
    /// 同一操作人重复作废视为重试，保持首次作废的结果
    pub fn cancel(&mut self, cancelled_by: &str, now: DateTime<Utc>) -> Result<bool> {
        if self.status == CouponStatus::Cancelled
            && self.cancelled_by.as_deref() == Some(cancelled_by)
        {
            return Ok(false);
        }
        if !self.status.can_transition_to(CouponStatus::Cancelled) {
            return Err(self.invalid("cancel"));
        }
        self.status = CouponStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancelled_by = Some(cancelled_by.to_string());
        Ok(true)
    }

    /// 预占超时回退：RESERVED → ISSUED，清空预占字段
    pub fn release_reservation(&mut self) {
        self.status = CouponStatus::Issued;
        self.clear_reservation();
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = CouponStatus::Expired;
        self.expired_at = Some(now);
        self.clear_reservation();
    }

    fn clear_reservation(&mut self) {
        self.reserved_at = None;
        self.reservation_expires_at = None;
        self.reserved_by_store_id = None;
        self.reserved_by_session = None;
        self.reservation_preview = None;
    }
}

/// 用户在某个活动下的券数量汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CouponCount {
    pub offer_id: Uuid,
    /// ISSUED + RESERVED
    pub available: i64,
    pub redeemed: i64,
}
