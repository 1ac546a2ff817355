//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，PostgreSQL 与内存存储实现同一组契约，支持 mock 测试。
//! 涉及多表变更的方法各自构成一个原子单元（事务或整体加锁）。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Claimed, Coupon, CouponCount, CouponOffer, CouponType, IdempotencyClaim, IdempotencyRecord,
    Order, PdvActor, Person, PointRule, PointTransaction, ScopeBalance, ScopeRef, StoreRef,
};

/// 核销命令
#[derive(Debug, Clone)]
pub struct RedeemCommand {
    pub coupon_id: Uuid,
    pub actor: PdvActor,
    /// 调用方提供订单时一并落库
    pub order: Option<Order>,
    pub now: DateTime<Utc>,
}

/// 核销结果（同时作为幂等重放的响应体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemOutcome {
    pub coupon: Coupon,
    pub order_id: Option<Uuid>,
    pub points_charged: i64,
    pub settlement_transaction_id: Option<Uuid>,
}

/// 积分累积命令
#[derive(Debug, Clone)]
pub struct AccrualCommand {
    pub transaction: PointTransaction,
    pub order: Option<Order>,
}

/// 积分累积结果（同时作为幂等重放的响应体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualOutcome {
    pub transaction_id: Uuid,
    pub scope: ScopeRef,
    pub points_earned: i64,
    pub balance: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub order_id: Option<Uuid>,
}

/// 券类型与活动仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OfferRepositoryTrait: Send + Sync {
    async fn create_coupon_type(&self, coupon_type: &CouponType) -> Result<()>;
    async fn get_coupon_type(&self, id: Uuid) -> Result<Option<CouponType>>;

    async fn create_offer(&self, offer: &CouponOffer) -> Result<()>;
    async fn get_offer(&self, id: Uuid) -> Result<Option<CouponOffer>>;

    /// 锁定活动行后按已发放数量重算剩余库存
    async fn adjust_quantity(
        &self,
        offer_id: Uuid,
        new_initial: i32,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer>;

    async fn set_active(
        &self,
        offer_id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer>;
}

/// 券仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponRepositoryTrait: Send + Sync {
    async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>>;
    async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<Coupon>>;
    async fn list_by_person(&self, person_id: Uuid) -> Result<Vec<Coupon>>;
    async fn count_by_offer(&self, person_id: Uuid) -> Result<Vec<CouponCount>>;

    /// 原子单元：幂等声明 → 锁定活动 → 发放校验 → 扣减库存 → 写入券 → outbox
    async fn issue_coupon(
        &self,
        coupon: &Coupon,
        person: &Person,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<Coupon>>;

    /// 非阻塞行锁预占，行已被锁定时立即返回 `ALREADY_RESERVED`
    async fn try_reserve(
        &self,
        coupon_id: Uuid,
        actor: &PdvActor,
        preview: Decimal,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Coupon>;

    /// 原子单元：幂等声明 → 锁定券 → 校验预占 → 积分结算 → 订单 → 状态变更 → outbox
    async fn redeem(
        &self,
        command: &RedeemCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<RedeemOutcome>>;

    async fn cancel(&self, coupon_id: Uuid, cancelled_by: &str, now: DateTime<Utc>)
    -> Result<Coupon>;

    /// 回退超时预占（SKIP LOCKED），返回处理的券 ID
    async fn release_stale_reservations(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<Uuid>>;

    /// 活动结束后使未使用的券失效（SKIP LOCKED），返回处理的券 ID
    async fn expire_elapsed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>>;
}

/// 积分账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointLedgerRepositoryTrait: Send + Sync {
    async fn append(&self, transaction: &PointTransaction) -> Result<()>;
    async fn balance(&self, person_id: Uuid, scope: ScopeRef, now: DateTime<Utc>) -> Result<i64>;
    async fn balances(&self, person_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ScopeBalance>>;
    async fn list_by_person(&self, person_id: Uuid, limit: i64) -> Result<Vec<PointTransaction>>;

    /// 原子单元：幂等声明 → 写入累积流水 → 订单 → 计算余额
    async fn accrue(
        &self,
        command: &AccrualCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<AccrualOutcome>>;
}

/// 积分规则仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointRuleRepositoryTrait: Send + Sync {
    /// 精确匹配该范围的规则
    async fn find_rule(&self, scope: ScopeRef) -> Result<Option<PointRule>>;
    async fn create_rule(&self, rule: &PointRule) -> Result<()>;
}

/// 目录（用户与门店层级）只读接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryRepositoryTrait: Send + Sync {
    async fn get_person(&self, id: Uuid) -> Result<Option<Person>>;
    async fn get_person_by_national_id(&self, national_id: &str) -> Result<Option<Person>>;
    async fn get_store(&self, store_id: Uuid) -> Result<Option<StoreRef>>;
    /// 加盟商所属客户
    async fn get_franchise_customer(&self, franchise_id: Uuid) -> Result<Option<Uuid>>;
    async fn scope_exists(&self, scope: ScopeRef) -> Result<bool>;
}

/// 幂等记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyRepositoryTrait: Send + Sync {
    async fn find(&self, operation: &str, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn purge_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64>;
}
