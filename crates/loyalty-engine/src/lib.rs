//! 优惠券库存与核销引擎
//!
//! 多租户会员体系（客户 → 加盟商 → 门店）下的券发放、PDV 预占/核销以及积分账本。
//!
//! ## 核心功能
//!
//! - **库存管理**：原子扣减库存，校验有效期、人群、每人限领
//! - **券发放**：生成高熵券码，只保存哈希
//! - **核销状态机**：PDV 验券预占 → 核销，超时自动回退
//! - **幂等层**：所有写操作支持安全重试
//! - **积分账本**：仅追加的积分流水，按门店 → 加盟商 → 客户 → 全局解析积分规则
//! - **回收任务**：定期回退过期预占、使过期活动的券失效
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `service`: 业务服务层
//! - `worker`: 后台任务

pub mod clock;
pub mod coupon_code;
pub mod error;
pub mod models;
pub mod repository;
pub mod segment;
pub mod service;
pub mod worker;

/// 内嵌的数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorClass, LoyaltyError, Result};
pub use models::*;
pub use repository::{
    CouponRepository, DirectoryRepository, IdempotencyRepository, MemoryStore, OfferRepository,
    PointLedgerRepository, PointRuleRepository,
};
pub use service::{
    IdempotencyLayer, InventoryManager, IssuanceService, LedgerService, RedemptionService,
    RuleResolver, dto,
};
pub use worker::{ReservationReaper, SweepReport};
