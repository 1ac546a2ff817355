//! 仓储层
//!
//! 封装数据访问细节，服务层只依赖 `traits` 中的接口。
//!
//! ## 设计原则
//!
//! - PostgreSQL 仓储提供连接池方法与 `*_in_tx` 关联函数，多表变更在单个事务中组合
//! - 涉及并发控制的原子单元（发放、预占、核销、积分累积、回收）由仓储实现
//! - 业务规则判断放在领域模型上，两种存储共用
//! - `MemoryStore` 实现同一组契约，用于本地运行与测试

mod coupon_repo;
mod directory_repo;
mod idempotency_repo;
mod ledger_repo;
mod memory;
mod offer_repo;
mod order_repo;
mod rule_repo;
mod traits;

pub use coupon_repo::CouponRepository;
pub use directory_repo::DirectoryRepository;
pub use idempotency_repo::IdempotencyRepository;
pub use ledger_repo::PointLedgerRepository;
pub use memory::{MemoryStore, RowLockGuard};
pub use offer_repo::OfferRepository;
pub use order_repo::OrderRepository;
pub use rule_repo::PointRuleRepository;
pub use traits::*;
