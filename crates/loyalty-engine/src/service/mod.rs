//! 服务层
//!
//! 编排幂等、校验、时钟与指标，原子单元委托给仓储实现。
//!
//! ## 模块结构
//!
//! - `dto`: 请求与响应对象
//! - `idempotency`: 幂等层
//! - `inventory`: 券类型与活动管理
//! - `issuance_service`: 券发放
//! - `redemption_service`: PDV 验券、核销、作废
//! - `ledger_service`: 积分账本与钱包
//! - `rule_resolver`: 积分规则解析

pub mod dto;
pub mod idempotency;
pub mod inventory;
pub mod issuance_service;
pub mod ledger_service;
pub mod redemption_service;
pub mod rule_resolver;

pub use idempotency::{Admission, IdempotencyCheck, IdempotencyLayer};
pub use inventory::InventoryManager;
pub use issuance_service::IssuanceService;
pub use ledger_service::LedgerService;
pub use redemption_service::RedemptionService;
pub use rule_resolver::RuleResolver;
