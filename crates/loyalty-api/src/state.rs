//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态，以及从仓储组装全部服务的逻辑

use std::sync::Arc;

use chrono::Duration;
use loyalty_engine::repository::{
    CouponRepositoryTrait, DirectoryRepositoryTrait, IdempotencyRepositoryTrait,
    OfferRepositoryTrait, PointLedgerRepositoryTrait, PointRuleRepositoryTrait,
};
use loyalty_engine::{
    Clock, CouponRepository, DirectoryRepository, IdempotencyLayer, IdempotencyRepository,
    InventoryManager, IssuanceService, LedgerService, MemoryStore, OfferRepository,
    PointLedgerRepository, PointRuleRepository, RedemptionService, ReservationReaper,
    RuleResolver,
};
use loyalty_shared::config::{EngineConfig, ReaperConfig};
use loyalty_shared::database::Database;
use sqlx::PgPool;

/// 全部仓储的 trait 对象集合
#[derive(Clone)]
pub struct Repositories {
    pub offers: Arc<dyn OfferRepositoryTrait>,
    pub coupons: Arc<dyn CouponRepositoryTrait>,
    pub ledger: Arc<dyn PointLedgerRepositoryTrait>,
    pub rules: Arc<dyn PointRuleRepositoryTrait>,
    pub directory: Arc<dyn DirectoryRepositoryTrait>,
    pub idempotency: Arc<dyn IdempotencyRepositoryTrait>,
}

impl Repositories {
    /// PostgreSQL 实现
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            offers: Arc::new(OfferRepository::new(pool.clone())),
            coupons: Arc::new(CouponRepository::new(pool.clone())),
            ledger: Arc::new(PointLedgerRepository::new(pool.clone())),
            rules: Arc::new(PointRuleRepository::new(pool.clone())),
            directory: Arc::new(DirectoryRepository::new(pool.clone())),
            idempotency: Arc::new(IdempotencyRepository::new(pool.clone())),
        }
    }

    /// 内存实现，所有仓储共享同一份状态
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            offers: Arc::new(store.clone()),
            coupons: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            rules: Arc::new(store.clone()),
            directory: Arc::new(store.clone()),
            idempotency: Arc::new(store.clone()),
        }
    }

    pub fn reaper(&self, clock: Arc<dyn Clock>, config: &ReaperConfig) -> ReservationReaper {
        ReservationReaper::new(
            self.coupons.clone(),
            self.idempotency.clone(),
            clock,
            config,
        )
    }
}

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub inventory: Arc<InventoryManager>,
    pub issuance: Arc<IssuanceService>,
    pub redemption: Arc<RedemptionService>,
    pub ledger: Arc<LedgerService>,
    pub rules: Arc<RuleResolver>,
    pub clock: Arc<dyn Clock>,
    /// 就绪探针使用；内存模式下为空
    pub database: Option<Database>,
}

impl AppState {
    /// 按引擎配置组装全部服务
    pub fn new(repos: &Repositories, clock: Arc<dyn Clock>, engine: &EngineConfig) -> Self {
        let idempotency = Arc::new(IdempotencyLayer::new(
            repos.idempotency.clone(),
            Duration::hours(engine.idempotency_ttl_hours),
        ));
        let rules = Arc::new(RuleResolver::new(
            repos.rules.clone(),
            repos.directory.clone(),
        ));

        Self {
            inventory: Arc::new(InventoryManager::new(
                repos.offers.clone(),
                repos.directory.clone(),
                clock.clone(),
            )),
            issuance: Arc::new(IssuanceService::new(
                repos.coupons.clone(),
                repos.directory.clone(),
                idempotency.clone(),
                clock.clone(),
                engine.code_length,
            )),
            redemption: Arc::new(RedemptionService::new(
                repos.offers.clone(),
                repos.coupons.clone(),
                idempotency.clone(),
                clock.clone(),
                Duration::seconds(engine.reservation_ttl_seconds),
            )),
            ledger: Arc::new(LedgerService::new(
                repos.ledger.clone(),
                repos.coupons.clone(),
                repos.directory.clone(),
                rules.clone(),
                idempotency,
                clock.clone(),
            )),
            rules,
            clock,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
