//! 积分规则解析
//!
//! 按 门店 → 加盟商 → 客户 → 全局 的顺序查找，第一个存在的规则生效

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{LoyaltyError, Result};
use crate::models::{PointRule, ScopeRef};
use crate::repository::{DirectoryRepositoryTrait, PointRuleRepositoryTrait};

pub struct RuleResolver {
    rules: Arc<dyn PointRuleRepositoryTrait>,
    directory: Arc<dyn DirectoryRepositoryTrait>,
}

impl RuleResolver {
    pub fn new(
        rules: Arc<dyn PointRuleRepositoryTrait>,
        directory: Arc<dyn DirectoryRepositoryTrait>,
    ) -> Self {
        Self { rules, directory }
    }

    /// 解析门店适用的积分规则
    #[instrument(skip(self), fields(store_id = %store_id))]
    pub async fn resolve(&self, store_id: Uuid) -> Result<PointRule> {
        self.resolve_for_scope(ScopeRef::Store(store_id))
            .await?
            .ok_or(LoyaltyError::NoRule(store_id))
    }

    /// 从指定范围开始沿层级向上查找，没有任何规则时返回 `None`
    pub async fn resolve_for_scope(&self, scope: ScopeRef) -> Result<Option<PointRule>> {
        for candidate in self.chain_for(scope).await? {
            if let Some(rule) = self.rules.find_rule(candidate).await? {
                debug!(scope = %candidate.scope(), rule_id = %rule.id, "命中积分规则");
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    pub async fn create_rule(&self, rule: &PointRule) -> Result<()> {
        rule.validate()?;
        let owner = rule.owner()?;
        if !self.directory.scope_exists(owner).await? {
            return Err(LoyaltyError::ScopeNotFound(owner.to_string()));
        }
        self.rules.create_rule(rule).await
    }

    /// 查找顺序
    async fn chain_for(&self, scope: ScopeRef) -> Result<Vec<ScopeRef>> {
        let mut chain = Vec::with_capacity(4);
        match scope {
            ScopeRef::Store(store_id) => {
                let store = self
                    .directory
                    .get_store(store_id)
                    .await?
                    .ok_or(LoyaltyError::StoreNotFound(store_id))?;
                chain.push(ScopeRef::Store(store.store_id));
                chain.push(ScopeRef::Franchise(store.franchise_id));
                chain.push(ScopeRef::Customer(store.customer_id));
            }
            ScopeRef::Franchise(franchise_id) => {
                chain.push(ScopeRef::Franchise(franchise_id));
                if let Some(customer_id) = self.directory.get_franchise_customer(franchise_id).await? {
                    chain.push(ScopeRef::Customer(customer_id));
                }
            }
            ScopeRef::Customer(customer_id) => chain.push(ScopeRef::Customer(customer_id)),
            ScopeRef::Global => {}
        }
        chain.push(ScopeRef::Global);
        Ok(chain)
    }
}
