//! 积分规则仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::PointRuleRepositoryTrait;
use crate::error::Result;
use crate::models::{PointRule, ScopeRef};

pub struct PointRuleRepository {
    pool: PgPool,
}

impl PointRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 精确匹配某个范围的规则
    pub async fn find_rule(&self, scope: ScopeRef) -> Result<Option<PointRule>> {
        let (customer_id, franchise_id, store_id) = scope.rule_columns();

        let rule = sqlx::query_as::<_, PointRule>(
            r#"
            SELECT id, scope, customer_id, franchise_id, store_id, points_per_brl,
                   expires_in_days, created_at
            FROM point_rules
            WHERE scope = $1
              AND customer_id IS NOT DISTINCT FROM $2
              AND franchise_id IS NOT DISTINCT FROM $3
              AND store_id IS NOT DISTINCT FROM $4
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(scope.scope())
        .bind(customer_id)
        .bind(franchise_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rule)
    }

    pub async fn create_rule(&self, rule: &PointRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO point_rules
                (id, scope, customer_id, franchise_id, store_id, points_per_brl,
                 expires_in_days, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rule.id)
        .bind(rule.scope)
        .bind(rule.customer_id)
        .bind(rule.franchise_id)
        .bind(rule.store_id)
        .bind(rule.points_per_brl)
        .bind(rule.expires_in_days)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PointRuleRepositoryTrait for PointRuleRepository {
    async fn find_rule(&self, scope: ScopeRef) -> Result<Option<PointRule>> {
        self.find_rule(scope).await
    }

    async fn create_rule(&self, rule: &PointRule) -> Result<()> {
        self.create_rule(rule).await
    }
}
