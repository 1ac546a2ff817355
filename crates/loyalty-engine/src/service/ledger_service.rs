//! 积分账本与钱包服务
//!
//! 积分流水只追加；余额按 `(person, scope, scope_id)` 汇总未过期流水，每次实时计算。

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::observability::metrics;

use crate::clock::Clock;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    Claimed, DisplayAs, NewPointTransaction, Order, Person, PointReason, PointTransaction,
    ScopeRef, check_order_total,
};
use crate::repository::{
    AccrualCommand, AccrualOutcome, CouponRepositoryTrait, DirectoryRepositoryTrait,
    PointLedgerRepositoryTrait,
};
use crate::service::dto::{EarnPointsRequest, EarnPointsResponse, WalletBalance, WalletResponse};
use crate::service::idempotency::{Admission, IdempotencyLayer, operations};
use crate::service::rule_resolver::RuleResolver;

/// 流水查询默认条数
const DEFAULT_HISTORY_LIMIT: i64 = 50;

pub struct LedgerService {
    ledger: Arc<dyn PointLedgerRepositoryTrait>,
    coupons: Arc<dyn CouponRepositoryTrait>,
    directory: Arc<dyn DirectoryRepositoryTrait>,
    rules: Arc<RuleResolver>,
    idempotency: Arc<IdempotencyLayer>,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    pub fn new(
        ledger: Arc<dyn PointLedgerRepositoryTrait>,
        coupons: Arc<dyn CouponRepositoryTrait>,
        directory: Arc<dyn DirectoryRepositoryTrait>,
        rules: Arc<RuleResolver>,
        idempotency: Arc<IdempotencyLayer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            coupons,
            directory,
            rules,
            idempotency,
            clock,
        }
    }

    /// 追加一条积分流水
    #[instrument(skip(self, request), fields(person_id = %request.person_id, scope = %request.scope, delta = request.delta))]
    pub async fn append(&self, request: NewPointTransaction) -> Result<PointTransaction> {
        request.validate()?;
        if !self.directory.scope_exists(request.scope).await? {
            return Err(LoyaltyError::ScopeNotFound(request.scope.to_string()));
        }

        let transaction = request.into_transaction(self.clock.now());
        self.ledger.append(&transaction).await?;

        info!(transaction_id = %transaction.id, "积分流水已写入");
        Ok(transaction)
    }

    pub async fn get_balance(&self, person_id: Uuid, scope: ScopeRef) -> Result<i64> {
        self.ledger
            .balance(person_id, scope, self.clock.now())
            .await
    }

    pub async fn list_transactions(
        &self,
        person_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<PointTransaction>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
        self.ledger.list_by_person(person_id, limit).await
    }

    /// 钱包：各范围积分余额 + 各活动券数量
    #[instrument(skip(self))]
    pub async fn get_wallet(&self, person_id: Uuid, display_as: DisplayAs) -> Result<WalletResponse> {
        let now = self.clock.now();
        let scope_balances = self.ledger.balances(person_id, now).await?;

        let mut balances = Vec::with_capacity(scope_balances.len());
        for balance in scope_balances {
            let brl = match display_as {
                DisplayAs::Points => None,
                DisplayAs::Brl => self.convert_to_brl(balance.scope, balance.points).await?,
            };
            balances.push(WalletBalance {
                scope: balance.scope,
                points: balance.points,
                brl,
            });
        }

        let coupons = self.coupons.count_by_offer(person_id).await?;

        Ok(WalletResponse {
            person_id,
            display_as,
            balances,
            coupons,
        })
    }

    /// 消费累积积分
    #[instrument(skip(self, request), fields(store_id = %request.store_id, order_total = %request.order_total))]
    pub async fn earn_points(&self, request: EarnPointsRequest) -> Result<EarnPointsResponse> {
        let result = self.execute_earn(&request).await;

        match &result {
            Ok(response) if response.replayed => {
                metrics::record_points_accrual(response.scope.scope().as_str(), "replay")
            }
            Ok(response) => {
                metrics::record_points_accrual(response.scope.scope().as_str(), "success")
            }
            Err(e) => {
                metrics::record_points_accrual("unknown", e.error_code());
                if !e.is_business_error() {
                    warn!(error = %e, "积分累积失败");
                }
            }
        }

        result
    }

    async fn execute_earn(&self, request: &EarnPointsRequest) -> Result<EarnPointsResponse> {
        check_order_total(request.order_total)?;
        if let Some(order) = &request.order {
            order.validate()?;
        }

        let now = self.clock.now();
        let claim = match self
            .idempotency
            .begin(operations::POINTS_EARN, &request.idempotency_key, request, now)
            .await?
        {
            Admission::Proceed(claim) => claim,
            Admission::Replay(response) => {
                let outcome: AccrualOutcome = serde_json::from_value(response)?;
                let person_id = self.person_for_replay(request).await?;
                info!(transaction_id = %outcome.transaction_id, "幂等请求，返回首次累积结果");
                return Ok(Self::to_response(outcome, person_id, true));
            }
        };

        let person = self.resolve_person(request).await?;
        let rule = self.rules.resolve(request.store_id).await?;

        let points = rule.compute_points(request.order_total)?;
        if points <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "订单金额 {} 不足以获得积分",
                request.order_total
            )));
        }

        let order = request
            .order
            .as_ref()
            .map(|ctx| Order::from_context(ctx, person.id, Some(request.store_id), now))
            .transpose()?;

        let mut accrual =
            NewPointTransaction::new(person.id, rule.owner()?, points, PointReason::Accrual);
        accrual.expires_at = rule.compute_expiry(now)?;
        accrual.store_id = Some(request.store_id);
        accrual.order_ref = request.order.as_ref().and_then(|o| o.external_id.clone());
        accrual.details = json!({
            "ruleId": rule.id,
            "orderTotal": request.order_total,
            "pointsPerBrl": rule.points_per_brl,
        });

        let command = AccrualCommand {
            transaction: accrual.into_transaction(now),
            order,
        };

        match self.ledger.accrue(&command, &claim).await? {
            Claimed::Fresh(outcome) => {
                info!(
                    person_id = %person.id,
                    points_earned = outcome.points_earned,
                    balance = outcome.balance,
                    "积分累积成功"
                );
                Ok(Self::to_response(outcome, person.id, false))
            }
            Claimed::Replay(outcome) => Ok(Self::to_response(outcome, person.id, true)),
        }
    }

    async fn resolve_person(&self, request: &EarnPointsRequest) -> Result<Person> {
        match (&request.person_id, &request.national_id) {
            (Some(id), _) => self
                .directory
                .get_person(*id)
                .await?
                .ok_or_else(|| LoyaltyError::PersonNotFound(id.to_string())),
            (None, Some(national_id)) => self
                .directory
                .get_person_by_national_id(national_id)
                .await?
                .ok_or_else(|| LoyaltyError::PersonNotFound(national_id.clone())),
            (None, None) => Err(LoyaltyError::Validation(
                "personId 与 nationalId 必须提供其一".to_string(),
            )),
        }
    }

    async fn person_for_replay(&self, request: &EarnPointsRequest) -> Result<Uuid> {
        match request.person_id {
            Some(id) => Ok(id),
            None => self.resolve_person(request).await.map(|p| p.id),
        }
    }

    /// 按该范围适用规则换算 BRL，无规则时不换算
    async fn convert_to_brl(
        &self,
        scope: ScopeRef,
        points: i64,
    ) -> Result<Option<rust_decimal::Decimal>> {
        match self.rules.resolve_for_scope(scope).await {
            Ok(rule) => Ok(rule.and_then(|r| r.points_to_brl(points))),
            Err(LoyaltyError::StoreNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn to_response(outcome: AccrualOutcome, person_id: Uuid, replayed: bool) -> EarnPointsResponse {
        EarnPointsResponse {
            transaction_id: outcome.transaction_id,
            person_id,
            scope: outcome.scope,
            points_earned: outcome.points_earned,
            balance: outcome.balance,
            expires_at: outcome.expires_at,
            replayed,
        }
    }
}
