//! 进程内存储
//!
//! 与 PostgreSQL 实现相同的仓储契约。所有状态在一把互斥锁下修改，每个原子单元先完成全部校验
//! 再写入，失败时不留下部分变更。`lock_row` 可以模拟其他事务持有券行锁，
//! 用于验证 NOWAIT / SKIP LOCKED 的行为。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use super::traits::{
    AccrualCommand, AccrualOutcome, CouponRepositoryTrait, DirectoryRepositoryTrait,
    IdempotencyRepositoryTrait, OfferRepositoryTrait, PointLedgerRepositoryTrait,
    PointRuleRepositoryTrait, RedeemCommand, RedeemOutcome,
};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    Claimed, Coupon, CouponCount, CouponOffer, CouponStatus, CouponType, IdempotencyClaim,
    IdempotencyRecord, NewPointTransaction, Order, OutboxEvent, PdvActor, Person, PointReason,
    PointRule, PointTransaction, ReserveDecision, ScopeBalance, ScopeRef, StoreRef, topics,
};

#[derive(Default)]
struct MemoryState {
    coupon_types: HashMap<Uuid, CouponType>,
    offers: HashMap<Uuid, CouponOffer>,
    coupons: HashMap<Uuid, Coupon>,
    point_transactions: Vec<PointTransaction>,
    point_rules: Vec<PointRule>,
    persons: HashMap<Uuid, Person>,
    customers: HashSet<Uuid>,
    /// franchise_id → customer_id
    franchises: HashMap<Uuid, Uuid>,
    stores: HashMap<Uuid, StoreRef>,
    idempotency: HashMap<(String, String), IdempotencyRecord>,
    orders: Vec<Order>,
    outbox: Vec<OutboxEvent>,
}

impl MemoryState {
    /// 幂等声明：返回 `Some` 表示重复请求（重放或冲突）
    fn existing_claim<T: serde::de::DeserializeOwned>(
        &self,
        claim: &IdempotencyClaim,
    ) -> Option<Result<Claimed<T>>> {
        self.idempotency
            .get(&(claim.operation.clone(), claim.key.clone()))
            .filter(|record| !record.is_expired(claim.created_at))
            .map(|record| record.replay_for(claim))
    }

    fn complete_claim(&mut self, claim: &IdempotencyClaim, response: serde_json::Value) {
        self.idempotency.insert(
            (claim.operation.clone(), claim.key.clone()),
            claim.record(response),
        );
    }

    /// 占用一个名额：统计该用户已领数量 → `check_slot` → 扣减
    fn reserve_slot(&mut self, offer_id: Uuid, person: &Person, now: DateTime<Utc>) -> Result<()> {
        let issued_to_person = self
            .coupons
            .values()
            .filter(|c| {
                c.offer_id == offer_id
                    && c.person_id == person.id
                    && c.status != CouponStatus::Cancelled
            })
            .count() as i64;
        let offer = self
            .offers
            .get_mut(&offer_id)
            .ok_or(LoyaltyError::OfferNotFound(offer_id))?;
        offer.check_slot(person, issued_to_person, now)?;

        offer.current_quantity -= 1;
        offer.updated_at = now;
        Ok(())
    }

    fn balance(&self, person_id: Uuid, scope: ScopeRef, now: DateTime<Utc>) -> i64 {
        self.point_transactions
            .iter()
            .filter(|t| {
                t.person_id == person_id
                    && t.scope == scope.scope()
                    && t.scope_id == scope.scope_id()
                    && t.is_live(now)
            })
            .map(|t| t.delta)
            .sum()
    }
}

/// 模拟的券行锁，drop 时释放
pub struct RowLockGuard {
    locks: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for RowLockGuard {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.id);
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    row_locks: Arc<Mutex<HashSet<Uuid>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === 目录数据（由外部系统维护，这里用于测试与本地运行） ===

    pub fn insert_person(&self, person: Person) {
        self.state.lock().persons.insert(person.id, person);
    }

    pub fn insert_customer(&self, customer_id: Uuid) {
        self.state.lock().customers.insert(customer_id);
    }

    pub fn insert_franchise(&self, franchise_id: Uuid, customer_id: Uuid) {
        let mut state = self.state.lock();
        state.customers.insert(customer_id);
        state.franchises.insert(franchise_id, customer_id);
    }

    pub fn insert_store(&self, store: StoreRef) {
        let mut state = self.state.lock();
        state.customers.insert(store.customer_id);
        state.franchises.insert(store.franchise_id, store.customer_id);
        state.stores.insert(store.store_id, store);
    }

    /// 模拟另一个事务持有券行锁
    pub fn lock_row(&self, coupon_id: Uuid) -> RowLockGuard {
        self.row_locks.lock().insert(coupon_id);
        RowLockGuard {
            locks: Arc::clone(&self.row_locks),
            id: coupon_id,
        }
    }

    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.lock().outbox.clone()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    fn is_row_locked(&self, coupon_id: Uuid) -> bool {
        self.row_locks.lock().contains(&coupon_id)
    }
}

#[async_trait]
impl OfferRepositoryTrait for MemoryStore {
    async fn create_coupon_type(&self, coupon_type: &CouponType) -> Result<()> {
        self.state
            .lock()
            .coupon_types
            .insert(coupon_type.id, coupon_type.clone());
        Ok(())
    }

    async fn get_coupon_type(&self, id: Uuid) -> Result<Option<CouponType>> {
        Ok(self.state.lock().coupon_types.get(&id).cloned())
    }

    async fn create_offer(&self, offer: &CouponOffer) -> Result<()> {
        self.state.lock().offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<CouponOffer>> {
        Ok(self.state.lock().offers.get(&id).cloned())
    }

    async fn adjust_quantity(
        &self,
        offer_id: Uuid,
        new_initial: i32,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        let mut state = self.state.lock();
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or(LoyaltyError::OfferNotFound(offer_id))?;
        let new_current = offer.adjusted_current(new_initial)?;
        offer.initial_quantity = new_initial;
        offer.current_quantity = new_current;
        offer.updated_at = now;
        Ok(offer.clone())
    }

    async fn set_active(
        &self,
        offer_id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<CouponOffer> {
        let mut state = self.state.lock();
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or(LoyaltyError::OfferNotFound(offer_id))?;
        offer.is_active = is_active;
        offer.updated_at = now;
        Ok(offer.clone())
    }
}

#[async_trait]
impl CouponRepositoryTrait for MemoryStore {
    async fn get_coupon(&self, id: Uuid) -> Result<Option<Coupon>> {
        Ok(self.state.lock().coupons.get(&id).cloned())
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<Coupon>> {
        Ok(self
            .state
            .lock()
            .coupons
            .values()
            .filter(|c| c.code_hash == code_hash)
            .max_by_key(|c| c.issued_at)
            .cloned())
    }

    async fn list_by_person(&self, person_id: Uuid) -> Result<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self
            .state
            .lock()
            .coupons
            .values()
            .filter(|c| c.person_id == person_id)
            .cloned()
            .collect();
        coupons.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(coupons)
    }

    async fn count_by_offer(&self, person_id: Uuid) -> Result<Vec<CouponCount>> {
        let state = self.state.lock();
        let mut counts: BTreeMap<Uuid, CouponCount> = BTreeMap::new();
        for coupon in state.coupons.values().filter(|c| c.person_id == person_id) {
            let entry = counts.entry(coupon.offer_id).or_insert(CouponCount {
                offer_id: coupon.offer_id,
                available: 0,
                redeemed: 0,
            });
            match coupon.status {
                CouponStatus::Issued | CouponStatus::Reserved => entry.available += 1,
                CouponStatus::Redeemed => entry.redeemed += 1,
                CouponStatus::Cancelled | CouponStatus::Expired => {}
            }
        }
        Ok(counts.into_values().collect())
    }

    async fn issue_coupon(
        &self,
        coupon: &Coupon,
        person: &Person,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<Coupon>> {
        let now = coupon.issued_at;
        let mut state = self.state.lock();

        if let Some(existing) = state.existing_claim(claim) {
            return existing;
        }

        let response = serde_json::to_value(coupon)?;
        state.reserve_slot(coupon.offer_id, person, now)?;
        state.coupons.insert(coupon.id, coupon.clone());
        state.outbox.push(OutboxEvent::pending(
            topics::COUPON_ISSUED,
            json!({
                "couponId": coupon.id,
                "offerId": coupon.offer_id,
                "personId": coupon.person_id,
                "issuedAt": now,
            }),
            now,
        ));
        state.complete_claim(claim, response);

        Ok(Claimed::Fresh(coupon.clone()))
    }

    async fn try_reserve(
        &self,
        coupon_id: Uuid,
        actor: &PdvActor,
        preview: Decimal,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Coupon> {
        if self.is_row_locked(coupon_id) {
            return Err(LoyaltyError::AlreadyReserved(coupon_id));
        }

        let mut state = self.state.lock();
        let coupon = state
            .coupons
            .get_mut(&coupon_id)
            .ok_or(LoyaltyError::CouponNotFound)?;

        if coupon.reserve_decision(actor, now)? == ReserveDecision::Take {
            coupon.reserve(actor, preview, now, ttl);
        }
        Ok(coupon.clone())
    }

    async fn redeem(
        &self,
        command: &RedeemCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<RedeemOutcome>> {
        let now = command.now;
        let mut state = self.state.lock();

        if let Some(existing) = state.existing_claim(claim) {
            return existing;
        }

        let mut coupon = state
            .coupons
            .get(&command.coupon_id)
            .cloned()
            .ok_or(LoyaltyError::CouponNotFound)?;
        coupon.check_redeemable(&command.actor, now)?;

        let offer = state
            .offers
            .get(&coupon.offer_id)
            .cloned()
            .ok_or(LoyaltyError::OfferNotFound(coupon.offer_id))?;

        let debit = if offer.points_cost > 0 {
            let scope = offer.scope_ref();
            let available = state.balance(coupon.person_id, scope, now);
            if available < offer.points_cost {
                return Err(LoyaltyError::InsufficientPoints {
                    required: offer.points_cost,
                    available,
                });
            }
            let mut debit = NewPointTransaction::new(
                coupon.person_id,
                scope,
                -offer.points_cost,
                PointReason::CouponSettlement,
            );
            debit.store_id = Some(command.actor.store_id);
            debit.order_ref = Some(coupon.id.to_string());
            debit.details = json!({ "couponId": coupon.id, "offerId": offer.id });
            Some(debit.into_transaction(now))
        } else {
            None
        };

        let order_id = command.order.as_ref().map(|o| o.id);
        coupon.mark_redeemed(&command.actor, order_id, now);

        let outcome = RedeemOutcome {
            coupon: coupon.clone(),
            order_id,
            points_charged: offer.points_cost,
            settlement_transaction_id: debit.as_ref().map(|d| d.id),
        };
        let response = serde_json::to_value(&outcome)?;

        if let Some(debit) = debit {
            state.point_transactions.push(debit);
        }
        if let Some(order) = &command.order {
            state.orders.push(order.clone());
        }
        state.coupons.insert(coupon.id, coupon);
        state.outbox.push(OutboxEvent::pending(
            topics::COUPON_REDEEMED,
            json!({
                "couponId": outcome.coupon.id,
                "offerId": offer.id,
                "personId": outcome.coupon.person_id,
                "storeId": command.actor.store_id,
                "orderId": order_id,
                "pointsCharged": offer.points_cost,
                "redeemedAt": now,
            }),
            now,
        ));
        state.complete_claim(claim, response);

        Ok(Claimed::Fresh(outcome))
    }

    async fn cancel(
        &self,
        coupon_id: Uuid,
        cancelled_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Coupon> {
        let mut state = self.state.lock();
        let coupon = state
            .coupons
            .get_mut(&coupon_id)
            .ok_or(LoyaltyError::CouponNotFound)?;
        coupon.cancel(cancelled_by, now)?;
        Ok(coupon.clone())
    }

    async fn release_stale_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let locked = self.row_locks.lock().clone();
        let mut state = self.state.lock();

        let mut stale: Vec<(DateTime<Utc>, Uuid)> = state
            .coupons
            .values()
            .filter(|c| {
                c.status == CouponStatus::Reserved
                    && c.reservation_expires_at.is_some_and(|exp| exp < now)
                    && !locked.contains(&c.id)
            })
            .filter_map(|c| c.reservation_expires_at.map(|exp| (exp, c.id)))
            .collect();
        stale.sort();
        stale.truncate(usize::try_from(limit).unwrap_or(0));

        let ids: Vec<Uuid> = stale.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            if let Some(coupon) = state.coupons.get_mut(id) {
                coupon.release_reservation();
            }
        }
        Ok(ids)
    }

    async fn expire_elapsed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let locked = self.row_locks.lock().clone();
        let mut state = self.state.lock();

        let elapsed_offers: HashSet<Uuid> = state
            .offers
            .values()
            .filter(|o| o.has_elapsed(now))
            .map(|o| o.id)
            .collect();

        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = state
            .coupons
            .values()
            .filter(|c| {
                matches!(c.status, CouponStatus::Issued | CouponStatus::Reserved)
                    && elapsed_offers.contains(&c.offer_id)
                    && !locked.contains(&c.id)
            })
            .map(|c| (c.issued_at, c.id))
            .collect();
        candidates.sort();
        candidates.truncate(usize::try_from(limit).unwrap_or(0));

        let ids: Vec<Uuid> = candidates.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            if let Some(coupon) = state.coupons.get_mut(id) {
                coupon.expire(now);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl PointLedgerRepositoryTrait for MemoryStore {
    async fn append(&self, transaction: &PointTransaction) -> Result<()> {
        self.state
            .lock()
            .point_transactions
            .push(transaction.clone());
        Ok(())
    }

    async fn balance(&self, person_id: Uuid, scope: ScopeRef, now: DateTime<Utc>) -> Result<i64> {
        Ok(self.state.lock().balance(person_id, scope, now))
    }

    async fn balances(&self, person_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ScopeBalance>> {
        let state = self.state.lock();
        let mut sums: Vec<(ScopeRef, i64)> = Vec::new();
        for t in state
            .point_transactions
            .iter()
            .filter(|t| t.person_id == person_id && t.is_live(now))
        {
            let scope = t.scope_ref()?;
            match sums.iter_mut().find(|(s, _)| *s == scope) {
                Some((_, points)) => *points += t.delta,
                None => sums.push((scope, t.delta)),
            }
        }
        Ok(sums
            .into_iter()
            .map(|(scope, points)| ScopeBalance { scope, points })
            .collect())
    }

    async fn list_by_person(&self, person_id: Uuid, limit: i64) -> Result<Vec<PointTransaction>> {
        let state = self.state.lock();
        let mut transactions: Vec<PointTransaction> = state
            .point_transactions
            .iter()
            .filter(|t| t.person_id == person_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(transactions)
    }

    async fn accrue(
        &self,
        command: &AccrualCommand,
        claim: &IdempotencyClaim,
    ) -> Result<Claimed<AccrualOutcome>> {
        let mut state = self.state.lock();

        if let Some(existing) = state.existing_claim(claim) {
            return existing;
        }

        let transaction = command.transaction.clone();
        let scope = transaction.scope_ref()?;
        let balance = state.balance(transaction.person_id, scope, transaction.created_at)
            + if transaction.is_live(transaction.created_at) {
                transaction.delta
            } else {
                0
            };

        let outcome = AccrualOutcome {
            transaction_id: transaction.id,
            scope,
            points_earned: transaction.delta,
            balance,
            expires_at: transaction.expires_at,
            order_id: command.order.as_ref().map(|o| o.id),
        };
        let response = serde_json::to_value(&outcome)?;

        state.point_transactions.push(transaction);
        if let Some(order) = &command.order {
            state.orders.push(order.clone());
        }
        state.complete_claim(claim, response);

        Ok(Claimed::Fresh(outcome))
    }
}

#[async_trait]
impl PointRuleRepositoryTrait for MemoryStore {
    async fn find_rule(&self, scope: ScopeRef) -> Result<Option<PointRule>> {
        let state = self.state.lock();
        Ok(state
            .point_rules
            .iter()
            .filter(|r| r.owner().is_ok_and(|owner| owner == scope))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn create_rule(&self, rule: &PointRule) -> Result<()> {
        self.state.lock().point_rules.push(rule.clone());
        Ok(())
    }
}

#[async_trait]
impl DirectoryRepositoryTrait for MemoryStore {
    async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
        Ok(self.state.lock().persons.get(&id).cloned())
    }

    async fn get_person_by_national_id(&self, national_id: &str) -> Result<Option<Person>> {
        Ok(self
            .state
            .lock()
            .persons
            .values()
            .find(|p| p.national_id == national_id)
            .cloned())
    }

    async fn get_store(&self, store_id: Uuid) -> Result<Option<StoreRef>> {
        Ok(self.state.lock().stores.get(&store_id).copied())
    }

    async fn get_franchise_customer(&self, franchise_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.state.lock().franchises.get(&franchise_id).copied())
    }

    async fn scope_exists(&self, scope: ScopeRef) -> Result<bool> {
        let state = self.state.lock();
        Ok(match scope {
            ScopeRef::Global => true,
            ScopeRef::Customer(id) => state.customers.contains(&id),
            ScopeRef::Franchise(id) => state.franchises.contains_key(&id),
            ScopeRef::Store(id) => state.stores.contains_key(&id),
        })
    }
}

#[async_trait]
impl IdempotencyRepositoryTrait for MemoryStore {
    async fn find(&self, operation: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .state
            .lock()
            .idempotency
            .get(&(operation.to_string(), key.to_string()))
            .cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64> {
        let mut state = self.state.lock();
        let expired: Vec<(String, String)> = state
            .idempotency
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(k, _)| k.clone())
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        for k in &expired {
            state.idempotency.remove(k);
        }
        Ok(expired.len() as u64)
    }
}
