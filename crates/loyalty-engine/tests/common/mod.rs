//! 测试辅助：基于内存存储与手动时钟组装全部服务
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use loyalty_engine::service::dto::{
    AttemptRequest, AttemptResponse, IssueCouponRequest, IssueCouponResponse,
};
use loyalty_engine::{
    Clock, CouponOffer, CouponType, DiscountKind, IdempotencyLayer, InventoryManager,
    IssuanceService, LedgerService, ManualClock, MemoryStore, NewOffer, OrderContext, Person,
    RedemptionService, ReservationReaper, Result, RuleResolver, ScopeRef, StoreRef,
};
use loyalty_shared::config::ReaperConfig;

pub const RESERVATION_TTL_SECONDS: i64 = 120;

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub store_ref: StoreRef,
    pub inventory: InventoryManager,
    pub issuance: Arc<IssuanceService>,
    pub redemption: Arc<RedemptionService>,
    pub ledger: LedgerService,
    pub rules: Arc<RuleResolver>,
    pub reaper: ReservationReaper,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start_time()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let store_ref = StoreRef {
            store_id: Uuid::new_v4(),
            franchise_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
        };
        store.insert_store(store_ref);

        let idempotency = Arc::new(IdempotencyLayer::new(
            Arc::new(store.clone()),
            Duration::hours(24),
        ));
        let rules = Arc::new(RuleResolver::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        ));

        let inventory = InventoryManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            dyn_clock.clone(),
        );
        let issuance = Arc::new(IssuanceService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            idempotency.clone(),
            dyn_clock.clone(),
            20,
        ));
        let redemption = Arc::new(RedemptionService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            idempotency.clone(),
            dyn_clock.clone(),
            Duration::seconds(RESERVATION_TTL_SECONDS),
        ));
        let ledger = LedgerService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            rules.clone(),
            idempotency,
            dyn_clock.clone(),
        );
        let reaper = ReservationReaper::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            dyn_clock,
            &ReaperConfig {
                enabled: true,
                interval_seconds: 1,
                batch_size: 100,
                max_run_seconds: 5,
            },
        );

        Self {
            store,
            clock,
            store_ref,
            inventory,
            issuance,
            redemption,
            ledger,
            rules,
            reaper,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn person(&self, national_id: &str) -> Person {
        let person = Person::new(national_id, format!("Cliente {}", national_id));
        self.store.insert_person(person.clone());
        person
    }

    pub async fn fixed_amount_type(&self, amount: Decimal) -> CouponType {
        self.inventory
            .create_coupon_type(CouponType {
                id: Uuid::new_v4(),
                name: format!("R$ {} off", amount),
                kind: DiscountKind::FixedAmount,
                discount_amount: Some(amount),
                discount_percentage: None,
                valid_skus: vec![],
                min_order_total: None,
                created_at: self.now(),
            })
            .await
            .unwrap()
    }

    pub async fn coupon_type(&self, coupon_type: CouponType) -> CouponType {
        self.inventory.create_coupon_type(coupon_type).await.unwrap()
    }

    pub fn new_offer(&self, coupon_type_id: Uuid, quantity: i32, max_per_customer: i32) -> NewOffer {
        NewOffer {
            name: "Oferta de teste".to_string(),
            coupon_type_id,
            owner: ScopeRef::Store(self.store_ref.store_id),
            quantity,
            max_per_customer,
            start_at: None,
            end_at: None,
            segment: None,
            points_cost: 0,
        }
    }

    pub async fn offer(&self, quantity: i32, max_per_customer: i32) -> CouponOffer {
        let coupon_type = self.fixed_amount_type(Decimal::new(500, 2)).await;
        self.inventory
            .create_offer(self.new_offer(coupon_type.id, quantity, max_per_customer))
            .await
            .unwrap()
    }

    pub async fn issue(&self, offer_id: Uuid, person_id: Uuid) -> Result<IssueCouponResponse> {
        self.issuance
            .issue(IssueCouponRequest {
                offer_id,
                person_id,
                idempotency_key: Uuid::new_v4().to_string(),
            })
            .await
    }

    /// 发放一张券并返回券码明文
    pub async fn issue_code(&self, offer_id: Uuid, person_id: Uuid) -> (Uuid, String) {
        let issued = self.issue(offer_id, person_id).await.unwrap();
        (issued.coupon_id, issued.code.unwrap())
    }

    pub async fn attempt(
        &self,
        code: &str,
        session_id: &str,
        order: OrderContext,
    ) -> Result<AttemptResponse> {
        self.redemption
            .attempt(AttemptRequest {
                code: code.to_string(),
                store_id: self.store_ref.store_id,
                session_id: session_id.to_string(),
                order,
            })
            .await
    }
}

pub fn brl(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
