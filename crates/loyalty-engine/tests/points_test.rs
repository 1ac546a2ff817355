//! 积分账本与钱包集成测试（内存存储）

mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use common::{Harness, brl};
use loyalty_engine::service::dto::EarnPointsRequest;
use loyalty_engine::{
    DisplayAs, LoyaltyError, NewPointTransaction, OrderContext, PointReason, PointRule, ScopeRef,
};

fn earn(h: &Harness, person_id: Uuid, total: Decimal, key: &str) -> EarnPointsRequest {
    EarnPointsRequest {
        person_id: Some(person_id),
        national_id: None,
        store_id: h.store_ref.store_id,
        order_total: total,
        idempotency_key: key.to_string(),
        order: None,
    }
}

async fn store_and_global_rules(h: &Harness) {
    h.rules
        .create_rule(&PointRule::new(
            ScopeRef::Store(h.store_ref.store_id),
            Decimal::TWO,
            Some(30),
            h.now(),
        ))
        .await
        .unwrap();
    h.rules
        .create_rule(&PointRule::new(ScopeRef::Global, Decimal::ONE, None, h.now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_store_rule_takes_precedence() {
    let h = Harness::new();
    store_and_global_rules(&h).await;
    let person = h.person("11122233344");

    let earned = h
        .ledger
        .earn_points(earn(&h, person.id, brl(5000), "earn-1"))
        .await
        .unwrap();

    assert_eq!(earned.points_earned, 100);
    assert_eq!(earned.balance, 100);
    assert_eq!(earned.scope, ScopeRef::Store(h.store_ref.store_id));
    assert_eq!(earned.expires_at, Some(h.now() + Duration::days(30)));
}

#[tokio::test]
async fn test_points_floor_and_minimum() {
    let h = Harness::new();
    h.rules
        .create_rule(&PointRule::new(ScopeRef::Global, Decimal::ONE, None, h.now()))
        .await
        .unwrap();
    let person = h.person("11122233344");

    let earned = h
        .ledger
        .earn_points(earn(&h, person.id, brl(1999), "earn-floor"))
        .await
        .unwrap();
    assert_eq!(earned.points_earned, 19);
    assert_eq!(earned.scope, ScopeRef::Global);
    assert!(earned.expires_at.is_none());

    let too_small = h
        .ledger
        .earn_points(earn(&h, person.id, brl(50), "earn-small"))
        .await;
    assert!(matches!(too_small, Err(LoyaltyError::Validation(_))));
}

#[tokio::test]
async fn test_balance_excludes_expired_transactions() {
    let h = Harness::new();
    store_and_global_rules(&h).await;
    let person = h.person("11122233344");
    let store_scope = ScopeRef::Store(h.store_ref.store_id);

    h.ledger
        .earn_points(earn(&h, person.id, brl(5000), "earn-1"))
        .await
        .unwrap();
    // 无过期时间的流水始终计入
    h.ledger
        .append(NewPointTransaction::new(
            person.id,
            store_scope,
            7,
            PointReason::Adjustment,
        ))
        .await
        .unwrap();
    assert_eq!(h.ledger.get_balance(person.id, store_scope).await.unwrap(), 107);

    h.clock.advance(Duration::days(30));
    assert_eq!(h.ledger.get_balance(person.id, store_scope).await.unwrap(), 7);

    // 其他范围的余额互不影响
    assert_eq!(
        h.ledger
            .get_balance(person.id, ScopeRef::Global)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_earn_by_national_id_and_failures() {
    let h = Harness::new();
    store_and_global_rules(&h).await;
    let person = h.person("11122233344");

    let mut by_cpf = earn(&h, Uuid::nil(), brl(1000), "earn-cpf");
    by_cpf.person_id = None;
    by_cpf.national_id = Some(person.national_id.clone());
    let earned = h.ledger.earn_points(by_cpf).await.unwrap();
    assert_eq!(earned.person_id, person.id);
    assert_eq!(earned.points_earned, 20);

    assert!(matches!(
        h.ledger
            .earn_points(earn(&h, Uuid::new_v4(), brl(1000), "earn-unknown"))
            .await,
        Err(LoyaltyError::PersonNotFound(_))
    ));

    let mut unknown_store = earn(&h, person.id, brl(1000), "earn-store");
    unknown_store.store_id = Uuid::new_v4();
    assert!(matches!(
        h.ledger.earn_points(unknown_store).await,
        Err(LoyaltyError::StoreNotFound(_))
    ));

    let mut neither = earn(&h, person.id, brl(1000), "earn-neither");
    neither.person_id = None;
    assert!(matches!(
        h.ledger.earn_points(neither).await,
        Err(LoyaltyError::Validation(_))
    ));
}

#[tokio::test]
async fn test_no_rule() {
    let h = Harness::new();
    let person = h.person("11122233344");
    assert!(matches!(
        h.ledger
            .earn_points(earn(&h, person.id, brl(1000), "earn-1"))
            .await,
        Err(LoyaltyError::NoRule(_))
    ));
}

#[tokio::test]
async fn test_oversized_order_total_is_rejected_without_claiming_key() {
    let h = Harness::new();
    store_and_global_rules(&h).await;
    let person = h.person("11122233344");

    let huge = earn(&h, person.id, Decimal::MAX, "earn-huge");
    assert!(matches!(
        h.ledger.earn_points(huge).await,
        Err(LoyaltyError::Validation(_))
    ));

    let mut huge_item = earn(&h, person.id, brl(1000), "earn-huge-item");
    huge_item.order = Some(OrderContext::new(brl(1000)).with_item("A1", Some(Decimal::MAX)));
    assert!(matches!(
        h.ledger.earn_points(huge_item).await,
        Err(LoyaltyError::Validation(_))
    ));

    // 被拒绝的请求不占用幂等键
    let earned = h
        .ledger
        .earn_points(earn(&h, person.id, brl(1000), "earn-huge"))
        .await
        .unwrap();
    assert_eq!(earned.points_earned, 20);
    assert!(!earned.replayed);
}

#[tokio::test]
async fn test_unbounded_rule_expiry_cannot_break_accrual() {
    let h = Harness::new();
    let store_scope = ScopeRef::Store(h.store_ref.store_id);
    assert!(matches!(
        h.rules
            .create_rule(&PointRule::new(store_scope, Decimal::ONE, Some(i32::MAX), h.now()))
            .await,
        Err(LoyaltyError::Validation(_))
    ));

    h.rules
        .create_rule(&PointRule::new(
            store_scope,
            Decimal::ONE,
            Some(PointRule::MAX_EXPIRES_IN_DAYS),
            h.now(),
        ))
        .await
        .unwrap();
    let person = h.person("11122233344");

    let earned = h
        .ledger
        .earn_points(earn(&h, person.id, brl(5000), "earn-long-expiry"))
        .await
        .unwrap();
    assert_eq!(earned.points_earned, 50);
    assert_eq!(
        earned.expires_at,
        Some(h.now() + Duration::days(i64::from(PointRule::MAX_EXPIRES_IN_DAYS)))
    );
}

#[tokio::test]
async fn test_earn_is_idempotent_and_persists_order() {
    let h = Harness::new();
    store_and_global_rules(&h).await;
    let person = h.person("11122233344");

    let mut request = earn(&h, person.id, brl(5000), "earn-once");
    request.order = Some(OrderContext {
        external_id: Some("PDV-778".to_string()),
        ..OrderContext::new(brl(5000))
    });

    let first = h.ledger.earn_points(request.clone()).await.unwrap();
    let second = h.ledger.earn_points(request.clone()).await.unwrap();
    assert!(second.replayed);
    assert_eq!(second.transaction_id, first.transaction_id);
    assert_eq!(second.balance, 100);
    assert_eq!(h.store.orders().len(), 1);
    assert_eq!(
        h.ledger
            .get_balance(person.id, ScopeRef::Store(h.store_ref.store_id))
            .await
            .unwrap(),
        100
    );

    let history = h.ledger.list_transactions(person.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].order_ref.as_deref(), Some("PDV-778"));

    request.order_total = brl(6000);
    assert!(matches!(
        h.ledger.earn_points(request).await,
        Err(LoyaltyError::IdempotencyConflict(_))
    ));
}

#[tokio::test]
async fn test_append_rejects_zero_and_unknown_scope() {
    let h = Harness::new();
    let person = h.person("11122233344");

    assert!(matches!(
        h.ledger
            .append(NewPointTransaction::new(
                person.id,
                ScopeRef::Global,
                0,
                PointReason::Adjustment
            ))
            .await,
        Err(LoyaltyError::Validation(_))
    ));
    assert!(matches!(
        h.ledger
            .append(NewPointTransaction::new(
                person.id,
                ScopeRef::Franchise(Uuid::new_v4()),
                10,
                PointReason::Adjustment
            ))
            .await,
        Err(LoyaltyError::ScopeNotFound(_))
    ));
}

#[tokio::test]
async fn test_wallet_balances_and_coupon_counts() {
    let h = Harness::new();
    store_and_global_rules(&h).await;
    let person = h.person("11122233344");

    h.ledger
        .earn_points(earn(&h, person.id, brl(5000), "earn-1"))
        .await
        .unwrap();
    h.ledger
        .append(NewPointTransaction::new(
            person.id,
            ScopeRef::Global,
            15,
            PointReason::Adjustment,
        ))
        .await
        .unwrap();

    let offer = h.offer(10, 0).await;
    let (_, code) = h.issue_code(offer.id, person.id).await;
    h.issue(offer.id, person.id).await.unwrap();
    let reserved = h
        .attempt(&code, "caixa-1", OrderContext::new(brl(3000)))
        .await
        .unwrap();
    h.redemption
        .redeem(loyalty_engine::service::dto::RedeemRequest {
            coupon_id: reserved.coupon_id,
            idempotency_key: "wallet-redeem".to_string(),
            store_id: h.store_ref.store_id,
            session_id: "caixa-1".to_string(),
            order: None,
        })
        .await
        .unwrap();

    let points = h
        .ledger
        .get_wallet(person.id, DisplayAs::Points)
        .await
        .unwrap();
    assert_eq!(points.balances.len(), 2);
    assert!(points.balances.iter().all(|b| b.brl.is_none()));
    assert_eq!(points.coupons.len(), 1);
    assert_eq!(points.coupons[0].available, 1);
    assert_eq!(points.coupons[0].redeemed, 1);

    let wallet = h.ledger.get_wallet(person.id, DisplayAs::Brl).await.unwrap();
    let store_balance = wallet
        .balances
        .iter()
        .find(|b| b.scope == ScopeRef::Store(h.store_ref.store_id))
        .unwrap();
    assert_eq!(store_balance.points, 100);
    assert_eq!(store_balance.brl, Some(brl(5000)));

    let global_balance = wallet
        .balances
        .iter()
        .find(|b| b.scope == ScopeRef::Global)
        .unwrap();
    assert_eq!(global_balance.brl, Some(brl(1500)));
}
