//! 引擎领域模型

pub mod coupon;
pub mod enums;
pub mod idempotency;
pub mod offer;
pub mod order;
pub mod person;
pub mod points;
pub mod scope;

pub use coupon::{Coupon, CouponCount, PdvActor, ReserveDecision};
pub use enums::{CouponStatus, DiscountKind, DisplayAs, PointReason, Scope};
pub use idempotency::{Claimed, IdempotencyClaim, IdempotencyRecord};
pub use offer::{CouponOffer, CouponType, NewOffer};
pub use order::{
    MAX_ORDER_TOTAL, Order, OrderContext, OrderItem, OutboxEvent, check_order_total, topics,
};
pub use person::{Person, StoreRef};
pub use points::{NewPointTransaction, PointRule, PointTransaction, ScopeBalance};
pub use scope::ScopeRef;
