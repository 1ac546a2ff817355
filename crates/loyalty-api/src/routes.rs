//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use loyalty_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 面向会员端与 PDV 的路由，挂载在 `/api/v1`
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // 券
        .route("/coupons/issue", post(handlers::coupon::issue_coupon))
        .route("/coupons/{id}", get(handlers::coupon::get_coupon))
        .route("/coupons/{id}/cancel", post(handlers::coupon::cancel_coupon))
        .route(
            "/persons/{person_id}/coupons",
            get(handlers::coupon::list_person_coupons),
        )
        // PDV
        .route("/pdv/attempt", post(handlers::pdv::attempt))
        .route("/pdv/redeem", post(handlers::pdv::redeem))
        .route("/pdv/earn-points", post(handlers::pdv::earn_points))
        // 钱包
        .route("/wallet/{person_id}", get(handlers::wallet::get_wallet))
        .route(
            "/wallet/{person_id}/transactions",
            get(handlers::wallet::list_transactions),
        )
}

/// 运营管理路由，挂载在 `/api/admin`
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/coupon-types",
            post(handlers::offer_admin::create_coupon_type),
        )
        .route("/offers", post(handlers::offer_admin::create_offer))
        .route("/offers/{id}", get(handlers::offer_admin::get_offer))
        .route(
            "/offers/{id}/quantity",
            put(handlers::offer_admin::adjust_quantity),
        )
        .route(
            "/offers/{id}/status",
            put(handlers::offer_admin::update_offer_status),
        )
        .route(
            "/point-rules",
            post(handlers::offer_admin::create_point_rule),
        )
}

/// 组装完整应用路由（含探针与可观测性中间件）
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", public_routes())
        .nest("/api/admin", admin_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
