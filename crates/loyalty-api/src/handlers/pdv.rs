//! PDV（收银终端）API 处理器
//!
//! 验券预占、核销与积分累积

use axum::{Json, extract::State, http::HeaderMap};
use loyalty_engine::dto::{
    AttemptRequest, AttemptResponse, EarnPointsRequest, EarnPointsResponse, RedeemRequest,
    RedeemResponse,
};
use validator::Validate;

use super::idempotency_key;
use crate::{
    dto::{ApiResponse, AttemptBody, EarnPointsBody, RedeemBody},
    error::ApiError,
    state::AppState,
};

/// 验券并预占
///
/// POST /api/v1/pdv/attempt
///
/// 不满足券类型适用条件时返回 `redeemable = false`，不视为错误
pub async fn attempt(
    State(state): State<AppState>,
    Json(req): Json<AttemptBody>,
) -> Result<Json<ApiResponse<AttemptResponse>>, ApiError> {
    req.validate()?;

    let response = state
        .redemption
        .attempt(AttemptRequest {
            code: req.code,
            store_id: req.store_id,
            session_id: req.session_id,
            order: req.order,
        })
        .await?;

    Ok(Json(ApiResponse::success(response)))
}

/// 核销
///
/// POST /api/v1/pdv/redeem
pub async fn redeem(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RedeemBody>,
) -> Result<Json<ApiResponse<RedeemResponse>>, ApiError> {
    req.validate()?;
    let key = idempotency_key(&headers, req.idempotency_key)?;

    let response = state
        .redemption
        .redeem(RedeemRequest {
            coupon_id: req.coupon_id,
            idempotency_key: key,
            store_id: req.store_id,
            session_id: req.session_id,
            order: req.order,
        })
        .await?;

    Ok(Json(ApiResponse::success(response)))
}

/// 按门店规则累积积分
///
/// POST /api/v1/pdv/earn-points
pub async fn earn_points(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EarnPointsBody>,
) -> Result<Json<ApiResponse<EarnPointsResponse>>, ApiError> {
    req.validate()?;
    let key = idempotency_key(&headers, req.idempotency_key)?;

    let response = state
        .ledger
        .earn_points(EarnPointsRequest {
            person_id: req.person_id,
            national_id: req.national_id,
            store_id: req.store_id,
            order_total: req.order_total,
            idempotency_key: key,
            order: req.order,
        })
        .await?;

    Ok(Json(ApiResponse::success(response)))
}
