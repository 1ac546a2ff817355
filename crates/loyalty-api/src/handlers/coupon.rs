//! 券发放与查询 API 处理器

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use loyalty_engine::Coupon;
use loyalty_engine::dto::{IssueCouponRequest, IssueCouponResponse};
use uuid::Uuid;
use validator::Validate;

use super::idempotency_key;
use crate::{
    dto::{ApiResponse, CancelCouponBody, IssueCouponBody},
    error::ApiError,
    state::AppState,
};

/// 发券
///
/// POST /api/v1/coupons/issue
pub async fn issue_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IssueCouponBody>,
) -> Result<Json<ApiResponse<IssueCouponResponse>>, ApiError> {
    req.validate()?;
    let key = idempotency_key(&headers, req.idempotency_key)?;

    let response = state
        .issuance
        .issue(IssueCouponRequest {
            offer_id: req.offer_id,
            person_id: req.person_id,
            idempotency_key: key,
        })
        .await?;

    Ok(Json(ApiResponse::success(response)))
}

/// 作废券
///
/// POST /api/v1/coupons/{id}/cancel
pub async fn cancel_coupon(
    State(state): State<AppState>,
    Path(coupon_id): Path<Uuid>,
    Json(req): Json<CancelCouponBody>,
) -> Result<Json<ApiResponse<Coupon>>, ApiError> {
    req.validate()?;

    let coupon = state
        .redemption
        .cancel(coupon_id, &req.cancelled_by)
        .await?;

    Ok(Json(ApiResponse::success_with_message(coupon, "券已作废")))
}

/// 查询券详情
///
/// GET /api/v1/coupons/{id}
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(coupon_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Coupon>>, ApiError> {
    let coupon = state.redemption.get_coupon(coupon_id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

/// 查询用户持有的券
///
/// GET /api/v1/persons/{person_id}/coupons
pub async fn list_person_coupons(
    State(state): State<AppState>,
    Path(person_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Coupon>>>, ApiError> {
    let coupons = state.redemption.list_person_coupons(person_id).await?;
    Ok(Json(ApiResponse::success(coupons)))
}
