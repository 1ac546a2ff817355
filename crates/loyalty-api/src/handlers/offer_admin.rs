//! 运营管理 API 处理器
//!
//! 券类型、活动库存与积分规则的配置

use axum::{
    Json,
    extract::{Path, State},
};
use loyalty_engine::{Clock, CouponOffer, CouponType, PointRule};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        AdjustQuantityRequest, ApiResponse, CreateCouponTypeRequest, CreateOfferRequest,
        CreatePointRuleRequest, UpdateOfferStatusRequest,
    },
    error::ApiError,
    state::AppState,
};

/// 创建券类型
///
/// POST /api/admin/coupon-types
pub async fn create_coupon_type(
    State(state): State<AppState>,
    Json(req): Json<CreateCouponTypeRequest>,
) -> Result<Json<ApiResponse<CouponType>>, ApiError> {
    req.validate()?;

    let coupon_type = state
        .inventory
        .create_coupon_type(req.into_coupon_type(state.clock.now()))
        .await?;

    Ok(Json(ApiResponse::success(coupon_type)))
}

/// 创建活动
///
/// POST /api/admin/offers
pub async fn create_offer(
    State(state): State<AppState>,
    Json(req): Json<CreateOfferRequest>,
) -> Result<Json<ApiResponse<CouponOffer>>, ApiError> {
    req.validate()?;

    let offer = state.inventory.create_offer(req.into()).await?;
    Ok(Json(ApiResponse::success(offer)))
}

/// 获取活动详情
///
/// GET /api/admin/offers/{id}
pub async fn get_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CouponOffer>>, ApiError> {
    let offer = state.inventory.get_offer(offer_id).await?;
    Ok(Json(ApiResponse::success(offer)))
}

/// 调整活动总量
///
/// PUT /api/admin/offers/{id}/quantity
pub async fn adjust_quantity(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    Json(req): Json<AdjustQuantityRequest>,
) -> Result<Json<ApiResponse<CouponOffer>>, ApiError> {
    req.validate()?;

    let offer = state
        .inventory
        .adjust_quantity(offer_id, req.initial_quantity)
        .await?;
    Ok(Json(ApiResponse::success(offer)))
}

/// 启用/停用活动
///
/// PUT /api/admin/offers/{id}/status
pub async fn update_offer_status(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    Json(req): Json<UpdateOfferStatusRequest>,
) -> Result<Json<ApiResponse<CouponOffer>>, ApiError> {
    let offer = state.inventory.set_active(offer_id, req.is_active).await?;
    Ok(Json(ApiResponse::success(offer)))
}

/// 创建积分规则
///
/// POST /api/admin/point-rules
pub async fn create_point_rule(
    State(state): State<AppState>,
    Json(req): Json<CreatePointRuleRequest>,
) -> Result<Json<ApiResponse<PointRule>>, ApiError> {
    req.validate()?;

    let rule = req.into_rule(state.clock.now());
    state.rules.create_rule(&rule).await?;

    info!(rule_id = %rule.id, scope = %rule.scope, "积分规则已创建");
    Ok(Json(ApiResponse::success(rule)))
}
