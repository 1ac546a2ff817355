//! 钱包 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use loyalty_engine::PointTransaction;
use loyalty_engine::dto::WalletResponse;
use uuid::Uuid;

use crate::{
    dto::{ApiResponse, TransactionQuery, WalletQuery},
    error::ApiError,
    state::AppState,
};

/// 查询钱包：各范围积分余额与券数量
///
/// GET /api/v1/wallet/{person_id}?displayAs=points|brl
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(person_id): Path<Uuid>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<ApiResponse<WalletResponse>>, ApiError> {
    let wallet = state
        .ledger
        .get_wallet(person_id, query.display_as.unwrap_or_default())
        .await?;
    Ok(Json(ApiResponse::success(wallet)))
}

/// 查询积分流水
///
/// GET /api/v1/wallet/{person_id}/transactions?limit=50
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(person_id): Path<Uuid>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<ApiResponse<Vec<PointTransaction>>>, ApiError> {
    let transactions = state
        .ledger
        .list_transactions(person_id, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(transactions)))
}
