//! 存活与就绪探针

use axum::{Json, extract::State, http::StatusCode};
use serde_json::json;
use tracing::warn;

use crate::{dto::HealthStatus, state::AppState};

const SERVICE_NAME: &str = "loyalty-api";

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        service: SERVICE_NAME,
        checks: None,
    })
}

/// 就绪探针：检查数据库连接是否可用，内存模式下总是就绪
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let (db_ok, checks) = match &state.database {
        Some(db) => match db.ping().await {
            Ok(latency) => (
                true,
                json!({
                    "database": "ok",
                    "latencyMs": u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    "pool": db.pool_stats(),
                }),
            ),
            Err(e) => {
                warn!(error = %e, "数据库就绪检查失败");
                (false, json!({ "database": "fail" }))
            }
        },
        None => (true, json!({ "database": "ok" })),
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthStatus {
            status: if db_ok { "ok" } else { "degraded" },
            service: SERVICE_NAME,
            checks: Some(checks),
        }),
    )
}
