//! HTTP 层错误类型定义
//!
//! 将引擎错误按分类映射为 HTTP 状态码，并统一为 `{success, code, message, data}` 响应体

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use loyalty_engine::{ErrorClass, LoyaltyError};
use serde_json::json;

/// HTTP 层错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Engine(#[from] LoyaltyError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(err) => engine_status(err),
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Engine(err) => err.error_code(),
        }
    }
}

fn engine_status(err: &LoyaltyError) -> StatusCode {
    if err.is_not_found() {
        return StatusCode::NOT_FOUND;
    }

    match err.class() {
        ErrorClass::Input => StatusCode::BAD_REQUEST,
        ErrorClass::System => StatusCode::INTERNAL_SERVER_ERROR,
        // 预占冲突可退避重试，幂等键冲突需换新键
        ErrorClass::Concurrency => match err {
            LoyaltyError::AlreadyReserved(_) => StatusCode::LOCKED,
            _ => StatusCode::CONFLICT,
        },
        ErrorClass::Business => match err {
            LoyaltyError::OutOfStock(_)
            | LoyaltyError::QuotaExceeded { .. }
            | LoyaltyError::QuantityBelowIssued { .. }
            | LoyaltyError::InvalidState { .. }
            | LoyaltyError::NotReserved(_)
            | LoyaltyError::ReservationExpired(_)
            | LoyaltyError::NotReservationOwner(_) => StatusCode::CONFLICT,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// HTTP 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_engine::CouponStatus;
    use uuid::Uuid;

    fn engine(err: LoyaltyError) -> ApiError {
        ApiError::Engine(err)
    }

    #[test]
    fn test_status_mapping() {
        let id = Uuid::nil();
        let cases = vec![
            (engine(LoyaltyError::Validation("x".into())), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (engine(LoyaltyError::OfferNotFound(id)), StatusCode::NOT_FOUND, "OFFER_NOT_FOUND"),
            (engine(LoyaltyError::CouponNotFound), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (engine(LoyaltyError::PersonNotFound("1".into())), StatusCode::NOT_FOUND, "PERSON_NOT_FOUND"),
            (engine(LoyaltyError::OutOfStock(id)), StatusCode::CONFLICT, "OUT_OF_STOCK"),
            (
                engine(LoyaltyError::InvalidState { status: CouponStatus::Redeemed, operation: "attempt" }),
                StatusCode::CONFLICT,
                "INVALID_STATE",
            ),
            (engine(LoyaltyError::OutsideWindow(id)), StatusCode::UNPROCESSABLE_ENTITY, "OUTSIDE_WINDOW"),
            (
                engine(LoyaltyError::InsufficientPoints { required: 10, available: 1 }),
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_POINTS",
            ),
            (engine(LoyaltyError::NoRule(id)), StatusCode::UNPROCESSABLE_ENTITY, "NO_RULE"),
            (engine(LoyaltyError::AlreadyReserved(id)), StatusCode::LOCKED, "ALREADY_RESERVED"),
            (engine(LoyaltyError::IdempotencyConflict("k".into())), StatusCode::CONFLICT, "CONFLICT"),
            (engine(LoyaltyError::Internal("boom".into())), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "status for {}", code);
            assert_eq!(err.error_code(), code);
        }
    }

    #[tokio::test]
    async fn test_system_error_message_is_redacted() {
        let response = engine(LoyaltyError::Internal("连接串 postgres://secret".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn test_business_error_keeps_message() {
        let response = engine(LoyaltyError::OutOfStock(Uuid::nil())).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "OUT_OF_STOCK");
        assert!(body["message"].as_str().unwrap().contains("库存不足"));
    }
}
