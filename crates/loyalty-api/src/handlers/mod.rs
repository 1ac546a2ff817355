//! HTTP 请求处理器

pub mod coupon;
pub mod health;
pub mod offer_admin;
pub mod pdv;
pub mod wallet;

use axum::http::HeaderMap;

use crate::error::ApiError;

/// 幂等键请求头
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// 取幂等键：请求头优先，其次请求体
pub(crate) fn idempotency_key(
    headers: &HeaderMap,
    body_key: Option<String>,
) -> Result<String, ApiError> {
    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    header_key
        .or(body_key)
        .ok_or_else(|| ApiError::Validation("缺少幂等键 (Idempotency-Key)".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("from-header"));
        let key = idempotency_key(&headers, Some("from-body".to_string())).unwrap();
        assert_eq!(key, "from-header");
    }

    #[test]
    fn test_body_key_fallback() {
        let key = idempotency_key(&HeaderMap::new(), Some("from-body".to_string())).unwrap();
        assert_eq!(key, "from-body");
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = idempotency_key(&HeaderMap::new(), None).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
