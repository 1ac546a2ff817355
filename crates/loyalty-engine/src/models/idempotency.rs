//! 幂等记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{LoyaltyError, Result};

/// 已完成请求的幂等记录，键为 `(operation, key)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub operation: String,
    #[sqlx(rename = "idempotency_key")]
    pub key: String,
    /// 请求体指纹（规范化 JSON 的 SHA-256）
    pub request_hash: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 同一键的重复请求：请求体一致则重放，否则冲突
    pub fn replay_for<T: DeserializeOwned>(&self, claim: &IdempotencyClaim) -> Result<Claimed<T>> {
        if self.request_hash != claim.request_hash {
            return Err(LoyaltyError::IdempotencyConflict(claim.key.clone()));
        }
        Claimed::replay_from(self)
    }
}

/// 写操作携带的幂等声明，与业务变更在同一原子单元内落库
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    pub operation: String,
    pub key: String,
    pub request_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyClaim {
    pub fn record(&self, response: serde_json::Value) -> IdempotencyRecord {
        IdempotencyRecord {
            operation: self.operation.clone(),
            key: self.key.clone(),
            request_hash: self.request_hash.clone(),
            response,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// 幂等写操作的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Claimed<T> {
    /// 首次执行
    Fresh(T),
    /// 重复请求，返回首次执行的结果，未产生新的副作用
    Replay(T),
}

impl<T> Claimed<T> {
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Fresh(v) | Self::Replay(v) => v,
        }
    }
}

impl<T: DeserializeOwned> Claimed<T> {
    pub fn replay_from(record: &IdempotencyRecord) -> Result<Self> {
        Ok(Self::Replay(serde_json::from_value(record.response.clone())?))
    }
}
