//! 幂等层
//!
//! 写操作先走快速路径：按 `(operation, key)` 查询已完成的记录，在获取任何锁之前重放或拒绝。
//! 权威的声明由仓储在业务事务内完成（唯一索引上的插入），并发的重复请求会在索引上等待，
//! 随后重放或冲突，两个重试不可能同时生效。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{LoyaltyError, Result};
use crate::models::IdempotencyClaim;
use crate::repository::IdempotencyRepositoryTrait;

/// 幂等键最大长度
pub const MAX_KEY_LENGTH: usize = 128;

/// 操作名，与幂等键共同构成唯一约束
pub mod operations {
    pub const COUPON_ISSUE: &str = "coupon.issue";
    pub const COUPON_REDEEM: &str = "coupon.redeem";
    pub const POINTS_EARN: &str = "points.earn";
}

/// `begin` 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// 需要执行，携带声明交给仓储的原子单元
    Proceed(IdempotencyClaim),
    /// 直接重放已保存的响应
    Replay(serde_json::Value),
}

/// 快速路径的检查结果
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck {
    /// 未见过的键（或记录已过期）
    Fresh,
    /// 同一请求体，返回首次执行的响应
    Replay(serde_json::Value),
    /// 同一键被用于不同的请求体
    Conflict,
}

pub struct IdempotencyLayer {
    repo: Arc<dyn IdempotencyRepositoryTrait>,
    ttl: Duration,
}

impl IdempotencyLayer {
    pub fn new(repo: Arc<dyn IdempotencyRepositoryTrait>, ttl: Duration) -> Self {
        Self { repo, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn validate_key(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(LoyaltyError::Validation("幂等键不能为空".to_string()));
        }
        if key.chars().count() > MAX_KEY_LENGTH {
            return Err(LoyaltyError::Validation(format!(
                "幂等键长度不能超过 {} 个字符",
                MAX_KEY_LENGTH
            )));
        }
        Ok(())
    }

    /// 请求体指纹：规范化 JSON（键按字典序）的 SHA-256 十六进制
    pub fn fingerprint<T: Serialize>(body: &T) -> Result<String> {
        let canonical = serde_json::to_value(body)?.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub async fn check(
        &self,
        operation: &str,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyCheck> {
        let record = match self.repo.find(operation, key).await? {
            Some(record) if !record.is_expired(now) => record,
            _ => return Ok(IdempotencyCheck::Fresh),
        };

        if record.request_hash == fingerprint {
            Ok(IdempotencyCheck::Replay(record.response))
        } else {
            Ok(IdempotencyCheck::Conflict)
        }
    }

    pub fn claim(
        &self,
        operation: &str,
        key: &str,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> IdempotencyClaim {
        IdempotencyClaim {
            operation: operation.to_string(),
            key: key.to_string(),
            request_hash: fingerprint,
            created_at: now,
            expires_at: now + self.ttl,
        }
    }

    /// 校验键、计算指纹并走快速路径
    pub async fn begin<T: Serialize>(
        &self,
        operation: &str,
        key: &str,
        body: &T,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        Self::validate_key(key)?;
        let fingerprint = Self::fingerprint(body)?;

        match self.check(operation, key, &fingerprint, now).await? {
            IdempotencyCheck::Fresh => Ok(Admission::Proceed(self.claim(
                operation,
                key,
                fingerprint,
                now,
            ))),
            IdempotencyCheck::Replay(response) => Ok(Admission::Replay(response)),
            IdempotencyCheck::Conflict => Err(LoyaltyError::IdempotencyConflict(key.to_string())),
        }
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64> {
        self.repo.purge_expired(now, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdempotencyRecord;
    use crate::repository::MockIdempotencyRepositoryTrait;
    use serde_json::json;

    fn record(request_hash: &str, now: DateTime<Utc>, ttl_hours: i64) -> IdempotencyRecord {
        IdempotencyRecord {
            operation: operations::COUPON_REDEEM.to_string(),
            key: "k1".to_string(),
            request_hash: request_hash.to_string(),
            response: json!({"ok": true}),
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
        }
    }

    #[test]
    fn test_validate_key() {
        assert!(IdempotencyLayer::validate_key("abc").is_ok());
        assert!(IdempotencyLayer::validate_key("   ").is_err());
        assert!(IdempotencyLayer::validate_key(&"x".repeat(128)).is_ok());
        assert!(IdempotencyLayer::validate_key(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = IdempotencyLayer::fingerprint(&json!({"a": 1, "b": [1, 2]})).unwrap();
        let b = IdempotencyLayer::fingerprint(&json!({"b": [1, 2], "a": 1})).unwrap();
        let c = IdempotencyLayer::fingerprint(&json!({"a": 2, "b": [1, 2]})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_check_replay_and_conflict() {
        let now = Utc::now();
        let mut repo = MockIdempotencyRepositoryTrait::new();
        repo.expect_find()
            .returning(move |_, _| Ok(Some(record("h1", now, 24))));
        let layer = IdempotencyLayer::new(Arc::new(repo), Duration::hours(24));

        let same = layer
            .check(operations::COUPON_REDEEM, "k1", "h1", now)
            .await
            .unwrap();
        assert_eq!(same, IdempotencyCheck::Replay(json!({"ok": true})));

        let other = layer
            .check(operations::COUPON_REDEEM, "k1", "h2", now)
            .await
            .unwrap();
        assert_eq!(other, IdempotencyCheck::Conflict);
    }

    #[tokio::test]
    async fn test_expired_record_is_fresh() {
        let now = Utc::now();
        let mut repo = MockIdempotencyRepositoryTrait::new();
        repo.expect_find()
            .returning(move |_, _| Ok(Some(record("h1", now - Duration::hours(48), 24))));
        let layer = IdempotencyLayer::new(Arc::new(repo), Duration::hours(24));

        let result = layer
            .check(operations::COUPON_REDEEM, "k1", "h2", now)
            .await
            .unwrap();
        assert_eq!(result, IdempotencyCheck::Fresh);
    }

    #[tokio::test]
    async fn test_begin_conflict_is_error() {
        let now = Utc::now();
        let mut repo = MockIdempotencyRepositoryTrait::new();
        repo.expect_find()
            .returning(move |_, _| Ok(Some(record("other", now, 24))));
        let layer = IdempotencyLayer::new(Arc::new(repo), Duration::hours(24));

        let result = layer
            .begin(operations::COUPON_REDEEM, "k1", &json!({"a": 1}), now)
            .await;
        assert!(matches!(result, Err(LoyaltyError::IdempotencyConflict(_))));
    }

    #[tokio::test]
    async fn test_begin_fresh_builds_claim() {
        let now = Utc::now();
        let mut repo = MockIdempotencyRepositoryTrait::new();
        repo.expect_find().returning(|_, _| Ok(None));
        let layer = IdempotencyLayer::new(Arc::new(repo), Duration::hours(24));

        let admission = layer
            .begin(operations::POINTS_EARN, "k1", &json!({"a": 1}), now)
            .await
            .unwrap();
        let Admission::Proceed(claim) = admission else {
            panic!("首次请求应当执行");
        };
        assert_eq!(claim.operation, operations::POINTS_EARN);
        assert_eq!(claim.expires_at, now + Duration::hours(24));
    }
}
