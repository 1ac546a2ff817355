//! 引擎错误类型
//!
//! 区分调用方输入错误、业务规则拒绝、并发冲突与系统错误

use thiserror::Error;
use uuid::Uuid;

use crate::models::CouponStatus;

/// 错误分类，决定调用方的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 输入不合法，在获取任何锁之前拒绝
    Input,
    /// 业务规则拒绝，原样返回，不可重试
    Business,
    /// 并发冲突：ALREADY_RESERVED 可退避重试，CONFLICT 需换用新的幂等键
    Concurrency,
    /// 存储或内部错误
    System,
}

/// 引擎错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 活动与库存 ===
    #[error("活动不存在: {0}")]
    OfferNotFound(Uuid),

    #[error("活动已停用: {0}")]
    OfferInactive(Uuid),

    #[error("不在活动有效期内: offer_id={0}")]
    OutsideWindow(Uuid),

    #[error("用户不满足活动人群条件: offer_id={0}")]
    SegmentMismatch(Uuid),

    #[error("活动库存不足: offer_id={0}")]
    OutOfStock(Uuid),

    #[error("已达到每人领取上限: offer_id={offer_id}, limit={limit}")]
    QuotaExceeded { offer_id: Uuid, limit: i32 },

    #[error("新的总量低于已发放数量: requested={requested}, issued={issued}")]
    QuantityBelowIssued { requested: i32, issued: i32 },

    #[error("券类型不存在: {0}")]
    CouponTypeNotFound(Uuid),

    // === 券状态机 ===
    #[error("券不存在")]
    CouponNotFound,

    #[error("券状态不允许此操作: status={status}, operation={operation}")]
    InvalidState {
        status: CouponStatus,
        operation: &'static str,
    },

    #[error("券已被其他终端预占: coupon_id={0}")]
    AlreadyReserved(Uuid),

    #[error("券尚未预占: coupon_id={0}")]
    NotReserved(Uuid),

    #[error("预占已超时: coupon_id={0}")]
    ReservationExpired(Uuid),

    #[error("预占不属于当前终端: coupon_id={0}")]
    NotReservationOwner(Uuid),

    // === 积分 ===
    #[error("积分不足: 需要 {required}, 可用 {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("未找到适用的积分规则: store_id={0}")]
    NoRule(Uuid),

    // === 目录 ===
    #[error("用户不存在: {0}")]
    PersonNotFound(String),

    #[error("门店不存在: {0}")]
    StoreNotFound(Uuid),

    #[error("归属主体不存在: {0}")]
    ScopeNotFound(String),

    // === 幂等 ===
    #[error("幂等键已用于不同的请求: idempotency_key={0}")]
    IdempotencyConflict(String),

    // === 系统错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Input,
            Self::AlreadyReserved(_) | Self::IdempotencyConflict(_) => ErrorClass::Concurrency,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => ErrorClass::System,
            _ => ErrorClass::Business,
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::AlreadyReserved(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        self.class() != ErrorClass::System
    }

    /// 是否为"资源不存在"类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::OfferNotFound(_)
                | Self::CouponTypeNotFound(_)
                | Self::CouponNotFound
                | Self::PersonNotFound(_)
                | Self::StoreNotFound(_)
                | Self::ScopeNotFound(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::OfferNotFound(_) => "OFFER_NOT_FOUND",
            Self::OfferInactive(_) => "OFFER_INACTIVE",
            Self::OutsideWindow(_) => "OUTSIDE_WINDOW",
            Self::SegmentMismatch(_) => "SEGMENT_MISMATCH",
            Self::OutOfStock(_) => "OUT_OF_STOCK",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::QuantityBelowIssued { .. } => "QUANTITY_BELOW_ISSUED",
            Self::CouponTypeNotFound(_) => "COUPON_TYPE_NOT_FOUND",
            Self::CouponNotFound => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::AlreadyReserved(_) => "ALREADY_RESERVED",
            Self::NotReserved(_) => "NOT_RESERVED",
            Self::ReservationExpired(_) => "RESERVATION_EXPIRED",
            Self::NotReservationOwner(_) => "NOT_RESERVATION_OWNER",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::NoRule(_) => "NO_RULE",
            Self::PersonNotFound(_) => "PERSON_NOT_FOUND",
            Self::StoreNotFound(_) => "STORE_NOT_FOUND",
            Self::ScopeNotFound(_) => "SCOPE_NOT_FOUND",
            Self::IdempotencyConflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 将 PostgreSQL 的 lock_not_available（NOWAIT 失败）映射为预占冲突
    pub(crate) fn from_nowait(err: sqlx::Error, coupon_id: Uuid) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03") => {
                Self::AlreadyReserved(coupon_id)
            }
            _ => Self::Database(err),
        }
    }
}
