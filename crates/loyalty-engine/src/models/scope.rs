//! 归属引用
//!
//! `(scope, scope_id)` 组合的强类型表示：除 `Global` 外必须携带对应主体的 ID。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Scope;
use crate::error::{LoyaltyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ScopeRefParts", into = "ScopeRefParts")]
pub enum ScopeRef {
    Global,
    Customer(Uuid),
    Franchise(Uuid),
    Store(Uuid),
}

/// JSON 表示：`{"scope": "STORE", "scopeId": "..."}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeRefParts {
    scope: Scope,
    #[serde(default)]
    scope_id: Option<Uuid>,
}

impl ScopeRef {
    /// 从数据库列组合构造，校验 ID 与 scope 标签匹配
    pub fn from_parts(scope: Scope, scope_id: Option<Uuid>) -> Result<Self> {
        match (scope, scope_id) {
            (Scope::Global, None) => Ok(Self::Global),
            (Scope::Customer, Some(id)) => Ok(Self::Customer(id)),
            (Scope::Franchise, Some(id)) => Ok(Self::Franchise(id)),
            (Scope::Store, Some(id)) => Ok(Self::Store(id)),
            (Scope::Global, Some(_)) => Err(LoyaltyError::Validation(
                "GLOBAL 范围不能携带 scope_id".to_string(),
            )),
            (scope, None) => Err(LoyaltyError::Validation(format!(
                "{} 范围必须携带 scope_id",
                scope
            ))),
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Global => Scope::Global,
            Self::Customer(_) => Scope::Customer,
            Self::Franchise(_) => Scope::Franchise,
            Self::Store(_) => Scope::Store,
        }
    }

    pub fn scope_id(&self) -> Option<Uuid> {
        match self {
            Self::Global => None,
            Self::Customer(id) | Self::Franchise(id) | Self::Store(id) => Some(*id),
        }
    }

    /// 按 (customer_id, franchise_id, store_id) 列展开，用于积分规则表
    pub fn rule_columns(&self) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        match *self {
            Self::Global => (None, None, None),
            Self::Customer(id) => (Some(id), None, None),
            Self::Franchise(id) => (None, Some(id), None),
            Self::Store(id) => (None, None, Some(id)),
        }
    }

    /// 用于 advisory lock 和日志的稳定键
    pub fn lock_key(&self, person_id: Uuid) -> String {
        match self.scope_id() {
            Some(id) => format!("points:{}:{}:{}", person_id, self.scope(), id),
            None => format!("points:{}:{}", person_id, self.scope()),
        }
    }
}

impl TryFrom<ScopeRefParts> for ScopeRef {
    type Error = LoyaltyError;

    fn try_from(parts: ScopeRefParts) -> Result<Self> {
        Self::from_parts(parts.scope, parts.scope_id)
    }
}

impl From<ScopeRef> for ScopeRefParts {
    fn from(value: ScopeRef) -> Self {
        Self {
            scope: value.scope(),
            scope_id: value.scope_id(),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope_id() {
            Some(id) => write!(f, "{}:{}", self.scope(), id),
            None => write!(f, "{}", self.scope()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_validation() {
        let id = Uuid::new_v4();
        assert_eq!(
            ScopeRef::from_parts(Scope::Store, Some(id)).unwrap(),
            ScopeRef::Store(id)
        );
        assert_eq!(
            ScopeRef::from_parts(Scope::Global, None).unwrap(),
            ScopeRef::Global
        );
        assert!(ScopeRef::from_parts(Scope::Global, Some(id)).is_err());
        assert!(ScopeRef::from_parts(Scope::Franchise, None).is_err());
    }

    #[test]
    fn test_json_representation() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(ScopeRef::Franchise(id)).unwrap();
        assert_eq!(value["scope"], "FRANCHISE");
        assert_eq!(value["scopeId"], id.to_string());

        let parsed: ScopeRef = serde_json::from_value(json!({"scope": "GLOBAL"})).unwrap();
        assert_eq!(parsed, ScopeRef::Global);

        let invalid = serde_json::from_value::<ScopeRef>(json!({"scope": "STORE"}));
        assert!(invalid.is_err());
    }
}
