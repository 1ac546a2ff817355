//! 目录只读视图
//!
//! 引擎只读取用户与门店层级，实体维护由外部系统负责

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 会员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: Uuid,
    /// CPF，唯一且不可变
    pub national_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Person {
    pub fn new(national_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            national_id: national_id.into(),
            name: name.into(),
            email: None,
            phone: None,
            birth_date: None,
            gender: None,
            city: None,
            state: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// 指定日期时的周岁年龄
    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        let birth = self.birth_date?;
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age)
    }
}

/// 门店 → 加盟商 → 客户 的层级引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoreRef {
    pub store_id: Uuid,
    pub franchise_id: Uuid,
    pub customer_id: Uuid,
}
