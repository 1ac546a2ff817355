//! 目录只读仓储
//!
//! 用户、客户、加盟商、门店由外部系统维护，这里只做查询

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::DirectoryRepositoryTrait;
use crate::error::Result;
use crate::models::{Person, ScopeRef, StoreRef};

pub struct DirectoryRepository {
    pool: PgPool,
}

impl DirectoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
        let person = sqlx::query_as::<_, Person>(
            r#"
            SELECT id, national_id, name, email, phone, birth_date, gender, city, state,
                   tags, created_at
            FROM persons
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(person)
    }

    pub async fn get_person_by_national_id(&self, national_id: &str) -> Result<Option<Person>> {
        let person = sqlx::query_as::<_, Person>(
            r#"
            SELECT id, national_id, name, email, phone, birth_date, gender, city, state,
                   tags, created_at
            FROM persons
            WHERE national_id = $1
            "#,
        )
        .bind(national_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(person)
    }

    pub async fn get_store(&self, store_id: Uuid) -> Result<Option<StoreRef>> {
        let store = sqlx::query_as::<_, StoreRef>(
            r#"
            SELECT s.id AS store_id, s.franchise_id, f.customer_id
            FROM stores s
            JOIN franchises f ON f.id = s.franchise_id
            WHERE s.id = $1
            "#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(store)
    }

    pub async fn get_franchise_customer(&self, franchise_id: Uuid) -> Result<Option<Uuid>> {
        let customer_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT customer_id FROM franchises WHERE id = $1",
        )
        .bind(franchise_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer_id)
    }

    pub async fn scope_exists(&self, scope: ScopeRef) -> Result<bool> {
        let sql = match scope {
            ScopeRef::Global => return Ok(true),
            ScopeRef::Customer(_) => "SELECT EXISTS(SELECT 1 FROM customers WHERE id = $1)",
            ScopeRef::Franchise(_) => "SELECT EXISTS(SELECT 1 FROM franchises WHERE id = $1)",
            ScopeRef::Store(_) => "SELECT EXISTS(SELECT 1 FROM stores WHERE id = $1)",
        };

        let exists: bool = sqlx::query_scalar(sql)
            .bind(scope.scope_id())
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }
}

#[async_trait]
impl DirectoryRepositoryTrait for DirectoryRepository {
    async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
        self.get_person(id).await
    }

    async fn get_person_by_national_id(&self, national_id: &str) -> Result<Option<Person>> {
        self.get_person_by_national_id(national_id).await
    }

    async fn get_store(&self, store_id: Uuid) -> Result<Option<StoreRef>> {
        self.get_store(store_id).await
    }

    async fn get_franchise_customer(&self, franchise_id: Uuid) -> Result<Option<Uuid>> {
        self.get_franchise_customer(franchise_id).await
    }

    async fn scope_exists(&self, scope: ScopeRef) -> Result<bool> {
        self.scope_exists(scope).await
    }
}
