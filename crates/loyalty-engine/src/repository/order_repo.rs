//! 订单与 outbox 写入
//!
//! 只在核销、积分累积的事务中调用

use sqlx::PgConnection;

use crate::error::Result;
use crate::models::{Order, OutboxEvent};

pub struct OrderRepository;

impl OrderRepository {
    pub async fn insert_in_tx(tx: &mut PgConnection, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, person_id, store_id, external_id, total, items, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id)
        .bind(order.person_id)
        .bind(order.store_id)
        .bind(&order.external_id)
        .bind(order.total)
        .bind(&order.items)
        .bind(order.created_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    pub async fn insert_outbox_in_tx(tx: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, topic, payload, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(&event.topic)
        .bind(&event.payload)
        .bind(&event.status)
        .bind(event.created_at)
        .execute(tx)
        .await?;

        Ok(())
    }
}
