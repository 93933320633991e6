use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::infrastructure::db::PgPool;

/// 钱包行：每个 (user_id, currency) 至多一行，余额只由账本服务结算时变更
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    currency: &str,
) -> Result<Wallet, sqlx::Error> {
    let rec = sqlx::query_as::<_, Wallet>(
        r#"
        INSERT INTO wallets (user_id, currency)
        VALUES ($1, $2)
        RETURNING id, user_id, currency, balance, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(currency)
    .fetch_one(pool)
    .await?;
    Ok(rec)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Wallet>, sqlx::Error> {
    let rec = sqlx::query_as::<_, Wallet>(
        r#"
        SELECT id, user_id, currency, balance, created_at, updated_at
        FROM wallets
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

pub async fn get_by_user_currency(
    pool: &PgPool,
    user_id: Uuid,
    currency: &str,
) -> Result<Option<Wallet>, sqlx::Error> {
    let rec = sqlx::query_as::<_, Wallet>(
        r#"
        SELECT id, user_id, currency, balance, created_at, updated_at
        FROM wallets
        WHERE user_id = $1 AND currency = $2
        "#,
    )
    .bind(user_id)
    .bind(currency)
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

/// 行级排它锁：所有余额读-算-写序列必须先走这里
///
/// 只允许在已开启的数据库事务内调用，锁随事务提交/回滚释放。
pub async fn lock_by_id(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Wallet>, sqlx::Error> {
    let rec = sqlx::query_as::<_, Wallet>(
        r#"
        SELECT id, user_id, currency, balance, created_at, updated_at
        FROM wallets
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(rec)
}

/// 写入新余额（必须与状态更新在同一事务内）
pub async fn update_balance(
    conn: &mut PgConnection,
    id: Uuid,
    new_balance: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $1, updated_at = CURRENT_TIMESTAMP
        WHERE id = $2
        "#,
    )
    .bind(new_balance)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}
