use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::infrastructure::db::PgPool;

/// 充值地址行
///
/// 只追加的审计记录：行永不删除，只翻转 active 或更新 last_used_at。
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DepositAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    pub network: String,
    pub address: String,
    pub derivation_path: String,
    pub active: bool,
    pub label: Option<String>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug)]
pub struct CreateDepositAddressInput {
    pub user_id: Uuid,
    pub currency: String,
    pub network: String,
    pub address: String,
    pub derivation_path: String,
    pub label: Option<String>,
}

const COLUMNS: &str = "id, user_id, currency, network, address, derivation_path, active, \
                       label, last_used_at, created_at, updated_at";

/// 插入新地址；address 列上的唯一约束是并发下防碰撞的最终防线，
/// 冲突（23505）由调用方捕获并重试
pub async fn insert(
    pool: &PgPool,
    input: CreateDepositAddressInput,
) -> Result<DepositAddress, sqlx::Error> {
    let rec = sqlx::query_as::<_, DepositAddress>(&format!(
        r#"
        INSERT INTO deposit_addresses (user_id, currency, network, address, derivation_path, label)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(input.user_id)
    .bind(input.currency)
    .bind(input.network)
    .bind(input.address)
    .bind(input.derivation_path)
    .bind(input.label)
    .fetch_one(pool)
    .await?;
    Ok(rec)
}

/// (user, currency, network) 元组下已发出的地址数 = 下一个派生索引
pub async fn count_for_tuple(
    pool: &PgPool,
    user_id: Uuid,
    currency: &str,
    network: &str,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM deposit_addresses
        WHERE user_id = $1 AND currency = $2 AND network = $3
        "#,
    )
    .bind(user_id)
    .bind(currency)
    .bind(network)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    currency: Option<&str>,
    network: Option<&str>,
) -> Result<Vec<DepositAddress>, sqlx::Error> {
    let recs = sqlx::query_as::<_, DepositAddress>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM deposit_addresses
        WHERE user_id = $1
          AND ($2::TEXT IS NULL OR currency = $2)
          AND ($3::TEXT IS NULL OR network = $3)
        ORDER BY created_at ASC
        "#
    ))
    .bind(user_id)
    .bind(currency)
    .bind(network)
    .fetch_all(pool)
    .await?;
    Ok(recs)
}

pub async fn find_by_address(
    pool: &PgPool,
    address: &str,
) -> Result<Option<DepositAddress>, sqlx::Error> {
    let rec = sqlx::query_as::<_, DepositAddress>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM deposit_addresses
        WHERE address = $1
        "#
    ))
    .bind(address)
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

/// 事务内历史归属查询：忽略 active 标志
///
/// 持行锁的结算路径用这个，不向连接池另要连接。
pub async fn owned_by_historical(
    conn: &mut PgConnection,
    address: &str,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let (owned,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM deposit_addresses
            WHERE address = $1 AND user_id = $2
        )
        "#,
    )
    .bind(address)
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(owned)
}

/// 监控器扫描集合：全部 active 地址（跨所有用户）
pub async fn list_active(pool: &PgPool) -> Result<Vec<DepositAddress>, sqlx::Error> {
    let recs = sqlx::query_as::<_, DepositAddress>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM deposit_addresses
        WHERE active = TRUE
        ORDER BY created_at ASC
        "#
    ))
    .fetch_all(pool)
    .await?;
    Ok(recs)
}

/// 更新 last_used_at；地址不存在时影响 0 行（调用方按幂等 no-op 处理）
pub async fn mark_used(pool: &PgPool, address: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE deposit_addresses
        SET last_used_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
        WHERE address = $1
        "#,
    )
    .bind(address)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// 停用地址：后续扫描不再包含，历史归属校验仍然有效
pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE deposit_addresses
        SET active = FALSE, updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
