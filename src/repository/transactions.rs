use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::infrastructure::db::PgPool;

/// 交易行
///
/// 每笔链上/提现动作只创建一次；除 status、rejection_reason、updated_at
/// 外的字段不可变。external_ref 对充值是链上哈希，对提现是目标地址。
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub wallet_id: Uuid,
    pub tx_type: String,
    pub currency: String,
    pub amount: Decimal,
    pub external_ref: String,
    pub status: String,
    pub deposit_address: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug)]
pub struct CreateTransactionInput {
    pub user_id: Uuid,
    pub wallet_id: Uuid,
    pub tx_type: String,
    pub currency: String,
    pub amount: Decimal,
    pub external_ref: String,
    pub deposit_address: Option<String>,
}

const COLUMNS: &str = "id, user_id, wallet_id, tx_type, currency, amount, external_ref, \
                       status, deposit_address, rejection_reason, created_at, updated_at";

/// 插入一笔 pending 交易（在调用方事务内执行）
///
/// 充值哈希的唯一性由 (external_ref WHERE tx_type='deposit') 部分唯一索引
/// 兜底，冲突以 23505 暴露给调用方。
pub async fn insert_pending(
    conn: &mut PgConnection,
    input: CreateTransactionInput,
) -> Result<Transaction, sqlx::Error> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        INSERT INTO transactions
            (user_id, wallet_id, tx_type, currency, amount, external_ref, deposit_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(input.user_id)
    .bind(input.wallet_id)
    .bind(input.tx_type)
    .bind(input.currency)
    .bind(input.amount)
    .bind(input.external_ref)
    .bind(input.deposit_address)
    .fetch_one(conn)
    .await?;
    Ok(rec)
}

/// 同一链上哈希是否已记账（事务内检查，配合唯一索引做幂等保护）
pub async fn deposit_hash_exists(
    conn: &mut PgConnection,
    tx_hash: &str,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM transactions
            WHERE tx_type = 'deposit' AND external_ref = $1
        )
        "#,
    )
    .bind(tx_hash)
    .fetch_one(conn)
    .await?;
    Ok(exists)
}

/// 某地址名下已记账的充值哈希集合（监控器去重用）
pub async fn recorded_hashes_for_address(
    pool: &PgPool,
    address: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT external_ref FROM transactions
        WHERE tx_type = 'deposit' AND deposit_address = $1
        "#,
    )
    .bind(address)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(h,)| h).collect())
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>, sqlx::Error> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM transactions
        WHERE id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

/// 行级排它锁：结算/拒绝/取消的读-查-写序列必须先锁交易行
///
/// 并发审批同一笔交易时，后到者在此阻塞，拿到锁后看到终态即失败。
pub async fn lock_by_id(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Transaction>, sqlx::Error> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM transactions
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(rec)
}

/// 写入新状态（必须与余额更新在同一事务内）
pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: &str,
    rejection_reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET status = $1, rejection_reason = $2, updated_at = CURRENT_TIMESTAMP
        WHERE id = $3
        "#,
    )
    .bind(status)
    .bind(rejection_reason)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// 某钱包的待审批提现，按提交时间升序（准入视图按此顺序扣减）
pub async fn list_pending_withdrawals_for_wallet(
    pool: &PgPool,
    wallet_id: Uuid,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let recs = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM transactions
        WHERE wallet_id = $1 AND tx_type = 'withdrawal' AND status = 'pending'
        ORDER BY created_at ASC
        "#
    ))
    .bind(wallet_id)
    .fetch_all(pool)
    .await?;
    Ok(recs)
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let recs = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM transactions
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(recs)
}
