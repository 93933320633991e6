//! 统一错误类型
//! 资金相关操作绝不吞错：余额变动路径上的任何失败都必须显式向上传播

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// 核心业务错误
#[derive(Debug, Error)]
pub enum CoreError {
    /// 请求的币种/网络组合未开放
    #[error("unsupported asset: {currency}/{network}")]
    UnsupportedAsset { currency: String, network: String },

    /// 请求的充值网络未开放
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// 密钥派生失败（对单次请求致命，对进程不致命）
    #[error("address derivation failed: {0}")]
    DerivationFailed(String),

    /// 幂等保护：同一链上哈希只能产生一笔交易
    #[error("duplicate transaction for hash {0}")]
    DuplicateTransaction(String),

    /// 用户没有对应币种的钱包
    #[error("wallet not found for user {user_id} currency {currency}")]
    WalletNotFound { user_id: Uuid, currency: String },

    /// (用户, 币种) 钱包已存在
    #[error("wallet already exists for user {user_id} currency {currency}")]
    WalletAlreadyExists { user_id: Uuid, currency: String },

    /// 审批时余额不足（提交之后余额可能已被其他审批消耗）
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    /// 交易不在 pending 状态，不可再转换
    #[error("transaction {0} is not pending")]
    NotPending(Uuid),

    /// 资源不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 交易不属于该用户
    #[error("transaction {transaction_id} does not belong to user {user_id}")]
    NotOwner {
        transaction_id: Uuid,
        user_id: Uuid,
    },

    /// 金额非法（必须是正的十进制字符串）
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// 提现目标地址非法（不能为空白）
    #[error("invalid withdrawal destination: {0:?}")]
    InvalidDestination(String),

    /// 拒绝原因不能为空
    #[error("rejection reason must not be empty")]
    EmptyReason,

    /// 外部链网络瞬时故障（记录日志后下个周期重试，永不致命）
    #[error("external network error: {0}")]
    ExternalNetwork(String),

    /// 数据库错误
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    /// 是否为唯一约束冲突（PostgreSQL 23505）
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                db_err.code().map(|code| code == "23505").unwrap_or(false)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnsupportedNetwork("ERC20".into());
        assert_eq!(err.to_string(), "unsupported network: ERC20");

        let err = CoreError::DuplicateTransaction("0xAA".into());
        assert!(err.to_string().contains("0xAA"));
    }

    #[test]
    fn test_insufficient_funds_display() {
        let err = CoreError::InsufficientFunds {
            available: Decimal::new(40, 0),
            requested: Decimal::new(60, 0),
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: available 40, requested 60"
        );
    }
}
