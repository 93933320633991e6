//! 统一交易状态定义
//! 余额只在 pending → approved 的结算瞬间变动，三个终态均不可再转换

use std::fmt;

use serde::{Deserialize, Serialize};

/// 交易状态机
///
/// pending → approved | rejected | cancelled，三者皆为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// 等待人工审批
    Pending,

    /// 审批通过，余额已变动
    Approved,

    /// 审批拒绝（带原因），余额无变动
    Rejected,

    /// 用户主动取消，余额无变动
    Cancelled,
}

impl TransactionStatus {
    /// 是否为最终状态（不可再转换）
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// 验证状态转换合法性
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use TransactionStatus::*;

        match (self, target) {
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) => true,
            // 终态不可转换，pending 不可自转换
            _ => false,
        }
    }

    /// 转换为数据库字符串
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// 交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_reaches_all_terminals() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(&Approved));
        assert!(Pending.can_transition_to(&Rejected));
        assert!(Pending.can_transition_to(&Cancelled));
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        use TransactionStatus::*;

        for terminal in [Approved, Rejected, Cancelled] {
            assert!(terminal.is_final());
            for target in [Pending, Approved, Rejected, Cancelled] {
                assert!(!terminal.can_transition_to(&target));
            }
        }
    }

    #[test]
    fn test_pending_cannot_self_transition() {
        assert!(!TransactionStatus::Pending.can_transition_to(&TransactionStatus::Pending));
        assert!(!TransactionStatus::Pending.is_final());
    }

    #[test]
    fn test_db_string_roundtrip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Approved,
            TransactionStatus::Rejected,
            TransactionStatus::Cancelled,
        ] {
            assert_eq!(
                TransactionStatus::from_db_str(status.as_db_str()),
                Some(status)
            );
        }
        assert_eq!(TransactionStatus::from_db_str("confirmed"), None);
    }

    #[test]
    fn test_tx_type_roundtrip() {
        assert_eq!(
            TransactionType::from_db_str("deposit"),
            Some(TransactionType::Deposit)
        );
        assert_eq!(
            TransactionType::from_db_str("withdrawal"),
            Some(TransactionType::Withdrawal)
        );
        assert_eq!(TransactionType::from_db_str("swap"), None);
    }
}
