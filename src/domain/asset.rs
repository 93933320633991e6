//! 币种与网络定义
//! 托管充值目前只开放 USDT/TRC20，其余组合在入口处拒绝

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// 支持的币种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Usdt,
}

impl Currency {
    /// 转换为数据库字符串
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Usdt => "USDT",
        }
    }

    /// 从字符串解析（大小写不敏感）
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_uppercase().as_str() {
            "USDT" => Ok(Self::Usdt),
            other => Err(CoreError::UnsupportedAsset {
                currency: other.to_string(),
                network: "*".to_string(),
            }),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// 支持的充值网络
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Trc20,
}

impl Network {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Trc20 => "TRC20",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_uppercase().as_str() {
            "TRC20" => Ok(Self::Trc20),
            other => Err(CoreError::UnsupportedNetwork(other.to_string())),
        }
    }

    /// BIP44 coin type（TRON = 195）
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Trc20 => 195,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// 校验 (币种, 网络) 组合是否开放充值
pub fn ensure_supported_pair(currency: Currency, network: Network) -> Result<(), CoreError> {
    match (currency, network) {
        (Currency::Usdt, Network::Trc20) => Ok(()),
    }
}
