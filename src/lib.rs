//! VaultCore - 托管账本核心
//!
//! TRC20 充值地址派生 + 链上入账监控 + 审批制账本。
//! 余额只在审批事务内变动，链上哈希全局幂等。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;

// 重新导出常用类型
pub use error::CoreError;

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{Currency, DerivationEngine, MasterSeed, Network, TransactionStatus},
        error::CoreError,
        service::{
            address_registry::AddressRegistry, chain_monitor::ChainMonitor,
            ledger::LedgerService, tron_client::TronClient,
        },
    };
}
