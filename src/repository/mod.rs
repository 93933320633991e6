//! 持久层：原生 SQL 仓储
//! 带 FOR UPDATE 的函数只接受事务内连接，锁的生命周期由调用方事务控制

pub mod deposit_addresses;
pub mod transactions;
pub mod wallets;

pub use deposit_addresses::{CreateDepositAddressInput, DepositAddress};
pub use transactions::{CreateTransactionInput, Transaction};
pub use wallets::Wallet;
