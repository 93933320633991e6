pub mod address_registry;
pub mod chain_monitor;
pub mod ledger;
pub mod tron_client;
