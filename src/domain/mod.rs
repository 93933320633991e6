//! 领域层：纯逻辑，无 I/O

pub mod asset;
pub mod derivation;
pub mod transaction_status;

pub use asset::{ensure_supported_pair, Currency, Network};
pub use derivation::{account_index_for_user, DerivationEngine, DerivedAddress, MasterSeed};
pub use transaction_status::{TransactionStatus, TransactionType};
