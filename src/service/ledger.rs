//! 账本服务：交易与钱包余额状态机
//!
//! 余额变更的唯一权威。每条变更路径（充值结算、提现结算、拒绝、取消、
//! 监控器记账）都在单个数据库事务内完成状态检查、余额运算和落库，
//! 事务内先对交易行和钱包行取排它锁，读-查-写序列全程串行化。
//! 金额全程 Decimal，绝不经过二进制浮点。

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    domain::{Currency, TransactionStatus, TransactionType},
    error::CoreError,
    infrastructure::{
        db::PgPool,
        event_bus::{DomainEvent, EventBus},
    },
    repository::{
        deposit_addresses,
        transactions::{self, CreateTransactionInput, Transaction},
        wallets::{self, Wallet},
    },
    service::address_registry::AddressRegistry,
};

/// 提现准入视图的一行
#[derive(Debug, Clone)]
pub struct WithdrawalAdmission {
    pub transaction: Transaction,
    /// 按提交顺序扣减后余额仍非负，才建议放行
    pub approvable: bool,
    /// 该笔扣减后的运行余额
    pub running_balance: Decimal,
}

pub struct LedgerService {
    pool: PgPool,
    registry: Arc<AddressRegistry>,
    events: Arc<dyn EventBus>,
}

impl LedgerService {
    pub fn new(pool: PgPool, registry: Arc<AddressRegistry>, events: Arc<dyn EventBus>) -> Self {
        Self {
            pool,
            registry,
            events,
        }
    }

    // ============ 钱包 ============

    /// 开通 (用户, 币种) 钱包，余额为零
    pub async fn open_wallet(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Wallet, CoreError> {
        match wallets::create(&self.pool, user_id, currency.as_db_str()).await {
            Ok(w) => Ok(w),
            Err(e) if CoreError::is_unique_violation(&e) => Err(CoreError::WalletAlreadyExists {
                user_id,
                currency: currency.as_db_str().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_wallet(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Wallet, CoreError> {
        wallets::get_by_user_currency(&self.pool, user_id, currency.as_db_str())
            .await?
            .ok_or(CoreError::WalletNotFound {
                user_id,
                currency: currency.as_db_str().to_string(),
            })
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, CoreError> {
        let recs = transactions::list_for_user(&self.pool, user_id, limit, offset).await?;
        Ok(recs)
    }

    // ============ 记账 ============

    /// 监控器检测到链上转账后记一笔 pending 充值，余额此时不动
    ///
    /// 同一哈希只能产生一笔交易：事务内先查再插，部分唯一索引兜底。
    pub async fn record_deposit(
        &self,
        user_id: Uuid,
        address: &str,
        tx_hash: &str,
        amount: Decimal,
        currency: Currency,
    ) -> Result<Transaction, CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidAmount(amount.to_string()));
        }

        let wallet = self.get_wallet(user_id, currency).await?;

        let mut db_tx = self.pool.begin().await?;

        if transactions::deposit_hash_exists(&mut db_tx, tx_hash).await? {
            return Err(CoreError::DuplicateTransaction(tx_hash.to_string()));
        }

        let input = CreateTransactionInput {
            user_id,
            wallet_id: wallet.id,
            tx_type: TransactionType::Deposit.as_db_str().to_string(),
            currency: currency.as_db_str().to_string(),
            amount,
            external_ref: tx_hash.to_string(),
            deposit_address: Some(address.to_string()),
        };

        let row = match transactions::insert_pending(&mut db_tx, input).await {
            Ok(row) => row,
            // 并发下两个周期同时记同一哈希：唯一索引只放一个过
            Err(e) if CoreError::is_unique_violation(&e) => {
                return Err(CoreError::DuplicateTransaction(tx_hash.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %row.id,
            tx_hash = %tx_hash,
            amount = %amount,
            "Recorded pending deposit"
        );

        self.publish_best_effort(DomainEvent::DepositDetected {
            transaction_id: row.id,
            wallet_id: row.wallet_id,
            amount: row.amount,
            currency: row.currency.clone(),
            status: row.status.clone(),
            detected_at: row.created_at,
        })
        .await;
        self.publish_pending_broadcast(&row).await;

        Ok(row)
    }

    /// 提交提现申请：校验金额、记 pending，余额此时不扣
    pub async fn submit_withdrawal(
        &self,
        user_id: Uuid,
        wallet_id: Uuid,
        amount_str: &str,
        destination: &str,
    ) -> Result<Transaction, CoreError> {
        let amount = parse_amount(amount_str)?;
        let destination = parse_destination(destination)?;

        let wallet = wallets::get_by_id(&self.pool, wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("wallet {}", wallet_id)))?;

        if wallet.user_id != user_id {
            return Err(CoreError::NotFound(format!("wallet {}", wallet_id)));
        }

        // 提交时的余额校验是建议性的；权威校验在审批事务内再做一次
        if amount > wallet.balance {
            return Err(CoreError::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            });
        }

        let mut db_tx = self.pool.begin().await?;

        let input = CreateTransactionInput {
            user_id,
            wallet_id,
            tx_type: TransactionType::Withdrawal.as_db_str().to_string(),
            currency: wallet.currency.clone(),
            amount,
            external_ref: destination.to_string(),
            deposit_address: None,
        };

        let row = transactions::insert_pending(&mut db_tx, input).await?;
        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %row.id,
            wallet_id = %wallet_id,
            amount = %amount,
            "Submitted withdrawal for approval"
        );

        self.publish_pending_broadcast(&row).await;

        Ok(row)
    }

    // ============ 结算 ============

    /// 审批通过一笔充值：归属复核、入账、置 approved，原子完成
    pub async fn approve_deposit(&self, transaction_id: Uuid) -> Result<Transaction, CoreError> {
        let mut db_tx = self.pool.begin().await?;

        let row = transactions::lock_by_id(&mut db_tx, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))?;

        ensure_pending(&row)?;
        ensure_type(&row, TransactionType::Deposit)?;

        // 归属复核走历史记录：地址在充值到达后被停用不影响结算。
        // 在当前事务连接上查询——持行锁期间不向连接池另要连接
        if let Some(address) = row.deposit_address.as_deref() {
            let owned =
                deposit_addresses::owned_by_historical(&mut db_tx, address, row.user_id).await?;
            if !owned {
                return Err(CoreError::NotOwner {
                    transaction_id,
                    user_id: row.user_id,
                });
            }
        }

        let wallet = wallets::lock_by_id(&mut db_tx, row.wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("wallet {}", row.wallet_id)))?;

        let new_balance = wallet.balance + row.amount;

        wallets::update_balance(&mut db_tx, wallet.id, new_balance).await?;
        transactions::set_status(
            &mut db_tx,
            transaction_id,
            TransactionStatus::Approved.as_db_str(),
            None,
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            wallet_id = %wallet.id,
            amount = %row.amount,
            new_balance = %new_balance,
            "Deposit approved and credited"
        );

        if let Some(address) = row.deposit_address.as_deref() {
            // 事务外更新 last_used_at，失败不影响已提交的结算
            if let Err(e) = self.registry.mark_used(address).await {
                tracing::warn!(address = %address, error = %e, "Failed to bump last_used");
            }
        }

        self.publish_settled(&row, TransactionStatus::Approved, None)
            .await;

        transactions::get_by_id(&self.pool, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))
    }

    /// 审批通过一笔提现：在锁内重读余额——提交后余额可能已被其他审批
    /// 消耗，审批时刻的余额才算数
    pub async fn approve_withdrawal(
        &self,
        transaction_id: Uuid,
    ) -> Result<Transaction, CoreError> {
        let mut db_tx = self.pool.begin().await?;

        let row = transactions::lock_by_id(&mut db_tx, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))?;

        ensure_pending(&row)?;
        ensure_type(&row, TransactionType::Withdrawal)?;

        let wallet = wallets::lock_by_id(&mut db_tx, row.wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("wallet {}", row.wallet_id)))?;

        if row.amount > wallet.balance {
            return Err(CoreError::InsufficientFunds {
                available: wallet.balance,
                requested: row.amount,
            });
        }

        let new_balance = wallet.balance - row.amount;

        wallets::update_balance(&mut db_tx, wallet.id, new_balance).await?;
        transactions::set_status(
            &mut db_tx,
            transaction_id,
            TransactionStatus::Approved.as_db_str(),
            None,
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            wallet_id = %wallet.id,
            amount = %row.amount,
            new_balance = %new_balance,
            "Withdrawal approved and debited"
        );

        self.publish_settled(&row, TransactionStatus::Approved, None)
            .await;

        transactions::get_by_id(&self.pool, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))
    }

    /// 拒绝：必须给出非空原因，余额无变动
    pub async fn reject(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Transaction, CoreError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::EmptyReason);
        }

        let mut db_tx = self.pool.begin().await?;

        let row = transactions::lock_by_id(&mut db_tx, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))?;

        ensure_pending(&row)?;

        transactions::set_status(
            &mut db_tx,
            transaction_id,
            TransactionStatus::Rejected.as_db_str(),
            Some(reason),
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            reason = %reason,
            "Transaction rejected"
        );

        self.publish_settled(&row, TransactionStatus::Rejected, Some(reason.to_string()))
            .await;

        transactions::get_by_id(&self.pool, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))
    }

    /// 用户取消自己的 pending 交易，余额无变动
    pub async fn cancel(
        &self,
        transaction_id: Uuid,
        by_user_id: Uuid,
    ) -> Result<Transaction, CoreError> {
        let mut db_tx = self.pool.begin().await?;

        let row = transactions::lock_by_id(&mut db_tx, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))?;

        if row.user_id != by_user_id {
            return Err(CoreError::NotOwner {
                transaction_id,
                user_id: by_user_id,
            });
        }

        ensure_pending(&row)?;

        let reason = "cancelled by user";
        transactions::set_status(
            &mut db_tx,
            transaction_id,
            TransactionStatus::Cancelled.as_db_str(),
            Some(reason),
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            user_id = %by_user_id,
            "Transaction cancelled by owner"
        );

        self.publish_settled(&row, TransactionStatus::Cancelled, Some(reason.to_string()))
            .await;

        transactions::get_by_id(&self.pool, transaction_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", transaction_id)))
    }

    // ============ 准入视图 ============

    /// 提现准入排序：从当前余额出发，按提交时间从旧到新逐笔扣减，
    /// 扣减后仍非负的才标记可放行
    ///
    /// 仅供运营界面参考；权威校验始终是 approve_withdrawal 审批瞬间
    /// 在锁内的那一次——视图算完到操作员点击之间余额可能已经变了。
    pub async fn pending_withdrawal_admission(
        &self,
        wallet_id: Uuid,
    ) -> Result<Vec<WithdrawalAdmission>, CoreError> {
        let wallet = wallets::get_by_id(&self.pool, wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("wallet {}", wallet_id)))?;

        let pending =
            transactions::list_pending_withdrawals_for_wallet(&self.pool, wallet_id).await?;

        let flags = compute_admission(wallet.balance, pending.iter().map(|t| t.amount));

        Ok(pending
            .into_iter()
            .zip(flags)
            .map(|(transaction, (running_balance, approvable))| WithdrawalAdmission {
                transaction,
                approvable,
                running_balance,
            })
            .collect())
    }

    // ============ 通知 ============

    async fn publish_settled(
        &self,
        row: &Transaction,
        status: TransactionStatus,
        rejection_reason: Option<String>,
    ) {
        self.publish_best_effort(DomainEvent::TransactionSettled {
            transaction_id: row.id,
            status: status.as_db_str().to_string(),
            tx_type: row.tx_type.clone(),
            amount: row.amount,
            currency: row.currency.clone(),
            updated_at: chrono::Utc::now(),
            rejection_reason,
        })
        .await;
    }

    async fn publish_pending_broadcast(&self, row: &Transaction) {
        self.publish_best_effort(DomainEvent::PendingTransactionBroadcast {
            transaction_id: row.id,
            tx_type: row.tx_type.clone(),
            amount: row.amount,
            currency: row.currency.clone(),
            created_at: row.created_at,
        })
        .await;
    }

    /// 尽力投递：通知失败绝不回滚已提交的账本变更
    async fn publish_best_effort(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(error = %e, "Notification publish failed");
        }
    }
}

/// pending 状态守卫：任何离开终态的转换都在这里挡下
fn ensure_pending(row: &Transaction) -> Result<(), CoreError> {
    match TransactionStatus::from_db_str(&row.status) {
        Some(TransactionStatus::Pending) => Ok(()),
        _ => Err(CoreError::NotPending(row.id)),
    }
}

fn ensure_type(row: &Transaction, expected: TransactionType) -> Result<(), CoreError> {
    if row.tx_type == expected.as_db_str() {
        Ok(())
    } else {
        Err(CoreError::NotFound(format!(
            "{} transaction {}",
            expected, row.id
        )))
    }
}

/// 提现目标地址校验；拒绝空白，返回去掉首尾空格的地址
pub fn parse_destination(s: &str) -> Result<&str, CoreError> {
    let dest = s.trim();
    if dest.is_empty() {
        return Err(CoreError::InvalidDestination(s.to_string()));
    }
    Ok(dest)
}

/// 正十进制金额字符串解析；拒绝空串、非数字、零和负数
pub fn parse_amount(s: &str) -> Result<Decimal, CoreError> {
    let amount: Decimal = s
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidAmount(s.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidAmount(s.to_string()));
    }
    Ok(amount)
}

/// 运行余额准入计算（纯函数）
///
/// 返回与输入等长的 (扣减后余额, 是否可放行) 序列。不可放行的一笔
/// 不会真的扣减——它不会被放行，后面的申请仍按当前运行余额评估。
pub fn compute_admission<I>(balance: Decimal, amounts: I) -> Vec<(Decimal, bool)>
where
    I: IntoIterator<Item = Decimal>,
{
    let mut running = balance;
    amounts
        .into_iter()
        .map(|amount| {
            let after = running - amount;
            if after >= Decimal::ZERO {
                running = after;
                (after, true)
            } else {
                (after, false)
            }
        })
        .collect()
}
