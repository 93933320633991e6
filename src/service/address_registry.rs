//! 地址注册服务
//!
//! 发号、列表、归属校验、停用。索引按元组行数计算，并发发号的竞争
//! 由 address 唯一约束 + 冲突重试兜底（要保护的不是索引本身而是地址
//! 不碰撞）。

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    domain::{ensure_supported_pair, Currency, DerivationEngine, Network},
    error::CoreError,
    infrastructure::db::PgPool,
    repository::deposit_addresses::{self, CreateDepositAddressInput, DepositAddress},
};

/// 并发冲突下的发号重试上限
const CREATE_MAX_ATTEMPTS: u32 = 5;

pub struct AddressRegistry {
    pool: PgPool,
    engine: Arc<DerivationEngine>,
}

impl AddressRegistry {
    pub fn new(pool: PgPool, engine: Arc<DerivationEngine>) -> Self {
        Self { pool, engine }
    }

    /// 为用户发一个新的收款地址
    ///
    /// index = 该 (user, currency, network) 元组下已有行数，因此同一元组
    /// 的地址构成稠密的 0..N-1 序列。两个并发调用可能算出同一个 index、
    /// 派生出同一个地址，此时只有一个 INSERT 能通过唯一约束，输家重读
    /// 行数后重试。
    pub async fn create_deposit_address(
        &self,
        user_id: Uuid,
        currency: Currency,
        network: Network,
    ) -> Result<DepositAddress, CoreError> {
        ensure_supported_pair(currency, network)?;

        for attempt in 1..=CREATE_MAX_ATTEMPTS {
            let index = deposit_addresses::count_for_tuple(
                &self.pool,
                user_id,
                currency.as_db_str(),
                network.as_db_str(),
            )
            .await? as u32;

            let derived = self.engine.derive(user_id, currency, network, index)?;

            let input = CreateDepositAddressInput {
                user_id,
                currency: currency.as_db_str().to_string(),
                network: network.as_db_str().to_string(),
                address: derived.address,
                derivation_path: derived.path,
                label: None,
            };

            match deposit_addresses::insert(&self.pool, input).await {
                Ok(row) => {
                    tracing::info!(
                        user_id = %user_id,
                        address = %row.address,
                        index = index,
                        "Issued deposit address"
                    );
                    return Ok(row);
                }
                Err(e) if CoreError::is_unique_violation(&e) => {
                    tracing::debug!(
                        user_id = %user_id,
                        index = index,
                        attempt = attempt,
                        "Deposit address conflict, retrying with fresh index"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::DerivationFailed(format!(
            "could not allocate a unique address for user {} after {} attempts",
            user_id, CREATE_MAX_ATTEMPTS
        )))
    }

    /// 过滤读，无副作用
    pub async fn list_deposit_addresses(
        &self,
        user_id: Uuid,
        currency: Option<Currency>,
        network: Option<Network>,
    ) -> Result<Vec<DepositAddress>, CoreError> {
        let recs = deposit_addresses::list_for_user(
            &self.pool,
            user_id,
            currency.map(|c| c.as_db_str()),
            network.map(|n| n.as_db_str()),
        )
        .await?;
        Ok(recs)
    }

    /// 归属校验：地址存在、属于该用户、且仍处于 active 状态
    pub async fn verify_ownership(
        &self,
        address: &str,
        user_id: Uuid,
    ) -> Result<bool, CoreError> {
        let rec = deposit_addresses::find_by_address(&self.pool, address).await?;
        Ok(matches!(rec, Some(row) if row.user_id == user_id && row.active))
    }

    /// 历史归属校验：忽略 active 标志
    ///
    /// 结算已存在的充值交易时用这个——地址在充值到达后被停用，
    /// 不能因此拒绝对该笔历史充值的结算。
    pub async fn verify_ownership_historical(
        &self,
        address: &str,
        user_id: Uuid,
    ) -> Result<bool, CoreError> {
        let rec = deposit_addresses::find_by_address(&self.pool, address).await?;
        Ok(matches!(rec, Some(row) if row.user_id == user_id))
    }

    /// 更新 last_used_at；未知地址按幂等 no-op 处理
    pub async fn mark_used(&self, address: &str) -> Result<(), CoreError> {
        let affected = deposit_addresses::mark_used(&self.pool, address).await?;
        if affected == 0 {
            tracing::debug!(address = %address, "mark_used on unknown address, no-op");
        }
        Ok(())
    }

    /// 停用地址：下个监控周期起不再扫描
    pub async fn deactivate(&self, address_id: Uuid) -> Result<(), CoreError> {
        let found = deposit_addresses::deactivate(&self.pool, address_id).await?;
        if !found {
            return Err(CoreError::NotFound(format!(
                "deposit address {}",
                address_id
            )));
        }
        tracing::info!(address_id = %address_id, "Deposit address deactivated");
        Ok(())
    }

    /// 监控器扫描集合
    pub async fn list_active(&self) -> Result<Vec<DepositAddress>, CoreError> {
        let recs = deposit_addresses::list_active(&self.pool).await?;
        Ok(recs)
    }
}
