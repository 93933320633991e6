//! 链监控服务
//!
//! 单实例后台轮询：扫描全部 active 充值地址，把链上转入事件恰好一次
//! 地交给账本记账。同一时刻只有一个周期在跑（周期在 tick 循环内
//! await，新 tick 不可能叠上未完成的周期）；stop() 让在途周期跑完
//! 而不是中途打断。外部网络长期不可达只会产生日志，不会让服务退出。

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use futures::StreamExt;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};

use crate::{
    config::ChainConfig,
    domain::Currency,
    error::CoreError,
    infrastructure::db::PgPool,
    repository::{deposit_addresses::DepositAddress, transactions},
    service::{
        address_registry::AddressRegistry,
        ledger::LedgerService,
        tron_client::{TokenTransfer, TronClient},
    },
};

/// 一个扫描周期的统计
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub addresses_scanned: usize,
    pub addresses_failed: usize,
    pub deposits_recorded: usize,
}

pub struct ChainMonitor {
    pool: PgPool,
    registry: Arc<AddressRegistry>,
    ledger: Arc<LedgerService>,
    client: Arc<TronClient>,
    poll_interval: Duration,
    scan_window: Duration,
    fetch_timeout: Duration,
    max_concurrent: usize,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChainMonitor {
    pub fn new(
        pool: PgPool,
        registry: Arc<AddressRegistry>,
        ledger: Arc<LedgerService>,
        client: Arc<TronClient>,
        config: &ChainConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            ledger,
            client,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            scan_window: Duration::from_secs(config.scan_window_secs),
            fetch_timeout: Duration::from_secs(config.address_fetch_timeout_secs),
            max_concurrent: config.max_concurrent_addresses,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 启动后台轮询；重复调用是 no-op
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Chain monitor already running");
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().await = Some(tx);

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(monitor.poll_interval);
            // 慢周期结束后顺延下一个 tick，而不是连发补偿
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = monitor.poll_interval.as_secs(),
                "Chain monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match monitor.run_cycle().await {
                            Ok(stats) => {
                                if stats.deposits_recorded > 0 || stats.addresses_failed > 0 {
                                    tracing::info!(
                                        scanned = stats.addresses_scanned,
                                        failed = stats.addresses_failed,
                                        recorded = stats.deposits_recorded,
                                        "Chain monitor cycle finished"
                                    );
                                }
                            }
                            // 周期级失败（如注册表读失败）：记日志，下个 tick 重试
                            Err(e) => {
                                tracing::error!(error = %e, "Chain monitor cycle failed");
                            }
                        }
                    }
                    _ = rx.changed() => {
                        break;
                    }
                }
            }

            tracing::info!("Chain monitor stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// 停止轮询：在途周期允许跑完；重复调用是 no-op
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(true);
        }

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Chain monitor task join failed");
            }
        }
    }

    /// 单个扫描周期
    ///
    /// 地址间互不影响：抓取受并发上限约束，去重与记账各自独立，
    /// 单地址失败只记日志不中断其余地址。
    pub async fn run_cycle(&self) -> Result<CycleStats, CoreError> {
        let addresses = self.registry.list_active().await?;

        let usdt_addresses: Vec<DepositAddress> = addresses
            .into_iter()
            .filter(|a| a.currency == Currency::Usdt.as_db_str())
            .collect();

        let results: Vec<Result<usize, ()>> = futures::stream::iter(usdt_addresses)
            .map(|addr| async move { self.scan_address(addr).await })
            .buffer_unordered(self.max_concurrent.max(1))
            .collect()
            .await;

        let mut stats = CycleStats::default();
        for result in results {
            stats.addresses_scanned += 1;
            match result {
                Ok(recorded) => stats.deposits_recorded += recorded,
                Err(()) => stats.addresses_failed += 1,
            }
        }

        Ok(stats)
    }

    /// 扫描单个地址：去重集合 → 链上查询（限时）→ 逐笔记账
    async fn scan_address(&self, addr: DepositAddress) -> Result<usize, ()> {
        let known: HashSet<String> =
            match transactions::recorded_hashes_for_address(&self.pool, &addr.address).await {
                Ok(hashes) => hashes.into_iter().collect(),
                Err(e) => {
                    tracing::warn!(
                        address = %addr.address,
                        error = %e,
                        "Failed to load recorded hashes, skipping address"
                    );
                    return Err(());
                }
            };

        let since = Utc::now()
            - chrono::Duration::from_std(self.scan_window).unwrap_or(chrono::Duration::hours(24));

        // 单地址限时：一个无响应地址不能拖垮整个周期
        let transfers = match timeout(
            self.fetch_timeout,
            self.client.fetch_usdt_transfers_to(&addr.address, since),
        )
        .await
        {
            Ok(Ok(transfers)) => transfers,
            Ok(Err(e)) => {
                tracing::warn!(
                    address = %addr.address,
                    error = %e,
                    "Transfer fetch failed, will retry next cycle"
                );
                return Err(());
            }
            Err(_) => {
                tracing::warn!(
                    address = %addr.address,
                    timeout_secs = self.fetch_timeout.as_secs(),
                    "Transfer fetch timed out, will retry next cycle"
                );
                return Err(());
            }
        };

        let fresh = filter_unrecorded(transfers, &known);
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut recorded = 0usize;
        for transfer in fresh {
            match self
                .ledger
                .record_deposit(
                    addr.user_id,
                    &addr.address,
                    &transfer.tx_hash,
                    transfer.amount,
                    Currency::Usdt,
                )
                .await
            {
                Ok(row) => {
                    tracing::info!(
                        transaction_id = %row.id,
                        address = %addr.address,
                        tx_hash = %transfer.tx_hash,
                        amount = %transfer.amount,
                        "New deposit detected"
                    );
                    recorded += 1;
                }
                // 另一个路径已经记过这笔哈希：幂等保护生效，视同成功
                Err(CoreError::DuplicateTransaction(_)) => {
                    tracing::debug!(
                        tx_hash = %transfer.tx_hash,
                        "Deposit already recorded, skipping"
                    );
                }
                // 数据不一致：留待人工对账，本周期内不重试
                Err(CoreError::WalletNotFound { user_id, currency }) => {
                    tracing::warn!(
                        user_id = %user_id,
                        currency = %currency,
                        tx_hash = %transfer.tx_hash,
                        "No wallet for detected deposit, left for manual reconciliation"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        tx_hash = %transfer.tx_hash,
                        address = %addr.address,
                        error = %e,
                        "Failed to record deposit"
                    );
                }
            }
        }

        if recorded > 0 {
            if let Err(e) = self.registry.mark_used(&addr.address).await {
                tracing::warn!(address = %addr.address, error = %e, "Failed to bump last_used");
            }
        }

        Ok(recorded)
    }
}

/// 去掉已记账哈希（纯函数）
fn filter_unrecorded(
    transfers: Vec<TokenTransfer>,
    known: &HashSet<String>,
) -> Vec<TokenTransfer> {
    transfers
        .into_iter()
        .filter(|t| !known.contains(&t.tx_hash))
        .collect()
}
