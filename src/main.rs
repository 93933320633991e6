//! VaultCore 主入口
//! 托管账本核心：地址派生 + 链上监控 + 审批制账本

use std::sync::Arc;

use anyhow::Result;
use vaultcore::{
    config::Config,
    domain::{DerivationEngine, MasterSeed},
    infrastructure::{db, event_bus::InMemoryEventBus, logging},
    service::{
        address_registry::AddressRegistry, chain_monitor::ChainMonitor, ledger::LedgerService,
        tron_client::TronClient,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量与配置（CONFIG_PATH 指定的 TOML 优先）
    dotenvy::dotenv().ok();

    let config = Config::from_env_and_file(std::env::var("CONFIG_PATH").ok().as_deref())?;
    config.validate()?;

    // 2. 初始化日志
    logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to init logging: {}", e))?;

    tracing::info!("Starting VaultCore ledger service");

    // 3. 连接数据库
    let pool = db::init_pool(&config.database).await?;
    tracing::info!("Database connected");

    // 4. 运行数据库迁移
    // 注意：生产环境建议单独运行迁移
    if std::env::var("SKIP_MIGRATIONS").is_err() {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations completed");
    } else {
        tracing::info!("Database migrations skipped (SKIP_MIGRATIONS set)");
    }

    // 5. 加载主种子并构建派生引擎
    // 种子只进入派生引擎，不落日志、不进 Config
    let seed = MasterSeed::from_env()?;
    let engine = Arc::new(DerivationEngine::new(seed));

    // 6. 组装服务
    let events = Arc::new(InMemoryEventBus::new());
    let registry = Arc::new(AddressRegistry::new(pool.clone(), engine));
    let ledger = Arc::new(LedgerService::new(
        pool.clone(),
        registry.clone(),
        events.clone(),
    ));

    let client = Arc::new(TronClient::new(&config.chain));
    let monitor = Arc::new(ChainMonitor::new(
        pool.clone(),
        registry.clone(),
        ledger.clone(),
        client,
        &config.chain,
    ));

    // 7. 启动链监控
    monitor.start().await;
    tracing::info!(
        poll_interval_secs = config.chain.poll_interval_secs,
        "Chain monitor running"
    );

    // 8. 等待关停信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    monitor.stop().await;
    pool.close().await;

    tracing::info!("VaultCore stopped");
    Ok(())
}
