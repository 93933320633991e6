// TRON 链查询客户端
// 只读 RPC：查询指定地址在指定合约上的已确认 TRC20 转入事件

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{config::ChainConfig, error::CoreError};

/// 一条链上转入事件
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub tx_hash: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// TronGrid `/v1/accounts/{address}/transactions/trc20` 响应
#[derive(Debug, Deserialize)]
struct Trc20TransferPage {
    #[serde(default)]
    data: Vec<Trc20TransferRecord>,
}

#[derive(Debug, Deserialize)]
struct Trc20TransferRecord {
    transaction_id: String,
    token_info: TokenInfo,
    #[serde(rename = "type")]
    transfer_type: String,
    to: String,
    /// 最小单位整数值的十进制字符串（USDT 为 6 位小数）
    value: String,
    block_timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    address: String,
    decimals: u32,
}

pub struct TronClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    usdt_contract: String,
}

impl TronClient {
    pub fn new(config: &ChainConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.address_fetch_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            base_url: config.tron_api_url.trim_end_matches('/').to_string(),
            api_key: config.tron_api_key.clone(),
            usdt_contract: config.usdt_contract.clone(),
        }
    }

    /// 查询 since 之后转入 address 的已确认 USDT 转账
    ///
    /// 瞬时故障（网络不通、限流、解析失败）统一映射为 ExternalNetwork，
    /// 由监控器记日志后跳过该地址，下个周期重试。
    pub async fn fetch_usdt_transfers_to(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TokenTransfer>, CoreError> {
        let url = format!(
            "{}/v1/accounts/{}/transactions/trc20",
            self.base_url, address
        );

        let mut request = self
            .http_client
            .get(&url)
            .query(&[
                ("only_to", "true"),
                ("only_confirmed", "true"),
                ("contract_address", self.usdt_contract.as_str()),
                ("min_timestamp", &since.timestamp_millis().to_string()),
                ("limit", "200"),
            ]);

        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::ExternalNetwork(format!("tron request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::ExternalNetwork(format!(
                "tron api returned status {}",
                response.status()
            )));
        }

        let page: Trc20TransferPage = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalNetwork(format!("tron response parse: {}", e)))?;

        Ok(extract_transfers(page, address, &self.usdt_contract))
    }
}

/// 过滤并换算转账记录（纯函数，方便测试）
///
/// 只保留：Transfer 类型、转入目标地址、合约匹配的记录；
/// value 按 token 小数位精确换算为 Decimal。
fn extract_transfers(
    page: Trc20TransferPage,
    address: &str,
    contract: &str,
) -> Vec<TokenTransfer> {
    page.data
        .into_iter()
        .filter(|rec| {
            rec.transfer_type == "Transfer"
                && rec.to == address
                && rec.token_info.address == contract
        })
        .filter_map(|rec| {
            let raw: i128 = match rec.value.parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(
                        tx_hash = %rec.transaction_id,
                        value = %rec.value,
                        "Skipping transfer with unparseable value"
                    );
                    return None;
                }
            };

            // value/decimals 都是外部输入：超出 Decimal 96 位范围的值
            // 与坏 value 同等对待，跳过并留日志
            let amount = match Decimal::try_from_i128_with_scale(raw, rec.token_info.decimals) {
                Ok(a) => a,
                Err(_) => {
                    tracing::warn!(
                        tx_hash = %rec.transaction_id,
                        value = %rec.value,
                        decimals = rec.token_info.decimals,
                        "Skipping transfer with out-of-range value"
                    );
                    return None;
                }
            };
            let timestamp = Utc
                .timestamp_millis_opt(rec.block_timestamp)
                .single()
                .unwrap_or_else(Utc::now);

            Some(TokenTransfer {
                tx_hash: rec.transaction_id,
                amount,
                timestamp,
            })
        })
        .collect()
}
