//! 确定性地址派生引擎
//!
//! 无状态纯函数：(主种子, 用户, 币种, 网络, 地址索引) → (地址, 派生路径)。
//! 私钥只在派生过程中瞬时存在，绝不返回、绝不落库、绝不写日志；
//! 相同输入永远得到相同地址，因此发地址不需要持久化任何密钥材料。

use bip39::{Language, Mnemonic};
use coins_bip32::path::DerivationPath;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    domain::asset::{Currency, Network},
    error::CoreError,
};

/// 进程级主种子
///
/// 启动时从环境变量加载一次，全程只被派生引擎持有。
/// `Debug` 输出脱敏，类型不实现 Serialize。
pub struct MasterSeed {
    seed: Zeroizing<Vec<u8>>,
}

impl MasterSeed {
    /// 从 BIP39 助记词生成种子
    pub fn from_mnemonic(phrase: &str) -> Result<Self, CoreError> {
        let mnemonic = Mnemonic::parse_in(Language::English, phrase.trim())
            .map_err(|e| CoreError::DerivationFailed(format!("invalid mnemonic: {}", e)))?;
        let seed = mnemonic.to_seed("");
        Ok(Self {
            seed: Zeroizing::new(seed.to_vec()),
        })
    }

    /// 从十六进制种子字符串生成（HSM 占位：外部系统可直接注入种子字节）
    pub fn from_hex(hex_seed: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| CoreError::DerivationFailed(format!("invalid hex seed: {}", e)))?;
        if bytes.len() < 16 {
            return Err(CoreError::DerivationFailed(
                "seed must be at least 16 bytes".to_string(),
            ));
        }
        Ok(Self {
            seed: Zeroizing::new(bytes),
        })
    }

    /// 从环境变量加载：优先 MASTER_MNEMONIC，其次 MASTER_SEED_HEX
    pub fn from_env() -> Result<Self, CoreError> {
        if let Ok(phrase) = std::env::var("MASTER_MNEMONIC") {
            return Self::from_mnemonic(&phrase);
        }
        if let Ok(hex_seed) = std::env::var("MASTER_SEED_HEX") {
            return Self::from_hex(&hex_seed);
        }
        Err(CoreError::DerivationFailed(
            "MASTER_MNEMONIC or MASTER_SEED_HEX must be set".to_string(),
        ))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.seed
    }
}

impl std::fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSeed(<redacted>)")
    }
}

/// 派生结果（只含公开信息）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    /// Base58Check 编码的 TRON 地址（T 开头，34 字符）
    pub address: String,
    /// 完整派生路径，例如 m/44'/195'/12345'/0/0
    pub path: String,
}

/// 派生引擎
///
/// 显式构造、依赖注入的单例服务；种子在构造时传入，不走全局状态。
pub struct DerivationEngine {
    seed: MasterSeed,
}

impl DerivationEngine {
    pub fn new(seed: MasterSeed) -> Self {
        Self { seed }
    }

    /// 派生指定用户在指定网络上的第 index 个收款地址
    ///
    /// 路径固定五段：purpose 44'（BIP44）/ coin_type 195'（TRON）/
    /// account'（用户ID哈希）/ 0（外部链）/ index。
    pub fn derive(
        &self,
        user_id: Uuid,
        _currency: Currency,
        network: Network,
        index: u32,
    ) -> Result<DerivedAddress, CoreError> {
        // 目前只有 TRC20 开放充值
        match network {
            Network::Trc20 => {}
        }

        let account = account_index_for_user(user_id);
        let path = format!("m/44'/{}'/{}'/0/{}", network.coin_type(), account, index);

        let address = self.derive_tron_address(&path)?;

        Ok(DerivedAddress { address, path })
    }

    /// 沿路径派生叶子密钥并编码为 TRON 地址
    ///
    /// TRON 地址 = Base58Check(0x41 || Keccak256(未压缩公钥)[12..])
    fn derive_tron_address(&self, path: &str) -> Result<String, CoreError> {
        use coins_bip32::prelude::*;
        use k256::ecdsa::SigningKey;
        use sha3::Keccak256;

        let derivation_path = path
            .parse::<DerivationPath>()
            .map_err(|e| CoreError::DerivationFailed(format!("invalid derivation path: {}", e)))?;

        let master_key = XPriv::root_from_seed(self.seed.as_bytes(), None)
            .map_err(|e| CoreError::DerivationFailed(format!("master key: {}", e)))?;

        let derived_key = master_key
            .derive_path(&derivation_path)
            .map_err(|e| CoreError::DerivationFailed(format!("derive path: {}", e)))?;

        // XPriv 实现 AsRef<SigningKey>；私钥只在本作用域内存在
        let signing_key: &SigningKey = derived_key.as_ref();
        let verifying_key = signing_key.verifying_key();
        let public_key_point = verifying_key.to_encoded_point(false); // 未压缩格式
        let public_key_slice = &public_key_point.as_bytes()[1..]; // 去掉 0x04 前缀

        // Keccak256 哈希取后 20 字节，前缀 0x41（TRON mainnet）
        let hash = Keccak256::digest(public_key_slice);
        let mut payload = Vec::with_capacity(21);
        payload.push(0x41);
        payload.extend_from_slice(&hash[12..]);

        // Base58Check（双 SHA256 取 4 字节校验和）
        Ok(bs58::encode(payload).with_check().into_string())
    }
}

/// 用户ID → 硬化账户段
///
/// SHA256(user_id) 前 4 字节按大端解释为 u32，再对 2^31 取模，
/// 保证落在硬化派生段的合法区间内。
pub fn account_index_for_user(user_id: Uuid) -> u32 {
    let digest = Sha256::digest(user_id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % 0x8000_0000
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn engine() -> DerivationEngine {
        DerivationEngine::new(MasterSeed::from_mnemonic(TEST_MNEMONIC).unwrap())
    }

    #[test]
    fn test_derive_is_deterministic() {
        let engine = engine();
        let user = Uuid::parse_str("6f1c5f1e-8c5a-4f7e-9b4c-0d7e2a1b3c4d").unwrap();

        let a = engine
            .derive(user, Currency::Usdt, Network::Trc20, 0)
            .unwrap();
        let b = engine
            .derive(user, Currency::Usdt, Network::Trc20, 0)
            .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_tron_address_shape() {
        let engine = engine();
        let user = Uuid::new_v4();

        let derived = engine
            .derive(user, Currency::Usdt, Network::Trc20, 0)
            .unwrap();

        assert!(derived.address.starts_with('T'));
        assert_eq!(derived.address.len(), 34);
        assert!(derived.path.starts_with("m/44'/195'/"));
        assert!(derived.path.ends_with("/0/0"));
    }

    #[test]
    fn test_different_users_get_different_addresses() {
        let engine = engine();
        let a = engine
            .derive(Uuid::new_v4(), Currency::Usdt, Network::Trc20, 0)
            .unwrap();
        let b = engine
            .derive(Uuid::new_v4(), Currency::Usdt, Network::Trc20, 0)
            .unwrap();

        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_different_indexes_get_different_addresses() {
        let engine = engine();
        let user = Uuid::new_v4();

        let a = engine
            .derive(user, Currency::Usdt, Network::Trc20, 0)
            .unwrap();
        let b = engine
            .derive(user, Currency::Usdt, Network::Trc20, 1)
            .unwrap();

        assert_ne!(a.address, b.address);
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn test_account_index_in_hardened_range() {
        for _ in 0..32 {
            let idx = account_index_for_user(Uuid::new_v4());
            assert!(idx < 0x8000_0000);
        }
    }

    #[test]
    fn test_account_index_is_stable() {
        let user = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(account_index_for_user(user), account_index_for_user(user));
    }

    #[test]
    fn test_invalid_mnemonic_fails() {
        assert!(matches!(
            MasterSeed::from_mnemonic("not a valid phrase"),
            Err(CoreError::DerivationFailed(_))
        ));
    }

    #[test]
    fn test_short_hex_seed_rejected() {
        assert!(MasterSeed::from_hex("deadbeef").is_err());
        assert!(MasterSeed::from_hex("00112233445566778899aabbccddeeff").is_ok());
    }

    #[test]
    fn test_debug_is_redacted() {
        let seed = MasterSeed::from_mnemonic(TEST_MNEMONIC).unwrap();
        assert_eq!(format!("{:?}", seed), "MasterSeed(<redacted>)");
    }
}
