//! API Key 摘要
//! 数据库只保存 key 的 SHA-256 十六进制摘要，明文 key 由外部系统签发

use sha2::{Digest, Sha256};

/// 请求头名称
pub const API_KEY_HEADER: &str = "x-api-key";

/// 计算 API Key 的存储摘要
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.trim().as_bytes());
    hex::encode(hasher.finalize())
}
