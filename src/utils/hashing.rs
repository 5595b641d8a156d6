//! 哈希工具（blake2b-256，Substrate 标准）

use blake2::{digest::consts::U32, Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// blake2b-256 哈希
pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    Blake2b256::digest(data).into()
}

/// 0x 前缀的十六进制编码
pub fn to_hex_prefixed(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// 解析可选 0x 前缀的十六进制
pub fn from_hex_prefixed(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.trim().trim_start_matches("0x"))
}

/// 解析 32 字节哈希
pub fn parse_hash(s: &str) -> Option<[u8; 32]> {
    from_hex_prefixed(s).ok()?.try_into().ok()
}
