//! SS58 地址编解码
//!
//! 地址 = base58(prefix ‖ public_key ‖ checksum)，
//! checksum 为 blake2b-512("SS58PRE" ‖ prefix ‖ public_key) 的前 2 字节。

use anyhow::{anyhow, bail, Result};
use blake2::{Blake2b512, Digest};

const SS58_CONTEXT: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;
const ACCOUNT_ID_LEN: usize = 32;

fn checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CONTEXT);
    hasher.update(data);
    let hash = hasher.finalize();
    [hash[0], hash[1]]
}

/// 公钥编码为 SS58 地址
pub fn encode(public_key: &[u8; ACCOUNT_ID_LEN], prefix: u16) -> String {
    let mut data = Vec::with_capacity(2 + ACCOUNT_ID_LEN + CHECKSUM_LEN);

    if prefix < 64 {
        data.push(prefix as u8);
    } else {
        data.push(((prefix & 0x00FC) >> 2) as u8 | 0x40);
        data.push(((prefix >> 8) as u8) | ((prefix & 0x0003) << 6) as u8);
    }

    data.extend_from_slice(public_key);
    let sum = checksum(&data);
    data.extend_from_slice(&sum);

    bs58::encode(data).into_string()
}

/// 解码 SS58 地址，返回 (公钥, prefix)
pub fn decode(address: &str) -> Result<([u8; ACCOUNT_ID_LEN], u16)> {
    let data = bs58::decode(address)
        .into_vec()
        .map_err(|e| anyhow!("Invalid base58 address {}: {}", address, e))?;

    let (prefix, prefix_len) = match data.first() {
        Some(&first) if first < 64 => (first as u16, 1),
        Some(&first) if first < 128 => {
            let second = *data
                .get(1)
                .ok_or_else(|| anyhow!("Address too short: {}", address))?;
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (lower as u16 | ((upper as u16) << 8), 2)
        }
        _ => bail!("Unsupported SS58 prefix in address: {}", address),
    };

    if data.len() != prefix_len + ACCOUNT_ID_LEN + CHECKSUM_LEN {
        bail!("Invalid SS58 address length: {}", address);
    }

    let body_end = prefix_len + ACCOUNT_ID_LEN;
    if checksum(&data[..body_end]) != data[body_end..] {
        bail!("Invalid SS58 checksum: {}", address);
    }

    let mut public_key = [0u8; ACCOUNT_ID_LEN];
    public_key.copy_from_slice(&data[prefix_len..body_end]);
    Ok((public_key, prefix))
}

/// 解码并返回 32 字节账户 ID
pub fn account_id(address: &str) -> Result<[u8; ACCOUNT_ID_LEN]> {
    decode(address).map(|(key, _)| key)
}

/// 同一公钥在不同 prefix 下地址不同，比较时按公钥比较
pub fn same_account(a: &str, b: &str) -> bool {
    match (account_id(a), account_id(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}
