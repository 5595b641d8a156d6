//! Substrate 调用与 extrinsic 的 SCALE 编码
//!
//! 只覆盖迁移用到的调用：余额转账、NFT/Uniques 转移、Utility.batch_all、
//! Multisig.as_multi / approve_as_multi，以及 v4 签名 extrinsic。

use parity_scale_codec::{Compact, Encode};

use crate::{
    domain::Timepoint,
    infrastructure::chain_session::{CallIndex, RuntimeContext, Weight},
};

/// v4 | signed bit
pub const EXTRINSIC_VERSION_SIGNED: u8 = 0x84;
/// MultiAddress::Id
const MULTI_ADDRESS_ID: u8 = 0x00;
const ERA_IMMORTAL: u8 = 0x00;
/// CheckMetadataHash 的 mode 字节
pub const METADATA_HASH_ENABLED: u8 = 0x01;
/// MultiSignature 类型字节 + 64 字节签名
pub const MULTI_SIGNATURE_LEN: usize = 65;

fn call_header(index: CallIndex) -> Vec<u8> {
    vec![index.pallet, index.call]
}

fn push_multi_address(encoded: &mut Vec<u8>, account: &[u8; 32]) {
    encoded.push(MULTI_ADDRESS_ID);
    encoded.extend_from_slice(account);
}

/// Balances.transfer_keep_alive / transfer_allow_death (dest, Compact<value>)
pub fn transfer_call(index: CallIndex, dest: &[u8; 32], value: u128) -> Vec<u8> {
    let mut encoded = call_header(index);
    push_multi_address(&mut encoded, dest);
    Compact(value).encode_to(&mut encoded);
    encoded
}

/// Nfts.transfer / Uniques.transfer (collection, item, dest)
pub fn item_transfer_call(index: CallIndex, collection: u32, item: u32, dest: &[u8; 32]) -> Vec<u8> {
    let mut encoded = call_header(index);
    collection.encode_to(&mut encoded);
    item.encode_to(&mut encoded);
    push_multi_address(&mut encoded, dest);
    encoded
}

/// Utility.batch_all(Vec<RuntimeCall>)
pub fn batch_all_call(index: CallIndex, calls: &[Vec<u8>]) -> Vec<u8> {
    let mut encoded = call_header(index);
    Compact(calls.len() as u32).encode_to(&mut encoded);
    for call in calls {
        encoded.extend_from_slice(call);
    }
    encoded
}

fn encode_multisig_prefix(
    encoded: &mut Vec<u8>,
    threshold: u16,
    other_signatories: &[[u8; 32]],
    maybe_timepoint: Option<Timepoint>,
) {
    threshold.encode_to(encoded);
    // 链上要求按字节序排序
    let mut sorted = other_signatories.to_vec();
    sorted.sort();
    sorted.encode_to(encoded);
    maybe_timepoint
        .map(|tp| (tp.height, tp.index))
        .encode_to(encoded);
}

fn encode_weight(encoded: &mut Vec<u8>, weight: Weight) {
    Compact(weight.ref_time).encode_to(encoded);
    Compact(weight.proof_size).encode_to(encoded);
}

/// Multisig.as_multi(threshold, other_signatories, maybe_timepoint, call, max_weight)
pub fn as_multi_call(
    index: CallIndex,
    threshold: u16,
    other_signatories: &[[u8; 32]],
    maybe_timepoint: Option<Timepoint>,
    call: &[u8],
    max_weight: Weight,
) -> Vec<u8> {
    let mut encoded = call_header(index);
    encode_multisig_prefix(&mut encoded, threshold, other_signatories, maybe_timepoint);
    encoded.extend_from_slice(call);
    encode_weight(&mut encoded, max_weight);
    encoded
}

/// Multisig.approve_as_multi(threshold, other_signatories, maybe_timepoint, call_hash, max_weight)
pub fn approve_as_multi_call(
    index: CallIndex,
    threshold: u16,
    other_signatories: &[[u8; 32]],
    maybe_timepoint: Option<Timepoint>,
    call_hash: &[u8; 32],
    max_weight: Weight,
) -> Vec<u8> {
    let mut encoded = call_header(index);
    encode_multisig_prefix(&mut encoded, threshold, other_signatories, maybe_timepoint);
    encoded.extend_from_slice(call_hash);
    encode_weight(&mut encoded, max_weight);
    encoded
}

/// 随 extrinsic 一起提交的签名扩展：era ‖ nonce ‖ tip ‖ mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedExtra {
    pub nonce: u32,
    pub tip: u128,
    pub metadata_hash_mode: u8,
}

impl SignedExtra {
    pub fn new(nonce: u32) -> Self {
        Self {
            nonce,
            tip: 0,
            metadata_hash_mode: METADATA_HASH_ENABLED,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut extra = vec![ERA_IMMORTAL];
        Compact(self.nonce).encode_to(&mut extra);
        Compact(self.tip).encode_to(&mut extra);
        extra.push(self.metadata_hash_mode);
        extra
    }
}

/// 只参与签名、不随 extrinsic 提交的数据
///
/// immortal era 下 checkpoint 区块即创世区块。
pub fn additional_signed(runtime: &RuntimeContext, metadata_digest: &[u8; 32]) -> Vec<u8> {
    let mut additional = Vec::new();
    runtime.spec_version.encode_to(&mut additional);
    runtime.transaction_version.encode_to(&mut additional);
    additional.extend_from_slice(&runtime.genesis_hash);
    additional.extend_from_slice(&runtime.genesis_hash);
    Some(*metadata_digest).encode_to(&mut additional);
    additional
}

/// 签名载荷 call ‖ extra ‖ additional
pub fn signing_payload(call: &[u8], extra: &[u8], additional: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(call.len() + extra.len() + additional.len());
    payload.extend_from_slice(call);
    payload.extend_from_slice(extra);
    payload.extend_from_slice(additional);
    payload
}

/// 组装 v4 签名 extrinsic（带长度前缀）
///
/// `signature` 为 MultiSignature 编码（类型字节 + 签名）
pub fn signed_extrinsic(
    signer: &[u8; 32],
    signature: &[u8],
    extra: &[u8],
    call: &[u8],
) -> Vec<u8> {
    let mut body = vec![EXTRINSIC_VERSION_SIGNED];
    push_multi_address(&mut body, signer);
    body.extend_from_slice(signature);
    body.extend_from_slice(extra);
    body.extend_from_slice(call);

    let mut extrinsic = Vec::with_capacity(body.len() + 4);
    Compact(body.len() as u32).encode_to(&mut extrinsic);
    extrinsic.extend_from_slice(&body);
    extrinsic
}
