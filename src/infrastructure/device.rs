//! 硬件签名设备接口
//!
//! 设备是单一串行资源：调用方保证同一时刻只有一个请求（按链顺序调度），
//! 这里不加锁。USB/HID 传输帧不在本 crate 范围内。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MigrationError;

/// 设备错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// 用户在设备上拒绝
    #[error("rejected on device: {0}")]
    Rejected(String),

    #[error("device is locked")]
    Locked,

    /// 设备上没有打开对应 App
    #[error("app is not open on device: {0}")]
    AppNotOpen(String),

    #[error("device unreachable: {0}")]
    Unreachable(String),
}

impl DeviceError {
    /// 用户主动取消 / 设备锁定
    pub fn is_user_action(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Locked)
    }
}

impl From<DeviceError> for MigrationError {
    fn from(err: DeviceError) -> Self {
        if err.is_user_action() {
            MigrationError::DeviceRejection(err.to_string())
        } else {
            MigrationError::Connection(err.to_string())
        }
    }
}

/// 设备派生出的地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// SS58 地址
    pub address: String,
    pub public_key: [u8; 32],
}

/// 设备 App 版本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub locked: bool,
}

impl std::fmt::Display for DeviceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 硬件签名设备
#[async_trait]
pub trait SigningDevice: Send + Sync {
    /// 按派生路径获取地址
    ///
    /// # Arguments
    /// * `path` - 派生路径
    /// * `ss58_prefix` - 地址前缀
    /// * `confirm_on_device` - 是否要求在设备屏幕上确认
    async fn derive_address(
        &self,
        path: &str,
        ss58_prefix: u16,
        confirm_on_device: bool,
    ) -> Result<DeviceAddress, DeviceError>;

    /// 获取 App 版本（兼作 "App 已打开" 探测）
    async fn version(&self) -> Result<DeviceVersion, DeviceError>;

    /// 对载荷签名，返回 SCALE 编码的 MultiSignature（类型字节 + 64 字节签名）
    ///
    /// `metadata_proof` 让设备在不持有完整元数据的情况下校验载荷
    async fn sign(
        &self,
        path: &str,
        payload: &[u8],
        chain_tag: &str,
        metadata_proof: &[u8],
    ) -> Result<Vec<u8>, DeviceError>;
}
