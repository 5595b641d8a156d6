//! 金额格式化（最小单位 ↔ 显示单位）

use rust_decimal::Decimal;

/// 最小单位转换为显示单位，例如 planck → DOT
///
/// 超出 Decimal 表示范围时退回原始整数字符串
pub fn format_balance(raw: u128, decimals: u32, symbol: &str) -> String {
    let formatted = i128::try_from(raw)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, decimals).ok())
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| raw.to_string());

    format!("{} {}", formatted, symbol)
}
