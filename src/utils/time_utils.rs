//! 时间工具模块

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// 解锁剩余时间（按 era 数 × 每个 era 的小时数估算）
///
/// `unlock_era <= current_era` 时返回 "ready"
pub fn format_unlock_time_remaining(
    unlock_era: u32,
    current_era: u32,
    era_duration_hours: u32,
) -> String {
    if unlock_era <= current_era {
        return "ready".to_string();
    }

    let hours = (unlock_era - current_era) as u64 * era_duration_hours as u64;
    let days = hours / 24;
    let rest = hours % 24;

    match (days, rest) {
        (0, h) => plural(h, "hour"),
        (d, 0) => plural(d, "day"),
        (d, h) => format!("{} {}", plural(d, "day"), plural(h, "hour")),
    }
}
