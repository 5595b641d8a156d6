pub mod amount;
pub mod hashing;
pub mod ss58;
pub mod time_utils;

// Re-export commonly used functions
pub use amount::format_balance;
pub use hashing::{blake2_256, to_hex_prefixed};
pub use time_utils::format_unlock_time_remaining;
