#![cfg_attr(not(test), no_std)]

pub mod descriptor;
pub mod host;
pub mod transfer;

// 重新导出 host::hub::DeviceSpeed，避免重复定义
pub use host::hub::DeviceSpeed;
