//! 周期传输的总线时间估算
//!
//! 参照 USB 2.0 规范 5.11.3，结果以纳秒计算后换算为微秒。

use super::hub::DeviceSpeed;

/// 主机端处理延迟（ns）
const BW_HOST_DELAY: u64 = 1000;
/// 低速经由 Hub 的 setup 时间（ns）
const BW_HUB_LS_SETUP: u64 = 333;
/// 高速主机延迟（ns）
const USB2_HOST_DELAY: u64 = 5;

/// 含位填充的比特时间（按 7/6 估算）
const fn bit_time(byte_count: u64) -> u64 {
    7 * 8 * byte_count / 6
}

const fn ns_to_us(ns: u64) -> u64 {
    (ns + 500) / 1000
}

const fn hs_nsecs(byte_count: u64) -> u64 {
    (55 * 8 * 2083 + 2083 * (3 + bit_time(byte_count))) / 1000 + USB2_HOST_DELAY
}

const fn hs_nsecs_iso(byte_count: u64) -> u64 {
    (38 * 8 * 2083 + 2083 * (3 + bit_time(byte_count))) / 1000 + USB2_HOST_DELAY
}

/// 一次周期事务占用的总线时间（ns）
///
/// 低速只有中断传输。超出 USB 2.0 的速度按高速计算。
pub fn bus_time_nsecs(speed: DeviceSpeed, is_in: bool, is_isoc: bool, byte_count: u32) -> u64 {
    let byte_count = byte_count as u64;
    match speed {
        DeviceSpeed::Low => {
            if is_in {
                let tmp = (67667 * (31 + 10 * bit_time(byte_count))) / 1000;
                64060 + 2 * BW_HUB_LS_SETUP + BW_HOST_DELAY + tmp
            } else {
                let tmp = (66700 * (31 + 10 * bit_time(byte_count))) / 1000;
                64107 + 2 * BW_HUB_LS_SETUP + BW_HOST_DELAY + tmp
            }
        }
        DeviceSpeed::Full => {
            let tmp = (8354 * (31 + 10 * bit_time(byte_count))) / 1000;
            if is_isoc {
                (if is_in { 7268 } else { 6265 }) + BW_HOST_DELAY + tmp
            } else {
                9107 + BW_HOST_DELAY + tmp
            }
        }
        _ => {
            if is_isoc {
                hs_nsecs_iso(byte_count)
            } else {
                hs_nsecs(byte_count)
            }
        }
    }
}

/// 一次周期事务占用的总线时间（us，四舍五入）
pub fn bus_time_usecs(speed: DeviceSpeed, is_in: bool, is_isoc: bool, byte_count: u32) -> u32 {
    ns_to_us(bus_time_nsecs(speed, is_in, is_isoc, byte_count)) as u32
}
