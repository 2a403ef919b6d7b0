//! 端点描述符
//!
//! 只保留调度器关心的字段：传输类型、方向、wMaxPacketSize 与 bInterval。

use num_enum::{FromPrimitive, IntoPrimitive};

use crate::{host::hub::DeviceSpeed, transfer::Direction};

/// 端点传输类型（bmAttributes bits 1:0）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EndpointType {
    #[num_enum(default)]
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl EndpointType {
    pub fn from_attributes(bm_attributes: u8) -> Self {
        Self::from(bm_attributes & 0x03)
    }

    /// 中断与等时传输需要周期性带宽
    pub fn is_periodic(&self) -> bool {
        matches!(self, EndpointType::Interrupt | EndpointType::Isochronous)
    }
}

/// wMaxPacketSize 的 bits 10:0
pub const fn packet_size(max_packet_size: u16) -> u32 {
    (max_packet_size & 0x07FF) as u32
}

/// 高带宽倍数，wMaxPacketSize 的 bits 12:11 加一
pub const fn hb_mult(max_packet_size: u16) -> u32 {
    1 + ((max_packet_size >> 11) & 0x03) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress，bit7 为方向
    pub address: u8,
    pub transfer_type: EndpointType,
    pub direction: Direction,
    /// 原始 wMaxPacketSize，包含高带宽倍数位
    pub max_packet_size: u16,
    /// 原始 bInterval
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn new(address: u8, bm_attributes: u8, max_packet_size: u16, interval: u8) -> Self {
        Self {
            address,
            transfer_type: EndpointType::from_attributes(bm_attributes),
            direction: Direction::from_address(address),
            max_packet_size,
            interval,
        }
    }

    /// 端点号（去掉方向位）
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    /// 按 USB core 提交 URB 时的规则换算轮询间隔
    ///
    /// 全速/低速中断端点以帧为单位使用 bInterval；
    /// 全速等时与高速周期端点使用 2^(bInterval-1)，高速时单位为微帧。
    /// 结果按速度截断上限后向下取整到 2 的幂：
    /// 全速/低速中断 128 帧，全速等时 1024 帧，高速 1024 x 8 微帧。
    /// 非周期端点返回 0。
    pub fn interval_for(&self, speed: DeviceSpeed) -> u32 {
        if !self.transfer_type.is_periodic() {
            return 0;
        }
        let exponent = (self.interval.clamp(1, 16) - 1) as u32;
        let (interval, max) = match (speed, self.transfer_type) {
            (DeviceSpeed::Low | DeviceSpeed::Full, EndpointType::Interrupt) => {
                (self.interval.max(1) as u32, 128)
            }
            (DeviceSpeed::Low | DeviceSpeed::Full, _) => (1 << exponent, 1024),
            _ => (1 << exponent, 1024 * 8),
        };
        1 << interval.min(max).ilog2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_packet_fields() {
        // 1024 字节，每微帧 3 个事务
        let maxp = 0x1400;
        assert_eq!(packet_size(maxp), 1024);
        assert_eq!(hb_mult(maxp), 3);
        assert_eq!(hb_mult(64), 1);
    }

    #[test]
    fn test_endpoint_from_raw() {
        let ep = EndpointDescriptor::new(0x81, 0x03, 8, 10);
        assert_eq!(ep.transfer_type, EndpointType::Interrupt);
        assert_eq!(ep.direction, Direction::In);
        assert_eq!(ep.number(), 1);
        assert!(ep.transfer_type.is_periodic());

        let bulk = EndpointDescriptor::new(0x02, 0x02, 512, 0);
        assert_eq!(bulk.direction, Direction::Out);
        assert!(!bulk.transfer_type.is_periodic());
        assert_eq!(bulk.interval_for(DeviceSpeed::High), 0);
    }

    #[test]
    fn test_interval_normalisation() {
        // 全速/低速中断向下取整到 2 的幂
        let int_ep = EndpointDescriptor::new(0x81, 0x03, 8, 10);
        assert_eq!(int_ep.interval_for(DeviceSpeed::Full), 8);
        assert_eq!(int_ep.interval_for(DeviceSpeed::Low), 8);
        let slow = EndpointDescriptor::new(0x81, 0x03, 8, 255);
        assert_eq!(slow.interval_for(DeviceSpeed::Full), 128);

        let hs_int = EndpointDescriptor::new(0x81, 0x03, 64, 4);
        assert_eq!(hs_int.interval_for(DeviceSpeed::High), 8);

        let fs_iso = EndpointDescriptor::new(0x83, 0x01, 192, 1);
        assert_eq!(fs_iso.interval_for(DeviceSpeed::Full), 1);

        let fs_iso_slow = EndpointDescriptor::new(0x83, 0x01, 192, 16);
        assert_eq!(fs_iso_slow.interval_for(DeviceSpeed::Full), 1024);

        // 高速最长 1024 帧，不能是 14 位帧号的整周期
        let hs_slow = EndpointDescriptor::new(0x81, 0x03, 64, 16);
        assert_eq!(hs_slow.interval_for(DeviceSpeed::High), 8192);
        let hs_15 = EndpointDescriptor::new(0x81, 0x03, 64, 15);
        assert_eq!(hs_15.interval_for(DeviceSpeed::High), 8192);
        let hs_14 = EndpointDescriptor::new(0x81, 0x03, 64, 14);
        assert_eq!(hs_14.interval_for(DeviceSpeed::High), 8192);

        let zero = EndpointDescriptor::new(0x81, 0x03, 8, 0);
        assert_eq!(zero.interval_for(DeviceSpeed::Full), 1);
        assert_eq!(zero.interval_for(DeviceSpeed::High), 1);
    }
}
