pub mod bus_time;
pub mod hub;

use hub::{DeviceSpeed, TtLink};

/// URB 所属设备的属性，由 USB core 提供，对调度器只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    /// 设备地址（devnum）
    pub address: u8,
    pub speed: DeviceSpeed,
    /// 低速/全速设备挂在高速 Hub 下时的 TT 连接
    pub tt: Option<TtLink>,
}

impl UsbDevice {
    pub fn new(address: u8, speed: DeviceSpeed) -> Self {
        Self {
            address,
            speed,
            tt: None,
        }
    }

    pub fn with_tt(mut self, tt: TtLink) -> Self {
        self.tt = Some(tt);
        self
    }
}
