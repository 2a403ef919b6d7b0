use usb_if::{DeviceSpeed, host::bus_time};

pub mod dwc;

pub use dwc::DwcHcd;

/// 调度器需要从控制器读取的硬件状态
pub trait Controller: Send + Sync + 'static {
    /// 当前 (微)帧号，HFNUM.FRNUM
    fn frame_number(&self) -> u16;

    /// 根端口协商出的速度
    fn port_speed(&self) -> DeviceSpeed;

    /// 一次周期事务占用的总线时间（微秒）
    fn bus_time_usecs(
        &self,
        speed: DeviceSpeed,
        is_in: bool,
        is_isoc: bool,
        byte_count: u32,
    ) -> u32 {
        bus_time::bus_time_usecs(speed, is_in, is_isoc, byte_count)
    }
}
