//! USB Hub 相关定义

/// USB 设备速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceSpeed {
    Low = 0,
    Full = 1,
    High = 2,
    Wireless = 3,
    SuperSpeed = 4,
    SuperSpeedPlus = 5,
}

impl DeviceSpeed {
    /// 低速或全速
    pub fn is_low_or_full(&self) -> bool {
        matches!(self, DeviceSpeed::Low | DeviceSpeed::Full)
    }
}

impl From<u8> for DeviceSpeed {
    fn from(value: u8) -> Self {
        match value {
            0 => DeviceSpeed::Low,
            1 => DeviceSpeed::Full,
            2 => DeviceSpeed::High,
            3 => DeviceSpeed::Wireless,
            4 => DeviceSpeed::SuperSpeed,
            5 => DeviceSpeed::SuperSpeedPlus,
            _ => DeviceSpeed::Full,
        }
    }
}

/// Root Hub 在总线上固定占用的设备地址
pub const ROOT_HUB_ADDRESS: u8 = 1;

/// Hub 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubKind {
    /// 控制器集成的虚拟 Root Hub
    Root,

    /// External Hub，附带其设备地址
    External(u8),
}

impl HubKind {
    pub fn from_address(address: u8) -> Self {
        if address == ROOT_HUB_ADDRESS {
            HubKind::Root
        } else {
            HubKind::External(address)
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, HubKind::Root)
    }

    pub fn address(&self) -> u8 {
        match self {
            HubKind::Root => ROOT_HUB_ADDRESS,
            HubKind::External(address) => *address,
        }
    }
}

/// Transaction Translator 连接
///
/// 用于高速 Hub 与低速/全速设备的通信。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtLink {
    /// 提供 TT 的 Hub
    pub hub: HubKind,

    /// 设备所在的 Hub 端口（1-based）
    pub port: u8,
}

impl TtLink {
    pub fn new(hub: HubKind, port: u8) -> Self {
        Self { hub, port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_kind_from_address() {
        assert_eq!(HubKind::from_address(1), HubKind::Root);
        assert_eq!(HubKind::from_address(4), HubKind::External(4));
        assert!(HubKind::from_address(1).is_root());
        assert_eq!(HubKind::External(7).address(), 7);
        assert_eq!(HubKind::Root.address(), ROOT_HUB_ADDRESS);
    }

    #[test]
    fn test_speed_from_raw() {
        assert_eq!(DeviceSpeed::from(0), DeviceSpeed::Low);
        assert_eq!(DeviceSpeed::from(2), DeviceSpeed::High);
        assert_eq!(DeviceSpeed::from(9), DeviceSpeed::Full);
        assert!(DeviceSpeed::Low.is_low_or_full());
        assert!(!DeviceSpeed::High.is_low_or_full());
    }
}
