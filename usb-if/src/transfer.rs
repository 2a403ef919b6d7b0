/// 传输方向（以主机为参照）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    #[default]
    Out,
    In,
}

impl Direction {
    /// 从端点地址的 bit7 解析方向
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn is_in(&self) -> bool {
        matches!(self, Direction::In)
    }
}
