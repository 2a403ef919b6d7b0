//! Queue Transfer Descriptor
//!
//! 每个在途 URB 对应一个 QTD，挂在所属端点 QH 的 QTD 队列上。

use alloc::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use usb_if::descriptor::EndpointType;

use super::urb::Urb;

define_int_type!(QtdId, u64);

/// 主机通道 PID（HCTSIZ.PID 编码）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Pid {
    #[default]
    Data0 = 0,
    Data2 = 1,
    Data1 = 2,
    /// 与 SETUP 共用编码
    MData = 3,
}

impl Pid {
    pub const SETUP: Pid = Pid::MData;
}

/// 控制传输阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ControlPhase {
    Setup = 0,
    Data = 1,
    Status = 2,
}

/// 等时 split 事务在负载中的位置（HCSPLT.XACTPOS）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SplitPos {
    Mid = 0,
    End = 1,
    Begin = 2,
    #[default]
    All = 3,
}

#[derive(Debug)]
pub struct Qtd {
    id: QtdId,
    urb: Arc<Urb>,
    /// 仅用于控制传输的数据阶段
    pub data_toggle: Pid,
    /// 非控制传输为 `None`
    pub control_phase: Option<ControlPhase>,
    /// 下一次发起的是 complete-split
    pub complete_split: bool,
    pub isoc_split_pos: SplitPos,
    /// 等时 split 已经发出的字节数
    pub isoc_split_offset: u32,
}

impl Qtd {
    pub(crate) fn new(id: QtdId, urb: Arc<Urb>) -> Self {
        // 控制传输总是从 SETUP 开始，数据阶段固定以 DATA1 起始
        let (data_toggle, control_phase) = match urb.transfer_type() {
            EndpointType::Control => (Pid::Data1, Some(ControlPhase::Setup)),
            _ => (Pid::Data0, None),
        };
        urb.link_qtd(id);

        Self {
            id,
            urb,
            data_toggle,
            control_phase,
            complete_split: false,
            isoc_split_pos: SplitPos::All,
            isoc_split_offset: 0,
        }
    }

    pub fn id(&self) -> QtdId {
        self.id
    }

    pub fn urb(&self) -> &Arc<Urb> {
        &self.urb
    }

    /// 是否处于一次多微帧 split 事务的中途
    pub fn in_split(&self) -> bool {
        self.complete_split || self.isoc_split_offset > 0
    }

    /// 交还给调用方前解除 URB 上的链接
    pub(crate) fn detach(self) -> Self {
        self.urb.unlink_qtd(self.id);
        self
    }
}
