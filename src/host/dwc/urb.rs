use core::sync::atomic::{AtomicU64, Ordering};

use usb_if::{
    descriptor::{EndpointDescriptor, EndpointType},
    host::UsbDevice,
    transfer::Direction,
};

use super::qtd::QtdId;

const NO_QTD: u64 = u64::MAX;

/// 逻辑端点的标识，对应 `ep->hcpriv` 的查找键
///
/// 控制端点的两个方向共用一个 QH，因此不带方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointKey {
    pub device: u8,
    pub endpoint: u8,
    pub direction: Option<Direction>,
}

/// 主机控制器收到的一次传输请求
///
/// 调度器只读取设备与端点属性，数据缓冲区由执行引擎管理。
#[derive(Debug)]
pub struct Urb {
    pub device: UsbDevice,
    pub endpoint: EndpointDescriptor,
    /// pipe 方向，控制传输每个 URB 可以不同
    pub direction: Direction,
    /// 轮询间隔，单位为设备速度下的(微)帧
    pub interval: u32,
    hcpriv: AtomicU64,
}

impl Urb {
    pub fn new(device: UsbDevice, endpoint: EndpointDescriptor) -> Self {
        let direction = endpoint.direction;
        let interval = endpoint.interval_for(device.speed);
        Self {
            device,
            endpoint,
            direction,
            interval,
            hcpriv: AtomicU64::new(NO_QTD),
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn transfer_type(&self) -> EndpointType {
        self.endpoint.transfer_type
    }

    pub fn is_in(&self) -> bool {
        self.direction.is_in()
    }

    pub fn endpoint_key(&self) -> EndpointKey {
        let direction = match self.transfer_type() {
            EndpointType::Control => None,
            _ => Some(self.endpoint.direction),
        };
        EndpointKey {
            device: self.device.address,
            endpoint: self.endpoint.number(),
            direction,
        }
    }

    /// 当前挂在该 URB 上的 QTD
    pub fn qtd(&self) -> Option<QtdId> {
        match self.hcpriv.load(Ordering::Acquire) {
            NO_QTD => None,
            raw => Some(QtdId(raw)),
        }
    }

    pub(crate) fn link_qtd(&self, id: QtdId) {
        self.hcpriv.store(id.raw(), Ordering::Release);
    }

    pub(crate) fn unlink_qtd(&self, id: QtdId) {
        let _ = self
            .hcpriv
            .compare_exchange(id.raw(), NO_QTD, Ordering::AcqRel, Ordering::Acquire);
    }
}
