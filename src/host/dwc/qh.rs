//! Queue Head
//!
//! 每个正在使用的逻辑端点对应一个 QH。QH 持有按到达顺序排列的 QTD 队列，
//! 以及创建时一次性算好的周期调度参数。

use alloc::{boxed::Box, collections::VecDeque, vec::Vec};

use log::debug;
use usb_if::{
    DeviceSpeed,
    descriptor::{EndpointType, hb_mult, packet_size},
    host::UsbDevice,
};

use super::{
    frame::{frame_num_inc, frame_num_le, last_microframe},
    params::CoreParams,
    qtd::{Pid, Qtd},
    urb::{EndpointKey, Urb},
};
use crate::{err::Result, host::Controller};

define_int_type!(QhId, u64);

/// QH 所在的调度队列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    NonPeriodicInactive,
    NonPeriodicActive,
    PeriodicInactive,
    PeriodicReady,
    PeriodicQueued,
}

impl Bucket {
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            Bucket::PeriodicInactive | Bucket::PeriodicReady | Bucket::PeriodicQueued
        )
    }
}

/// 低速/全速设备挂在非 Root Hub 的高速 Hub 下时需要 split 事务
fn needs_split(device: &UsbDevice) -> bool {
    device.speed.is_low_or_full() && device.tt.is_some_and(|tt| !tt.hub.is_root())
}

#[derive(Debug)]
pub struct QueueHead {
    id: QhId,
    endpoint: EndpointKey,
    ep_type: EndpointType,
    ep_is_in: bool,
    /// 跨传输保持的数据翻转位
    pub data_toggle: Pid,
    /// 原始 wMaxPacketSize
    maxp: u16,
    do_split: bool,
    /// 每次周期传输占用的总线时间
    usecs: u32,
    /// 轮询间隔，(微)帧
    interval: u32,
    /// 下一次可以调度的(微)帧
    sched_frame: u16,
    start_split_frame: u16,
    pub(crate) bucket: Option<Bucket>,
    pub(crate) channel: Option<u8>,
    pub(crate) qtd_list: VecDeque<Qtd>,
    pub(crate) align_buf: Option<Box<[u8]>>,
}

impl QueueHead {
    pub(crate) fn new<C: Controller>(
        id: QhId,
        urb: &Urb,
        ctrl: &C,
        params: &CoreParams,
    ) -> Self {
        let ep_type = urb.transfer_type();
        let ep_is_in = urb.is_in();
        let maxp = urb.endpoint.max_packet_size;

        let do_split = needs_split(&urb.device);
        if let (true, Some(tt)) = (do_split, urb.device.tt) {
            debug!(
                "QH init: EP {}: TT found at hub addr {}, for port {}",
                urb.endpoint.number(),
                tt.hub.address(),
                tt.port
            );
        }

        let mut qh = Self {
            id,
            endpoint: urb.endpoint_key(),
            ep_type,
            ep_is_in,
            data_toggle: Pid::Data0,
            maxp,
            do_split,
            usecs: 0,
            interval: 0,
            sched_frame: 0,
            start_split_frame: 0,
            bucket: None,
            channel: None,
            qtd_list: VecDeque::new(),
            align_buf: None,
        };

        if ep_type.is_periodic() {
            // TODO: split 事务的总线时间应按 TT 上的全速/低速事务分别计入
            let byte_count = hb_mult(maxp) * packet_size(maxp);
            qh.usecs = ctrl.bus_time_usecs(
                urb.device.speed,
                ep_is_in,
                ep_type == EndpointType::Isochronous,
                byte_count,
            );
            qh.sched_frame = frame_num_inc(ctrl.frame_number(), params.schedule_slop as u32);
            qh.interval = urb.interval;

            if ctrl.port_speed() == DeviceSpeed::High && urb.device.speed.is_low_or_full() {
                qh.interval = qh.interval.saturating_mul(8);
                qh.sched_frame = last_microframe(qh.sched_frame);
                qh.start_split_frame = qh.sched_frame;
            }
        }

        debug!(
            "QH {:?} initialized: dev {}, ep {} {}, {:?}, speed {:?}, usecs {}, interval {}",
            id,
            urb.device.address,
            urb.endpoint.number(),
            if ep_is_in { "IN" } else { "OUT" },
            ep_type,
            urb.device.speed,
            qh.usecs,
            qh.interval
        );
        qh
    }

    pub fn id(&self) -> QhId {
        self.id
    }

    pub fn endpoint(&self) -> EndpointKey {
        self.endpoint
    }

    pub fn ep_type(&self) -> EndpointType {
        self.ep_type
    }

    pub fn ep_is_in(&self) -> bool {
        self.ep_is_in
    }

    pub fn is_periodic(&self) -> bool {
        self.ep_type.is_periodic()
    }

    pub fn maxp(&self) -> u16 {
        self.maxp
    }

    /// 单个(微)帧内的最大传输字节数
    pub fn max_xfer_size(&self) -> u32 {
        packet_size(self.maxp) * hb_mult(self.maxp)
    }

    pub fn do_split(&self) -> bool {
        self.do_split
    }

    pub fn usecs(&self) -> u32 {
        self.usecs
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn sched_frame(&self) -> u16 {
        self.sched_frame
    }

    pub fn start_split_frame(&self) -> u16 {
        self.start_split_frame
    }

    pub fn bucket(&self) -> Option<Bucket> {
        self.bucket
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn is_empty(&self) -> bool {
        self.qtd_list.is_empty()
    }

    pub fn qtd_count(&self) -> usize {
        self.qtd_list.len()
    }

    pub fn qtds(&self) -> impl Iterator<Item = &Qtd> + '_ {
        self.qtd_list.iter()
    }

    /// 队首 QTD，即下一个要执行的传输
    pub fn head(&self) -> Option<&Qtd> {
        self.qtd_list.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut Qtd> {
        self.qtd_list.front_mut()
    }

    pub fn align_buf_mut(&mut self) -> Option<&mut [u8]> {
        self.align_buf.as_deref_mut()
    }

    pub(crate) fn alloc_align_buf(&mut self, size: usize) -> Result {
        if self.align_buf.is_none() {
            let mut buf = Vec::new();
            buf.try_reserve_exact(size)?;
            buf.resize(size, 0);
            self.align_buf = Some(buf.into_boxed_slice());
        }
        Ok(())
    }

    /// 计算下一次调度的(微)帧
    ///
    /// `sched_next_periodic_split` 表示当前 split 事务还有后续部分。
    pub(crate) fn update_sched_frame(&mut self, frame_number: u16, sched_next_periodic_split: bool) {
        if !self.do_split {
            self.sched_frame = frame_num_inc(self.sched_frame, self.interval);
            if frame_num_le(self.sched_frame, frame_number) {
                self.sched_frame = frame_number;
            }
            return;
        }

        if sched_next_periodic_split {
            self.sched_frame = frame_number;
            if frame_num_le(frame_number, frame_num_inc(self.start_split_frame, 1)) {
                // start-split 之后隔一帧再发 complete-split；
                // 等时 OUT 在同一帧内连续发 start-split 时例外
                if self.ep_type != EndpointType::Isochronous || self.ep_is_in {
                    self.sched_frame = frame_num_inc(self.sched_frame, 1);
                }
            }
        } else {
            self.sched_frame = frame_num_inc(self.start_split_frame, self.interval);
            if frame_num_le(self.sched_frame, frame_number) {
                self.sched_frame = frame_number;
            }
            self.sched_frame = last_microframe(self.sched_frame);
            self.start_split_frame = self.sched_frame;
        }
    }
}
