//! DesignWare USB 2.0 OTG 主机控制器的传输调度
//!
//! 所有调度状态由同一把锁保护，每个操作只加锁一次。

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use log::info;
use spin::Mutex;

use super::Controller;
use crate::err::Result;

mod bandwidth;
pub mod frame;
mod params;
mod qh;
mod qtd;
mod sched;
mod urb;

pub use bandwidth::{
    BusBandwidth, check_admission, check_max_xfer_size, check_periodic_bandwidth,
    periodic_channel_available,
};
pub use params::{CoreParams, CoreSpeed, SCHEDULE_SLOP};
pub use qh::{Bucket, QhId, QueueHead};
pub use qtd::{ControlPhase, Pid, Qtd, QtdId, SplitPos};
pub use sched::{Schedule, ScheduleCounters};
pub use urb::{EndpointKey, Urb};

pub struct DwcHcd<C>
where
    C: Controller,
{
    ctrl: C,
    sched: Mutex<Schedule>,
    next_qtd_id: AtomicU64,
}

impl<C> DwcHcd<C>
where
    C: Controller,
{
    pub fn new(ctrl: C, params: CoreParams) -> Result<Self> {
        params.validate()?;
        info!(
            "DWC OTG HCD: {} host channels, max xfer {} bytes, {:?} speed core",
            params.host_channels, params.max_transfer_size, params.speed
        );
        Ok(Self {
            ctrl,
            sched: Mutex::new(Schedule::new(params)),
            next_qtd_id: AtomicU64::new(0),
        })
    }

    pub fn controller(&self) -> &C {
        &self.ctrl
    }

    pub fn params(&self) -> CoreParams {
        *self.sched.lock().params()
    }

    pub fn qh_create(&self, urb: &Urb) -> QhId {
        self.sched.lock().qh_create(urb, &self.ctrl)
    }

    pub fn qh_add(&self, qh: QhId) -> Result {
        self.sched.lock().qh_add(qh)
    }

    pub fn qh_remove(&self, qh: QhId) {
        self.sched.lock().qh_remove(qh)
    }

    pub fn qh_deactivate(&self, qh: QhId, sched_next_periodic_split: bool) {
        let mut sched = self.sched.lock();
        let frame_number = self.ctrl.frame_number();
        sched.qh_deactivate(qh, sched_next_periodic_split, frame_number)
    }

    /// 释放 QH，返回还没有完成的 QTD
    pub fn qh_free(&self, qh: QhId) -> Result<Vec<Qtd>> {
        self.sched.lock().qh_free(qh)
    }

    pub fn qh_align_buf(&self, qh: QhId) -> Result {
        self.sched.lock().qh_align_buf(qh)
    }

    pub fn endpoint_disable(&self, key: &EndpointKey) -> Result<Vec<Qtd>> {
        self.sched.lock().endpoint_disable(key)
    }

    pub fn qtd_create(&self, urb: &Arc<Urb>) -> Qtd {
        let id = QtdId(self.next_qtd_id.fetch_add(1, Ordering::Relaxed));
        Qtd::new(id, urb.clone())
    }

    /// 提交 QTD，返回它所在的 QH
    pub fn qtd_add(&self, qtd: Qtd) -> Result<QhId> {
        self.sched.lock().qtd_add(qtd, &self.ctrl)
    }

    pub fn qtd_complete(&self, qh: QhId) -> Option<Qtd> {
        self.sched.lock().qtd_complete(qh)
    }

    pub fn urb_dequeue(&self, urb: &Urb) -> Result<Qtd> {
        let mut sched = self.sched.lock();
        let frame_number = self.ctrl.frame_number();
        sched.urb_dequeue(urb, frame_number)
    }

    /// SOF 中断：把到期的周期 QH 移入 ready 队列
    pub fn start_of_frame(&self) -> usize {
        let mut sched = self.sched.lock();
        let frame_number = self.ctrl.frame_number();
        sched.start_of_frame(frame_number)
    }

    pub fn queue_periodic(&self, qh: QhId, channel: u8) -> Result {
        self.sched.lock().queue_periodic(qh, channel)
    }

    pub fn activate_non_periodic(&self, qh: QhId, channel: u8) -> Result {
        self.sched.lock().activate_non_periodic(qh, channel)
    }

    pub fn release_channel(&self, qh: QhId) -> Option<u8> {
        self.sched.lock().release_channel(qh)
    }

    pub fn next_non_periodic(&self) -> Option<QhId> {
        self.sched.lock().next_non_periodic()
    }

    pub fn bucket(&self, bucket: Bucket) -> Vec<QhId> {
        self.sched.lock().bucket(bucket)
    }

    pub fn counters(&self) -> ScheduleCounters {
        self.sched.lock().counters()
    }

    pub fn bandwidth(&self) -> BusBandwidth {
        self.sched.lock().bandwidth()
    }

    pub fn endpoint_qh(&self, key: &EndpointKey) -> Option<QhId> {
        self.sched.lock().endpoint_qh(key)
    }

    pub fn with_qh<R>(&self, qh: QhId, f: impl FnOnce(&QueueHead) -> R) -> Option<R> {
        self.sched.lock().qh(qh).map(f)
    }

    /// 执行引擎修改 data toggle 与队首 QTD 的 split 状态
    pub fn with_qh_mut<R>(&self, qh: QhId, f: impl FnOnce(&mut QueueHead) -> R) -> Option<R> {
        self.sched.lock().qh_mut(qh).map(f)
    }
}
