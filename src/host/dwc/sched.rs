//! QH 调度队列
//!
//! 所有 QH 都保存在 `qhs` 中，调度队列只保存 [`QhId`]。
//! 每个 QH 的 `bucket` 字段与它实际所在的队列始终一致。

use alloc::{
    collections::{BTreeMap, VecDeque},
    vec::Vec,
};

use log::{debug, trace};

use super::{
    bandwidth::{self, BusBandwidth},
    frame::frame_num_le,
    params::CoreParams,
    qh::{Bucket, QhId, QueueHead},
    qtd::Qtd,
    urb::{EndpointKey, Urb},
};
use crate::{
    err::{HcdError, Result},
    host::Controller,
};

/// 准入控制使用的计数器
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCounters {
    /// 已准入的周期 QH 数量，每个占用一个主机通道
    pub periodic_channels: u32,
    /// 当前分配给非周期 QH 的主机通道数量
    pub non_periodic_channels: u32,
    /// 已准入周期 QH 的 usecs 之和
    pub periodic_usecs: u32,
}

pub struct Schedule {
    params: CoreParams,
    qhs: BTreeMap<QhId, QueueHead>,
    endpoints: BTreeMap<EndpointKey, QhId>,
    next_qh_id: u64,
    non_periodic_inactive: VecDeque<QhId>,
    non_periodic_active: VecDeque<QhId>,
    /// 非周期轮询的当前位置，总是指向 `non_periodic_active` 中的元素
    non_periodic_cursor: Option<QhId>,
    periodic_inactive: VecDeque<QhId>,
    periodic_ready: VecDeque<QhId>,
    periodic_queued: VecDeque<QhId>,
    counters: ScheduleCounters,
    bandwidth: BusBandwidth,
}

impl Schedule {
    pub fn new(params: CoreParams) -> Self {
        Self {
            params,
            qhs: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            next_qh_id: 0,
            non_periodic_inactive: VecDeque::new(),
            non_periodic_active: VecDeque::new(),
            non_periodic_cursor: None,
            periodic_inactive: VecDeque::new(),
            periodic_ready: VecDeque::new(),
            periodic_queued: VecDeque::new(),
            counters: ScheduleCounters::default(),
            bandwidth: BusBandwidth::default(),
        }
    }

    pub fn params(&self) -> &CoreParams {
        &self.params
    }

    pub fn counters(&self) -> ScheduleCounters {
        self.counters
    }

    pub fn bandwidth(&self) -> BusBandwidth {
        self.bandwidth
    }

    pub fn qh(&self, id: QhId) -> Option<&QueueHead> {
        self.qhs.get(&id)
    }

    pub fn qh_mut(&mut self, id: QhId) -> Option<&mut QueueHead> {
        self.qhs.get_mut(&id)
    }

    pub fn qh_count(&self) -> usize {
        self.qhs.len()
    }

    /// 端点当前关联的 QH
    pub fn endpoint_qh(&self, key: &EndpointKey) -> Option<QhId> {
        self.endpoints.get(key).copied()
    }

    pub fn non_periodic_cursor(&self) -> Option<QhId> {
        self.non_periodic_cursor
    }

    fn list(&self, bucket: Bucket) -> &VecDeque<QhId> {
        match bucket {
            Bucket::NonPeriodicInactive => &self.non_periodic_inactive,
            Bucket::NonPeriodicActive => &self.non_periodic_active,
            Bucket::PeriodicInactive => &self.periodic_inactive,
            Bucket::PeriodicReady => &self.periodic_ready,
            Bucket::PeriodicQueued => &self.periodic_queued,
        }
    }

    fn list_mut(&mut self, bucket: Bucket) -> &mut VecDeque<QhId> {
        match bucket {
            Bucket::NonPeriodicInactive => &mut self.non_periodic_inactive,
            Bucket::NonPeriodicActive => &mut self.non_periodic_active,
            Bucket::PeriodicInactive => &mut self.periodic_inactive,
            Bucket::PeriodicReady => &mut self.periodic_ready,
            Bucket::PeriodicQueued => &mut self.periodic_queued,
        }
    }

    /// 队列快照，按调度顺序
    pub fn bucket(&self, bucket: Bucket) -> Vec<QhId> {
        self.list(bucket).iter().copied().collect()
    }

    pub fn qh_create<C: Controller>(&mut self, urb: &Urb, ctrl: &C) -> QhId {
        let id = QhId(self.next_qh_id);
        self.next_qh_id += 1;
        let qh = QueueHead::new(id, urb, ctrl, &self.params);
        self.qhs.insert(id, qh);
        id
    }

    /// 从所在队列摘下，不修改任何计数器
    fn unlink(&mut self, id: QhId) -> Option<Bucket> {
        let bucket = self.qhs.get_mut(&id)?.bucket.take()?;
        let list = self.list_mut(bucket);
        if let Some(pos) = list.iter().position(|&q| q == id) {
            list.remove(pos);
        }
        Some(bucket)
    }

    /// 挂到未被链接的 QH 上，需要分配时可能失败
    fn link(&mut self, id: QhId, bucket: Bucket) -> Result {
        let list = self.list_mut(bucket);
        list.try_reserve(1)?;
        list.push_back(id);
        if let Some(qh) = self.qhs.get_mut(&id) {
            qh.bucket = Some(bucket);
        }
        Ok(())
    }

    fn move_to(&mut self, id: QhId, bucket: Bucket) {
        self.unlink(id);
        self.list_mut(bucket).push_back(id);
        if let Some(qh) = self.qhs.get_mut(&id) {
            qh.bucket = Some(bucket);
        }
        trace!("QH {:?} -> {:?}", id, bucket);
    }

    /// 把 QH 加入调度，已在调度中时什么也不做
    pub fn qh_add(&mut self, id: QhId) -> Result {
        let qh = self.qhs.get(&id).ok_or(HcdError::NotFound)?;
        if qh.bucket.is_some() {
            return Ok(());
        }
        if qh.is_periodic() {
            self.schedule_periodic(id)
        } else {
            self.link(id, Bucket::NonPeriodicInactive)
        }
    }

    fn schedule_periodic(&mut self, id: QhId) -> Result {
        let qh = self.qhs.get(&id).ok_or(HcdError::NotFound)?;
        bandwidth::check_admission(&self.params, &self.counters, qh)?;

        self.link(id, Bucket::PeriodicInactive)?;

        let qh = self.qhs.get(&id).ok_or(HcdError::NotFound)?;
        self.counters.periodic_channels += 1;
        self.counters.periodic_usecs += qh.usecs();
        self.bandwidth.claim(qh);
        debug!(
            "Scheduled {:?} QH {:?}: usecs {}, interval {}, sched_frame {:#x}",
            qh.ep_type(),
            id,
            qh.usecs(),
            qh.interval(),
            qh.sched_frame()
        );
        Ok(())
    }

    fn deschedule_periodic(&mut self, id: QhId) {
        self.unlink(id);
        if let Some(qh) = self.qhs.get(&id) {
            self.counters.periodic_channels = self.counters.periodic_channels.saturating_sub(1);
            self.counters.periodic_usecs = self.counters.periodic_usecs.saturating_sub(qh.usecs());
            self.bandwidth.release(qh);
            debug!("Descheduled {:?} QH {:?}", qh.ep_type(), id);
        }
    }

    /// `non_periodic_active` 中 `id` 之后的元素，到尾部时回绕
    fn active_successor(&self, id: QhId) -> Option<QhId> {
        let list = &self.non_periodic_active;
        let pos = list.iter().position(|&q| q == id)?;
        let next = list[(pos + 1) % list.len()];
        (next != id).then_some(next)
    }

    /// 把 QH 移出调度，未在调度中时什么也不做
    pub fn qh_remove(&mut self, id: QhId) {
        let Some(qh) = self.qhs.get(&id) else {
            return;
        };
        if qh.bucket.is_none() {
            return;
        }
        if qh.is_periodic() {
            self.deschedule_periodic(id);
        } else {
            if self.non_periodic_cursor == Some(id) {
                self.non_periodic_cursor = self.active_successor(id);
                trace!("Non-periodic cursor -> {:?}", self.non_periodic_cursor);
            }
            self.unlink(id);
        }
    }

    /// 一次传输结束后重新安排 QH
    pub fn qh_deactivate(&mut self, id: QhId, sched_next_periodic_split: bool, frame_number: u16) {
        let Some(qh) = self.qhs.get_mut(&id) else {
            return;
        };

        if !qh.is_periodic() {
            let has_work = !qh.is_empty();
            self.qh_remove(id);
            if has_work {
                self.move_to(id, Bucket::NonPeriodicInactive);
            }
            return;
        }

        qh.update_sched_frame(frame_number, sched_next_periodic_split);
        let sched_frame = qh.sched_frame();
        let linked = qh.bucket.is_some();
        let is_empty = qh.is_empty();

        if is_empty {
            self.qh_remove(id);
        } else if !linked {
            debug!("QH {:?} deactivated outside of the schedule", id);
        } else if sched_frame == frame_number {
            self.move_to(id, Bucket::PeriodicReady);
        } else {
            self.move_to(id, Bucket::PeriodicInactive);
        }
    }

    /// 把到期的周期 QH 移入 `periodic_ready`，返回移动的数量
    pub fn start_of_frame(&mut self, frame_number: u16) -> usize {
        let due: Vec<QhId> = self
            .periodic_inactive
            .iter()
            .copied()
            .filter(|id| {
                self.qhs
                    .get(id)
                    .is_some_and(|qh| frame_num_le(qh.sched_frame(), frame_number))
            })
            .collect();
        for &id in &due {
            self.move_to(id, Bucket::PeriodicReady);
        }
        due.len()
    }

    /// 执行引擎为就绪的周期 QH 分配了主机通道
    pub fn queue_periodic(&mut self, id: QhId, channel: u8) -> Result {
        let qh = self.qhs.get_mut(&id).ok_or(HcdError::NotFound)?;
        if qh.bucket != Some(Bucket::PeriodicReady) {
            return Err(HcdError::Busy("periodic ready"));
        }
        qh.channel = Some(channel);
        self.move_to(id, Bucket::PeriodicQueued);
        Ok(())
    }

    /// 执行引擎为非周期 QH 分配了主机通道
    pub fn activate_non_periodic(&mut self, id: QhId, channel: u8) -> Result {
        let qh = self.qhs.get_mut(&id).ok_or(HcdError::NotFound)?;
        if qh.bucket != Some(Bucket::NonPeriodicInactive) {
            return Err(HcdError::Busy("non-periodic inactive"));
        }
        if qh.channel.replace(channel).is_none() {
            self.counters.non_periodic_channels += 1;
        }
        self.move_to(id, Bucket::NonPeriodicActive);
        if self.non_periodic_cursor.is_none() {
            self.non_periodic_cursor = Some(id);
        }
        Ok(())
    }

    /// 通道完成或被停止后归还
    pub fn release_channel(&mut self, id: QhId) -> Option<u8> {
        let qh = self.qhs.get_mut(&id)?;
        let channel = qh.channel.take()?;
        if !qh.is_periodic() {
            self.counters.non_periodic_channels =
                self.counters.non_periodic_channels.saturating_sub(1);
        }
        Some(channel)
    }

    /// 非周期轮询：返回游标处的 QH 并把游标后移一位
    pub fn next_non_periodic(&mut self) -> Option<QhId> {
        let current = self
            .non_periodic_cursor
            .or_else(|| self.non_periodic_active.front().copied())?;
        self.non_periodic_cursor = self.active_successor(current).or(Some(current));
        Some(current)
    }

    /// 把 QTD 挂到端点的 QH 上，必要时新建 QH 并加入调度
    pub fn qtd_add<C: Controller>(&mut self, qtd: Qtd, ctrl: &C) -> Result<QhId> {
        let key = qtd.urb().endpoint_key();
        let (id, created) = match self.endpoints.get(&key) {
            Some(&id) if self.qhs.contains_key(&id) => (id, false),
            _ => (self.qh_create(qtd.urb(), ctrl), true),
        };

        if let Err(e) = self.enqueue(id, qtd) {
            if created {
                self.qhs.remove(&id);
            }
            return Err(e);
        }
        if created {
            self.endpoints.insert(key, id);
        }
        Ok(id)
    }

    fn enqueue(&mut self, id: QhId, qtd: Qtd) -> Result {
        let reserved = match self.qhs.get_mut(&id) {
            Some(qh) => qh.qtd_list.try_reserve(1).map_err(HcdError::from),
            None => Err(HcdError::NotFound),
        };
        match reserved.and_then(|_| self.qh_add(id)) {
            Ok(()) => {
                if let Some(qh) = self.qhs.get_mut(&id) {
                    qh.qtd_list.push_back(qtd);
                }
                Ok(())
            }
            Err(e) => {
                qtd.detach();
                Err(e)
            }
        }
    }

    /// 队首 QTD 完成，交还给调用方
    pub fn qtd_complete(&mut self, id: QhId) -> Option<Qtd> {
        let qtd = self.qhs.get_mut(&id)?.qtd_list.pop_front()?;
        Some(qtd.detach())
    }

    /// 取消 URB
    ///
    /// 正在通道上执行的 QTD 被取消时会归还通道并重新安排 QH；
    /// 否则只在 QTD 队列空了之后把 QH 移出调度。
    pub fn urb_dequeue(&mut self, urb: &Urb, frame_number: u16) -> Result<Qtd> {
        let qtd_id = urb.qtd().ok_or(HcdError::NotFound)?;
        let id = self
            .endpoint_qh(&urb.endpoint_key())
            .ok_or(HcdError::NotFound)?;
        let qh = self.qhs.get_mut(&id).ok_or(HcdError::NotFound)?;
        let pos = qh
            .qtd_list
            .iter()
            .position(|q| q.id() == qtd_id)
            .ok_or(HcdError::NotFound)?;
        let in_process = pos == 0 && qh.channel.is_some();
        let qtd = qh.qtd_list.remove(pos).ok_or(HcdError::NotFound)?.detach();
        let is_empty = qh.is_empty();

        if in_process {
            debug!("URB dequeue: QTD {:?} in process on QH {:?}", qtd_id, id);
            self.release_channel(id);
            self.qh_deactivate(id, false, frame_number);
        } else if is_empty {
            self.qh_remove(id);
        }
        Ok(qtd)
    }

    /// 为 split 传输准备对齐缓冲区
    pub fn qh_align_buf(&mut self, id: QhId) -> Result {
        let size = self.params.max_transfer_size as usize;
        self.qhs
            .get_mut(&id)
            .ok_or(HcdError::NotFound)?
            .alloc_align_buf(size)
    }

    /// 释放 QH 及其剩余的 QTD
    pub fn qh_free(&mut self, id: QhId) -> Result<Vec<Qtd>> {
        self.release_channel(id);
        self.qh_remove(id);
        let mut qh = self.qhs.remove(&id).ok_or(HcdError::NotFound)?;
        if self.endpoints.get(&qh.endpoint()) == Some(&id) {
            self.endpoints.remove(&qh.endpoint());
        }
        let orphans = qh.qtd_list.drain(..).map(Qtd::detach).collect();
        debug!("QH {:?} freed", id);
        Ok(orphans)
    }

    /// 端点被禁用时释放其 QH
    pub fn endpoint_disable(&mut self, key: &EndpointKey) -> Result<Vec<Qtd>> {
        let id = self.endpoint_qh(key).ok_or(HcdError::NotFound)?;
        self.qh_free(id)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use usb_if::{DeviceSpeed, descriptor::EndpointDescriptor, host::UsbDevice};

    use super::*;
    use crate::host::dwc::{mock::MockController, qtd::QtdId};

    fn bulk_urb(addr: u8, ep: u8) -> Arc<Urb> {
        Arc::new(Urb::new(
            UsbDevice::new(addr, DeviceSpeed::High),
            EndpointDescriptor::new(ep, 0x02, 512, 0),
        ))
    }

    fn int_urb(addr: u8) -> Arc<Urb> {
        Arc::new(Urb::new(
            UsbDevice::new(addr, DeviceSpeed::High),
            EndpointDescriptor::new(0x81, 0x03, 64, 3),
        ))
    }

    struct Fixture {
        ctrl: MockController,
        sched: Schedule,
        next_qtd: u64,
    }

    impl Fixture {
        fn new(params: CoreParams) -> Self {
            Self {
                ctrl: MockController::new(90).with_usecs(50),
                sched: Schedule::new(params),
                next_qtd: 0,
            }
        }

        fn submit(&mut self, urb: &Arc<Urb>) -> Result<QhId> {
            self.next_qtd += 1;
            let qtd = Qtd::new(QtdId(self.next_qtd), urb.clone());
            self.sched.qtd_add(qtd, &self.ctrl)
        }

        fn bucket_of(&self, id: QhId) -> Option<Bucket> {
            self.sched.qh(id).and_then(|qh| qh.bucket())
        }
    }

    #[test]
    fn test_qtd_add_reuses_endpoint_qh() {
        let mut f = Fixture::new(CoreParams::default());
        let urb1 = bulk_urb(2, 0x02);
        let urb2 = bulk_urb(2, 0x02);
        let a = f.submit(&urb1).unwrap();
        let b = f.submit(&urb2).unwrap();
        assert_eq!(a, b);
        assert_eq!(f.sched.qh(a).map(|qh| qh.qtd_count()), Some(2));
        assert_eq!(f.sched.bucket(Bucket::NonPeriodicInactive), [a]);
    }

    #[test]
    fn test_qh_add_idempotent() {
        let mut f = Fixture::new(CoreParams::default());
        let id = f.submit(&int_urb(2)).unwrap();
        f.sched.qh_add(id).unwrap();
        assert_eq!(f.sched.bucket(Bucket::PeriodicInactive), [id]);
        assert_eq!(f.sched.counters().periodic_usecs, 50);
    }

    #[test]
    fn test_remove_unlinked_is_noop() {
        let mut f = Fixture::new(CoreParams::default());
        let id = f.sched.qh_create(&int_urb(2), &f.ctrl);
        f.sched.qh_remove(id);
        assert_eq!(f.sched.counters(), ScheduleCounters::default());
        assert_eq!(f.sched.bandwidth(), BusBandwidth::default());
    }

    #[test]
    fn test_failed_admission_frees_new_qh() {
        let mut f = Fixture::new(CoreParams::default().with_host_channels(1));
        let urb = int_urb(2);
        let err = f.submit(&urb).unwrap_err();
        assert!(err.is_admission_denied());
        assert_eq!(f.sched.qh_count(), 0);
        assert_eq!(f.sched.endpoint_qh(&urb.endpoint_key()), None);
        assert_eq!(urb.qtd(), None);
    }

    #[test]
    fn test_cursor_follows_removal() {
        let mut f = Fixture::new(CoreParams::default());
        let ids: Vec<QhId> = (0..3)
            .map(|i| f.submit(&bulk_urb(2, i + 1)).unwrap())
            .collect();
        for (ch, &id) in ids.iter().enumerate() {
            f.sched.activate_non_periodic(id, ch as u8).unwrap();
        }
        assert_eq!(f.sched.counters().non_periodic_channels, 3);
        assert_eq!(f.sched.non_periodic_cursor(), Some(ids[0]));

        f.sched.qh_remove(ids[0]);
        assert_eq!(f.sched.non_periodic_cursor(), Some(ids[1]));
        assert_eq!(f.sched.next_non_periodic(), Some(ids[1]));
        assert_eq!(f.sched.next_non_periodic(), Some(ids[2]));
        assert_eq!(f.sched.next_non_periodic(), Some(ids[1]));

        // 游标在尾部时回绕到队首
        f.sched.qh_remove(ids[2]);
        assert_eq!(f.sched.non_periodic_cursor(), Some(ids[1]));
        f.sched.qh_remove(ids[1]);
        assert_eq!(f.sched.non_periodic_cursor(), None);
    }

    #[test]
    fn test_activate_twice_is_busy() {
        let mut f = Fixture::new(CoreParams::default());
        let id = f.submit(&bulk_urb(2, 0x02)).unwrap();
        f.sched.activate_non_periodic(id, 0).unwrap();
        assert_eq!(
            f.sched.activate_non_periodic(id, 1),
            Err(HcdError::Busy("non-periodic inactive"))
        );
        assert_eq!(f.sched.qh(id).and_then(|qh| qh.channel()), Some(0));
        assert_eq!(f.sched.counters().non_periodic_channels, 1);
        assert_eq!(
            f.sched.activate_non_periodic(QhId(42), 1),
            Err(HcdError::NotFound)
        );
    }

    #[test]
    fn test_deactivate_non_periodic() {
        let mut f = Fixture::new(CoreParams::default());
        let urb = bulk_urb(2, 0x02);
        let id = f.submit(&urb).unwrap();
        f.submit(&urb).unwrap();
        f.sched.activate_non_periodic(id, 0).unwrap();

        f.sched.qtd_complete(id).unwrap();
        f.sched.release_channel(id);
        f.sched.qh_deactivate(id, false, 0);
        assert_eq!(f.bucket_of(id), Some(Bucket::NonPeriodicInactive));
        assert_eq!(f.sched.counters().non_periodic_channels, 0);

        f.sched.activate_non_periodic(id, 1).unwrap();
        f.sched.qtd_complete(id).unwrap();
        f.sched.release_channel(id);
        f.sched.qh_deactivate(id, false, 0);
        assert_eq!(f.bucket_of(id), None);
        assert!(f.sched.bucket(Bucket::NonPeriodicActive).is_empty());
    }

    #[test]
    fn test_start_of_frame_keeps_order() {
        let mut f = Fixture::new(CoreParams::default());
        let a = f.submit(&int_urb(2)).unwrap();
        let b = f.submit(&int_urb(3)).unwrap();
        assert_eq!(f.sched.start_of_frame(99), 0);
        assert_eq!(f.sched.start_of_frame(100), 2);
        assert_eq!(f.sched.bucket(Bucket::PeriodicReady), [a, b]);

        f.sched.queue_periodic(a, 0).unwrap();
        assert_eq!(f.bucket_of(a), Some(Bucket::PeriodicQueued));
        assert_eq!(f.sched.qh(a).and_then(|qh| qh.channel()), Some(0));
        // 不在 ready 中的 QH 不能入队
        assert_eq!(
            f.sched.queue_periodic(a, 1),
            Err(HcdError::Busy("periodic ready"))
        );
        assert_eq!(f.sched.queue_periodic(QhId(99), 1), Err(HcdError::NotFound));
    }

    #[test]
    fn test_urb_dequeue_pending() {
        let mut f = Fixture::new(CoreParams::default());
        let urb1 = bulk_urb(2, 0x02);
        let urb2 = bulk_urb(2, 0x02);
        let id = f.submit(&urb1).unwrap();
        f.submit(&urb2).unwrap();

        let qtd = f.sched.urb_dequeue(&urb2, 0).unwrap();
        assert!(Arc::ptr_eq(qtd.urb(), &urb2));
        assert_eq!(urb2.qtd(), None);
        assert_eq!(f.bucket_of(id), Some(Bucket::NonPeriodicInactive));

        f.sched.urb_dequeue(&urb1, 0).unwrap();
        assert_eq!(f.bucket_of(id), None);
        assert_eq!(f.sched.urb_dequeue(&urb1, 0).unwrap_err(), HcdError::NotFound);
    }

    #[test]
    fn test_urb_dequeue_in_process() {
        let mut f = Fixture::new(CoreParams::default());
        let urb = int_urb(2);
        let id = f.submit(&urb).unwrap();
        f.sched.start_of_frame(100);
        f.sched.queue_periodic(id, 3).unwrap();

        f.sched.urb_dequeue(&urb, 100).unwrap();
        assert_eq!(f.sched.qh(id).and_then(|qh| qh.channel()), None);
        assert_eq!(f.bucket_of(id), None);
        assert_eq!(f.sched.counters(), ScheduleCounters::default());
    }

    #[test]
    fn test_qh_free_returns_orphans() {
        let mut f = Fixture::new(CoreParams::default());
        let urb = bulk_urb(2, 0x02);
        let id = f.submit(&urb).unwrap();
        f.sched.activate_non_periodic(id, 0).unwrap();
        f.sched.qh_align_buf(id).unwrap();

        let orphans = f.sched.endpoint_disable(&urb.endpoint_key()).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(urb.qtd(), None);
        assert_eq!(f.sched.qh_count(), 0);
        assert_eq!(f.sched.counters(), ScheduleCounters::default());
        assert_eq!(f.sched.qh_free(id).unwrap_err(), HcdError::NotFound);
    }
}
