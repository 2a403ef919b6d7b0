//! 周期传输准入与总线带宽记账

use log::warn;
use usb_if::descriptor::EndpointType;

use super::{params::CoreParams, qh::QueueHead, sched::ScheduleCounters};
use crate::err::AdmissionDenied;

/// 导出给 USB core 的总线带宽统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusBandwidth {
    /// 按周期摊薄后的已分配带宽，usecs / interval 之和
    pub allocated: u32,
    pub int_reqs: u32,
    pub isoc_reqs: u32,
}

impl BusBandwidth {
    fn share(qh: &QueueHead) -> u32 {
        qh.usecs() / qh.interval().max(1)
    }

    pub(crate) fn claim(&mut self, qh: &QueueHead) {
        self.allocated += Self::share(qh);
        match qh.ep_type() {
            EndpointType::Interrupt => self.int_reqs += 1,
            EndpointType::Isochronous => self.isoc_reqs += 1,
            _ => {}
        }
    }

    pub(crate) fn release(&mut self, qh: &QueueHead) {
        self.allocated = self.allocated.saturating_sub(Self::share(qh));
        match qh.ep_type() {
            EndpointType::Interrupt => self.int_reqs = self.int_reqs.saturating_sub(1),
            EndpointType::Isochronous => self.isoc_reqs = self.isoc_reqs.saturating_sub(1),
            _ => {}
        }
    }
}

/// 至少留一个通道给非周期传输
pub fn periodic_channel_available(
    params: &CoreParams,
    counters: &ScheduleCounters,
) -> Result<(), AdmissionDenied> {
    let total = params.host_channels;
    let in_use = counters.periodic_channels + counters.non_periodic_channels;
    if in_use < total && counters.periodic_channels + 1 < total {
        Ok(())
    } else {
        Err(AdmissionDenied::NoChannel {
            total,
            periodic: counters.periodic_channels,
            non_periodic: counters.non_periodic_channels,
        })
    }
}

pub fn check_periodic_bandwidth(
    params: &CoreParams,
    counters: &ScheduleCounters,
    qh: &QueueHead,
) -> Result<(), AdmissionDenied> {
    let max_claimed = params.speed.periodic_budget_usecs() as i64 - qh.usecs() as i64;
    if counters.periodic_usecs as i64 > max_claimed {
        return Err(AdmissionDenied::InsufficientBandwidth {
            claimed: counters.periodic_usecs,
            required: qh.usecs(),
        });
    }
    Ok(())
}

pub fn check_max_xfer_size(params: &CoreParams, qh: &QueueHead) -> Result<(), AdmissionDenied> {
    let size = qh.max_xfer_size();
    if size > params.max_transfer_size {
        return Err(AdmissionDenied::TransferTooLarge {
            size,
            max: params.max_transfer_size,
        });
    }
    Ok(())
}

/// 依次检查通道、带宽与传输长度，返回第一个失败原因
pub fn check_admission(
    params: &CoreParams,
    counters: &ScheduleCounters,
    qh: &QueueHead,
) -> Result<(), AdmissionDenied> {
    periodic_channel_available(params, counters)
        .and_then(|_| check_periodic_bandwidth(params, counters, qh))
        .and_then(|_| check_max_xfer_size(params, qh))
        .inspect_err(|e| warn!("QH {:?}: {}", qh.id(), e))
}
