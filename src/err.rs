use alloc::collections::TryReserveError;

pub type Result<T = ()> = core::result::Result<T, HcdError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HcdError {
    #[error("Admission denied: {0}")]
    AdmissionDenied(#[from] AdmissionDenied),
    #[error("No memory available")]
    NoMemory,
    #[error("Not found")]
    NotFound,
    /// QH 存在，但不在该操作要求的队列中
    #[error("QH is busy: expected in {0}")]
    Busy(&'static str),
    #[error("Invalid core parameter: {0}")]
    InvalidParam(&'static str),
}

impl HcdError {
    /// 对应 -ENOSPC，调用方可以稍后重试
    pub fn is_admission_denied(&self) -> bool {
        matches!(self, HcdError::AdmissionDenied(_))
    }
}

impl From<TryReserveError> for HcdError {
    fn from(_value: TryReserveError) -> Self {
        HcdError::NoMemory
    }
}

/// 周期调度准入失败的原因
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenied {
    #[error(
        "no host channel for periodic transfer (total {total}, periodic {periodic}, non-periodic {non_periodic})"
    )]
    NoChannel {
        total: u32,
        periodic: u32,
        non_periodic: u32,
    },
    #[error("insufficient periodic bandwidth (claimed {claimed} usecs, required {required} usecs)")]
    InsufficientBandwidth { claimed: u32, required: u32 },
    #[error("periodic transfer of {size} bytes exceeds channel max transfer size {max}")]
    TransferTooLarge { size: u32, max: u32 },
}
