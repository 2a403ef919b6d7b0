//! DWC OTG 核心参数

use crate::err::{HcdError, Result};

/// 控制器工作速度（core_params->speed）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CoreSpeed {
    #[default]
    High,
    Full,
}

impl CoreSpeed {
    /// 每个(微)帧可分配给周期传输的预算
    ///
    /// 高速：80% x 125us = 100us；全速：90% x 1000us = 900us。
    pub fn periodic_budget_usecs(&self) -> u32 {
        match self {
            CoreSpeed::High => 100,
            CoreSpeed::Full => 900,
        }
    }
}

/// 调度提前量（帧），给执行引擎留出装载传输的时间
pub const SCHEDULE_SLOP: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreParams {
    /// 主机通道数量
    pub host_channels: u32,
    /// 单个通道一次传输的最大字节数
    pub max_transfer_size: u32,
    pub speed: CoreSpeed,
    /// 新建周期 QH 的首个调度帧相对当前帧的偏移
    pub schedule_slop: u16,
}

impl Default for CoreParams {
    fn default() -> Self {
        Self {
            host_channels: 8,
            max_transfer_size: 65535,
            speed: CoreSpeed::High,
            schedule_slop: SCHEDULE_SLOP,
        }
    }
}

impl CoreParams {
    pub fn with_host_channels(mut self, host_channels: u32) -> Self {
        self.host_channels = host_channels;
        self
    }

    pub fn with_max_transfer_size(mut self, max_transfer_size: u32) -> Self {
        self.max_transfer_size = max_transfer_size;
        self
    }

    pub fn with_speed(mut self, speed: CoreSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_schedule_slop(mut self, schedule_slop: u16) -> Self {
        self.schedule_slop = schedule_slop;
        self
    }

    /// 检查参数是否在 DWC 核心允许的范围内
    pub fn validate(&self) -> Result {
        if !(1..=16).contains(&self.host_channels) {
            return Err(HcdError::InvalidParam("host_channels must be 1..=16"));
        }
        if !(2047..=524288).contains(&self.max_transfer_size) {
            return Err(HcdError::InvalidParam(
                "max_transfer_size must be 2047..=524288",
            ));
        }
        if self.schedule_slop >= 1 << 13 {
            return Err(HcdError::InvalidParam(
                "schedule_slop must be less than half the frame wheel",
            ));
        }
        Ok(())
    }
}
