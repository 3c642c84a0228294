//! 任务拥有者与触发能力声明

use bitflags::bitflags;

bitflags! {
    /// 任务声明的受限触发上下文；ring-3 触发恒许可
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// 允许从宿主 ring-0 触发
        const RING0 = 1 << 0;
        /// 允许从裸机执行模式触发
        const RAW_MODE = 1 << 1;
    }
}

/// 任务拥有者：携带调用方自己的实例标识
///
/// 拥有者既是权限边界（触发/销毁都要求拥有者匹配），也决定任务
/// 落在哪个专属 worker 上。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOwner {
    /// 模拟设备实例
    Device(u64),
    /// 宿主驱动实例
    Driver(u64),
    /// USB 设备实例
    Usb(u64),
    /// VM 内部用途
    Internal(u64),
}

/// 拥有者类别，每个类别一个专属 worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    /// 模拟设备
    Device,
    /// 宿主驱动
    Driver,
    /// USB 设备
    Usb,
    /// VM 内部
    Internal,
}

impl OwnerKind {
    /// 类别总数
    pub const COUNT: usize = 4;

    /// 类别在 worker 表里的下标
    pub fn index(self) -> usize {
        match self {
            OwnerKind::Device => 0,
            OwnerKind::Driver => 1,
            OwnerKind::Usb => 2,
            OwnerKind::Internal => 3,
        }
    }

    /// 类别名（worker 线程名与诊断用）
    pub fn name(self) -> &'static str {
        match self {
            OwnerKind::Device => "device",
            OwnerKind::Driver => "driver",
            OwnerKind::Usb => "usb",
            OwnerKind::Internal => "internal",
        }
    }
}

impl TaskOwner {
    /// 所属类别
    pub fn kind(&self) -> OwnerKind {
        match self {
            TaskOwner::Device(_) => OwnerKind::Device,
            TaskOwner::Driver(_) => OwnerKind::Driver,
            TaskOwner::Usb(_) => OwnerKind::Usb,
            TaskOwner::Internal(_) => OwnerKind::Internal,
        }
    }
}
