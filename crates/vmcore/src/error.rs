//! hvmm 状态码
//!
//! 定义跨上下文同步核心使用的状态码，可通过 [`VmErr::to_rc()`]
//! 转换为数值状态码（负数）。
//!
//! busy/would-block 属于**控制流状态**而非故障：受限上下文下的竞争
//! 通过原样返回调用方提供的 rcBusy 交由外层分发循环处理，原语内部
//! 从不替调用方重试。

/// hvmm 状态码
///
/// 各变体对应固定的数值状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmErr {
    // 控制流状态
    /// 非阻塞尝试遇到竞争，稍后重试即可 (-102)
    SemBusy,
    /// 约定俗成的 rcBusy：回到 ring-3 重新发起同一操作 (-103)
    Ring3Retry,

    // 所有权/状态违规（编程错误，诊断后返回错误码，绝不静默吞掉）
    /// 调用者不是锁或任务的拥有者 (-110)
    NotOwner,
    /// 对象处于错误状态：已删除、未初始化或 exit-event 槽已被占用 (-111)
    WrongState,
    /// 写者在隐式读递归未退完时试图释放写锁 (-112)
    WrongOrder,
    /// 当前执行上下文不允许该操作 (-113)
    InvalidContext,
    /// 递归深度超过上限，疑似失控递归 (-114)
    TooManyRecursions,
    /// 严格构建下检测到锁获取顺序违规 (-115)
    LockOrder,

    // 资源
    /// 任务句柄不存在或已被销毁 (-120)
    NotFound,
    /// 底层资源创建失败（如 worker 线程），对象保持可安全重试的状态 (-121)
    NoResources,
}

impl VmErr {
    /// 转换为数值状态码（负数）
    pub fn to_rc(&self) -> i32 {
        match self {
            VmErr::SemBusy => -102,
            VmErr::Ring3Retry => -103,
            VmErr::NotOwner => -110,
            VmErr::WrongState => -111,
            VmErr::WrongOrder => -112,
            VmErr::InvalidContext => -113,
            VmErr::TooManyRecursions => -114,
            VmErr::LockOrder => -115,
            VmErr::NotFound => -120,
            VmErr::NoResources => -121,
        }
    }
}
