//! 执行上下文与线程标识
//!
//! 跨上下文多态不经由虚分发的条件编译实现，而是按“能力标签”建模：
//! 锁对象持有一个 [`CtxOps`] 提供者，入口操作据此判定当前上下文
//! 是否允许挂起；纯原子快路径由所有上下文共用，阻塞路径只在
//! `can_block()` 为真时走到。

use core::sync::atomic::{AtomicU64, Ordering};
use std::cell::Cell;
use std::sync::Arc;

use once_cell::sync::Lazy;

/// 执行上下文类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxMode {
    /// 宿主用户态：可阻塞
    Ring3,
    /// 宿主内核：不得挂起，竞争时立即返回 rcBusy
    Ring0,
    /// 客户机执行上下文：不得挂起、不得回调用户态
    RawMode,
}

impl CtxMode {
    /// 当前上下文是否允许挂起调用线程
    pub fn can_block(&self) -> bool {
        matches!(self, CtxMode::Ring3)
    }
}

/// 执行上下文提供者
///
/// 由 VM 作用域对象持有（而非进程全局），同一进程内多个 VM 实例
/// 互不干扰；测试可注入 Mock 实现按线程模拟受限上下文。
pub trait CtxOps: Send + Sync {
    /// 返回调用线程当前所处的执行上下文
    fn current_ctx(&self) -> CtxMode;
}

/// 默认上下文提供者
///
/// 宿主用户态构建中所有线程恒处于 Ring3；受限上下文构建由各自的
/// 提供者实现替换。
#[derive(Debug, Default)]
pub struct HostCtx;

impl CtxOps for HostCtx {
    fn current_ctx(&self) -> CtxMode {
        CtxMode::Ring3
    }
}

/// 进程级共享的默认提供者实例
static HOST_CTX: Lazy<Arc<HostCtx>> = Lazy::new(|| Arc::new(HostCtx));

/// 获取默认的 Ring3 上下文提供者
pub fn host_ctx() -> Arc<dyn CtxOps> {
    HOST_CTX.clone()
}

/// 线程标识（进程内稳定、非零）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub u64);

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: Cell<u64> = const { Cell::new(0) };
}

/// 返回当前线程的稳定标识
///
/// `std::thread::ThreadId` 没有稳定的整数形式，这里用原子计数器
/// 配合 thread_local 惰性分配；0 保留为“无主”。
pub fn current_tid() -> Tid {
    TID.with(|c| {
        let mut v = c.get();
        if v == 0 {
            v = NEXT_TID.fetch_add(1, Ordering::Relaxed);
            c.set(v);
        }
        Tid(v)
    })
}
