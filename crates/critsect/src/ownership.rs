//! 所有权记录
//!
//! 各锁类型共用的叶子数据结构：记录拥有者线程、递归深度，以及
//! 严格/调试构建下最近一次进入的调用点。
//!
//! 不变量：recursion > 0 蕴含 tid 非零；recursion 只由拥有者线程
//! 自身修改，tid 的获取/清除对其它上下文的并发快路径原子可见。

use core::panic::Location;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use vmcore::{Tid, VmErr};

/// 递归深度上限
///
/// 公开合同不设硬上限，这里用 32 位计数器的一个保守界来把失控
/// 递归当作 bug 捕获。
pub(crate) const MAX_RECURSION: u32 = 0x0010_0000;

/// 拥有者记录
pub(crate) struct OwnerRecord {
    /// 拥有者线程 id，0 = 无主
    tid: AtomicU64,
    /// 递归深度，0 = 无主
    recursion: AtomicU32,
    /// 最近一次进入的调用点（仅严格/调试构建写入）
    last_pos: AtomicPtr<Location<'static>>,
}

impl OwnerRecord {
    pub(crate) const fn new() -> Self {
        OwnerRecord {
            tid: AtomicU64::new(0),
            recursion: AtomicU32::new(0),
            last_pos: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// 当前拥有者
    pub(crate) fn holder(&self) -> Option<Tid> {
        match self.tid.load(Ordering::Acquire) {
            0 => None,
            v => Some(Tid(v)),
        }
    }

    pub(crate) fn is_owned_by(&self, tid: Tid) -> bool {
        self.tid.load(Ordering::Acquire) == tid.0
    }

    /// 纯原子快路径，所有执行上下文共用
    pub(crate) fn try_acquire(&self, tid: Tid) -> bool {
        if self
            .tid
            .compare_exchange(0, tid.0, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.recursion.store(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// 直接登记拥有者（调用者已通过其它状态字赢得所有权）
    pub(crate) fn acquire_direct(&self, tid: Tid) {
        self.tid.store(tid.0, Ordering::Release);
        self.recursion.store(1, Ordering::Relaxed);
    }

    /// 拥有者线程递归加深
    pub(crate) fn recurse(&self) -> Result<(), VmErr> {
        let depth = self.recursion.load(Ordering::Relaxed);
        if depth >= MAX_RECURSION {
            return Err(VmErr::TooManyRecursions);
        }
        self.recursion.store(depth + 1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn depth(&self) -> u32 {
        self.recursion.load(Ordering::Relaxed)
    }

    /// 拥有者线程退出一层，归零时清除拥有者；返回剩余深度
    pub(crate) fn unwind(&self) -> u32 {
        let depth = self.recursion.load(Ordering::Relaxed) - 1;
        self.recursion.store(depth, Ordering::Relaxed);
        if depth == 0 {
            self.tid.store(0, Ordering::Release);
        }
        depth
    }

    /// 强制清空（仅 LeaveAll / 复位路径）
    pub(crate) fn clear(&self) {
        self.recursion.store(0, Ordering::Relaxed);
        self.tid.store(0, Ordering::Release);
    }

    pub(crate) fn record_pos(&self, pos: &'static Location<'static>) {
        self.last_pos
            .store(pos as *const Location<'static> as *mut _, Ordering::Relaxed);
    }

    pub(crate) fn last_pos(&self) -> Option<&'static Location<'static>> {
        let p = self.last_pos.load(Ordering::Relaxed);
        if p.is_null() {
            None
        } else {
            // SAFETY: 只有 &'static Location 会被存入 last_pos
            Some(unsafe { &*p })
        }
    }
}
