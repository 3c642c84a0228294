//! 排他临界区
//!
//! 可递归的互斥锁，跨三种执行上下文呈现同一 API：
//!
//! - 递归与无竞争获取走纯原子快路径，所有上下文共用；
//! - 竞争时 Ring3 在条件变量上阻塞，受限上下文（Ring0/RawMode）
//!   **原样返回**调用方提供的 rcBusy，绝不挂起；
//! - ring-0 的等待者可经 [`CritSect::schedule_exit_event`] 安排在
//!   释放瞬间被事件唤醒，避免忙轮询。
//!
//! 句柄可克隆，多处共享同一逻辑锁。
//!
//! 状态机：`Initialized ⇄ {Unowned ⇄ Owned(depth≥1)} → Deleted`；
//! Delete 只在 Unowned 合法，double-delete 是返回成功的 no-op。

use core::panic::Location;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use vmcore::{CtxMode, CtxOps, Tid, VmErr, current_tid};
use vmlog::{vm_error, vm_warn};

use crate::event_sem::EventSem;
use crate::lockval::{ClassId, LOCKVAL_ENABLED, LockValidator};
use crate::ownership::OwnerRecord;

/// magic：可用
const MAGIC_ALIVE: u32 = 0x4353_0001;
/// magic：已删除
const MAGIC_DEAD: u32 = 0x4353_dead;

/// 临界区共享状态
pub(crate) struct SectCore {
    magic: AtomicU32,
    name: String,
    /// 回指拥有 VM 的诊断标签
    vm_name: String,
    /// Nop 锁：一切操作平凡成功，不记账
    nop: bool,
    ctx: Arc<dyn CtxOps>,
    validator: Arc<LockValidator>,
    class: ClassId,
    owner: OwnerRecord,
    /// 阻塞中或即将阻塞的等待者数
    waiters: AtomicU32,
    wait: Mutex<()>,
    cv: Condvar,
    /// ring-0 调度的 exit-event 槽
    exit_event: Mutex<Option<Arc<EventSem>>>,
}

impl SectCore {
    pub(crate) fn new(
        name: &str,
        vm_name: &str,
        nop: bool,
        ctx: Arc<dyn CtxOps>,
        validator: Arc<LockValidator>,
        class: ClassId,
    ) -> Self {
        SectCore {
            magic: AtomicU32::new(MAGIC_ALIVE),
            name: name.to_string(),
            vm_name: vm_name.to_string(),
            nop,
            ctx,
            validator,
            class,
            owner: OwnerRecord::new(),
            waiters: AtomicU32::new(0),
            wait: Mutex::new(()),
            cv: Condvar::new(),
            exit_event: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC_ALIVE
    }

    fn check_alive(&self) -> Result<(), VmErr> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(VmErr::WrongState)
        }
    }

    /// 归零释放后的公共收尾：signal exit-event、唤醒一个等待者
    ///
    /// 唤醒协议：拥有者字已先行清零，等待者持 wait 互斥量重查 CAS，
    /// 通知也在同一互斥量下发出，不会丢唤醒。
    fn on_final_release(&self) {
        if let Some(ev) = self.exit_event.lock().unwrap().take() {
            ev.signal();
        }
        if self.waiters.load(Ordering::Acquire) > 0 {
            let _g = self.wait.lock().unwrap();
            self.cv.notify_one();
        }
    }

    /// LeaveAll 路径：若为 tid 所持则强制清空并唤醒所有等待者
    pub(crate) fn force_leave(&self, tid: Tid) -> bool {
        if self.nop || !self.is_alive() || !self.owner.is_owned_by(tid) {
            return false;
        }
        if LOCKVAL_ENABLED {
            self.validator.on_release(self.class);
        }
        self.owner.clear();
        if let Some(ev) = self.exit_event.lock().unwrap().take() {
            ev.signal();
        }
        let _g = self.wait.lock().unwrap();
        self.cv.notify_all();
        true
    }
}

/// 排他临界区句柄
#[derive(Clone)]
pub struct CritSect {
    pub(crate) core: Arc<SectCore>,
}

impl CritSect {
    pub(crate) fn from_core(core: Arc<SectCore>) -> Self {
        CritSect { core }
    }

    /// 进入临界区
    ///
    /// 已是拥有者时递归加深并立即成功；无竞争时走原子快路径；
    /// 竞争时 Ring3 阻塞等待，受限上下文原样返回 `rc_busy`
    /// （调用方须将其理解为“回到 ring-3 重试”）。
    ///
    /// 严格/调试构建自动记录调用点并送锁序校验器，无需单独的
    /// debug 入口。
    #[track_caller]
    pub fn enter(&self, rc_busy: VmErr) -> Result<(), VmErr> {
        self.enter_at(rc_busy, Location::caller())
    }

    fn enter_at(&self, rc_busy: VmErr, pos: &'static Location<'static>) -> Result<(), VmErr> {
        let c = &*self.core;
        if c.nop {
            return Ok(());
        }
        c.check_alive()?;
        let tid = current_tid();
        if c.owner.is_owned_by(tid) {
            return c.owner.recurse();
        }
        if c.owner.try_acquire(tid) {
            self.booked(pos);
            return Ok(());
        }
        // 竞争：受限上下文不得挂起，把 rcBusy 交还外层分发循环
        if !c.ctx.current_ctx().can_block() {
            return Err(rc_busy);
        }
        c.waiters.fetch_add(1, Ordering::AcqRel);
        let mut guard = c.wait.lock().unwrap();
        loop {
            if !c.is_alive() {
                drop(guard);
                c.waiters.fetch_sub(1, Ordering::AcqRel);
                return Err(VmErr::WrongState);
            }
            if c.owner.try_acquire(tid) {
                break;
            }
            guard = c.cv.wait(guard).unwrap();
        }
        drop(guard);
        c.waiters.fetch_sub(1, Ordering::AcqRel);
        self.booked(pos);
        Ok(())
    }

    fn booked(&self, pos: &'static Location<'static>) {
        if LOCKVAL_ENABLED {
            let c = &*self.core;
            c.owner.record_pos(pos);
            c.validator.on_acquire(c.class, pos);
        }
    }

    /// 非阻塞尝试，任意上下文可用；竞争返回 [`VmErr::SemBusy`]
    #[track_caller]
    pub fn try_enter(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        if c.nop {
            return Ok(());
        }
        c.check_alive()?;
        let tid = current_tid();
        if c.owner.is_owned_by(tid) {
            return c.owner.recurse();
        }
        if c.owner.try_acquire(tid) {
            self.booked(Location::caller());
            return Ok(());
        }
        Err(VmErr::SemBusy)
    }

    /// 离开临界区
    ///
    /// 递归递减；归零时释放底层锁、signal 已调度的 exit-event 并
    /// 唤醒等待者。非拥有者调用是编程错误。
    pub fn leave(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        if c.nop {
            return Ok(());
        }
        c.check_alive()?;
        let tid = current_tid();
        if !c.owner.is_owned_by(tid) {
            vm_error!(
                "critsect: 非拥有者 leave '{}' (vm {}), tid={}, holder={:?}, depth={}",
                c.name,
                c.vm_name,
                tid.0,
                c.owner.holder(),
                c.owner.depth()
            );
            return Err(VmErr::NotOwner);
        }
        if c.owner.unwind() == 0 {
            if LOCKVAL_ENABLED {
                c.validator.on_release(c.class);
            }
            c.on_final_release();
        }
        Ok(())
    }

    /// 安排在下一次最终释放时 signal `ev`
    ///
    /// 仅限 ring-0 且为当前拥有者时可用；槽位已被占用时返回
    /// [`VmErr::WrongState`]。
    pub fn schedule_exit_event(&self, ev: Arc<EventSem>) -> Result<(), VmErr> {
        let c = &*self.core;
        if c.nop {
            return Err(VmErr::WrongState);
        }
        c.check_alive()?;
        if c.ctx.current_ctx() != CtxMode::Ring0 {
            return Err(VmErr::InvalidContext);
        }
        if !c.owner.is_owned_by(current_tid()) {
            return Err(VmErr::NotOwner);
        }
        let mut slot = c.exit_event.lock().unwrap();
        if slot.is_some() {
            return Err(VmErr::WrongState);
        }
        *slot = Some(ev);
        Ok(())
    }

    /// Ring3 专用的 RAII 进入方式，离开作用域自动 leave
    #[track_caller]
    pub fn lock(&self) -> Result<CritSectGuard<'_>, VmErr> {
        // Ring3 下 enter 不会返回 rcBusy，占位值不会外漏
        self.enter(VmErr::Ring3Retry)?;
        Ok(CritSectGuard { sect: self })
    }

    /// 调用线程是否为拥有者（Nop 锁恒 true）
    pub fn is_owner(&self) -> bool {
        self.core.nop || self.core.owner.is_owned_by(current_tid())
    }

    /// 指定线程是否为拥有者
    pub fn is_owner_by(&self, tid: Tid) -> bool {
        self.core.nop || self.core.owner.is_owned_by(tid)
    }

    /// 是否有线程在阻塞等待
    pub fn has_waiters(&self) -> bool {
        self.core.waiters.load(Ordering::Acquire) > 0
    }

    /// 当前递归深度（0 = 无主）
    pub fn recursion(&self) -> u32 {
        self.core.owner.depth()
    }

    /// 是否处于可用状态
    pub fn is_initialized(&self) -> bool {
        self.core.nop || self.core.is_alive()
    }

    /// 锁名（诊断用）
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// 最近一次进入的调用点（严格/调试构建下可用）
    pub fn last_enter_pos(&self) -> Option<&'static Location<'static>> {
        self.core.owner.last_pos()
    }

    /// 销毁临界区
    ///
    /// 被持有时返回 [`VmErr::SemBusy`]；重复删除是返回成功的 no-op；
    /// 删除后除 delete 外的一切操作失败。
    pub fn delete(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        if c.nop || !c.is_alive() {
            return Ok(());
        }
        if c.owner.holder().is_some() {
            vm_warn!("critsect: delete 被持有的 '{}' (vm {})", c.name, c.vm_name);
            return Err(VmErr::SemBusy);
        }
        c.magic.store(MAGIC_DEAD, Ordering::Release);
        // 唤醒所有阻塞中的等待者，让它们观察到删除
        let _g = c.wait.lock().unwrap();
        c.cv.notify_all();
        Ok(())
    }
}

/// [`CritSect::lock`] 返回的 RAII 保护器
pub struct CritSectGuard<'a> {
    sect: &'a CritSect,
}

impl Drop for CritSectGuard<'_> {
    fn drop(&mut self) {
        let _ = self.sect.leave();
    }
}
