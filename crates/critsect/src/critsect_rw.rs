//! 读写临界区
//!
//! 与排他临界区同一套所有权纪律，外加读者计数与“写者隐式持读”：
//! 持有写锁的线程再取读锁不计入全局读者数，而是累加私有的写者读
//! 递归计数，保证该线程的 `leave_shared` 正确退绕、不动别的线程
//! 依赖的读者名额。
//!
//! 状态打包在一个 64 位原子字里（读者数 | 等待写者数 | 写者持有位），
//! 获取/释放都是对该字的 CAS，受限上下文的快路径与 ring-3 的阻塞
//! 路径共用同一纯函数判定。
//!
//! # 防写者饥饿策略
//!
//! 有界读者准入、界取 0：只要有写者登记等待，新的共享进入一律
//! 等待（Ring3）或 busy 失败（受限上下文），直到不再有写者等待。
//! 写者递归与写者隐式读不受此限制。推论：除写者外共享进入不可
//! 按线程递归 —— 写者等待期间读者重入会自锁，属调用方契约。

use core::panic::Location;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use vmcore::{CtxOps, VmErr, current_tid};
use vmlog::{vm_error, vm_warn};

use crate::lockval::{ClassId, LOCKVAL_ENABLED, LockValidator};
use crate::ownership::{MAX_RECURSION, OwnerRecord};

/// magic：可用
const MAGIC_ALIVE: u32 = 0x5257_0001;
/// magic：已删除
const MAGIC_DEAD: u32 = 0x5257_dead;

// 状态字布局
/// 读者数（bit 0..16）
const RD_MASK: u64 = 0xffff;
/// 读者数上限（留余量防回绕）
const RD_MAX: u64 = 0xfff0;
/// 等待写者数（bit 16..32）
const WW_ONE: u64 = 1 << 16;
const WW_MASK: u64 = 0xffff << 16;
/// 写者持有位（bit 32）
const WR_BIT: u64 = 1 << 32;

struct RwCore {
    magic: AtomicU32,
    name: String,
    vm_name: String,
    ctx: Arc<dyn CtxOps>,
    validator: Arc<LockValidator>,
    class: ClassId,
    /// 打包状态字：读者数 | 等待写者数 | 写者持有位
    state: AtomicU64,
    /// 写者身份与写递归；只有赢得 WR_BIT 的线程写入
    writer: OwnerRecord,
    /// 写者隐式读递归（只有写者线程修改）
    writer_reads: AtomicU32,
    /// 最近一次共享进入的调用点（仅严格/调试构建写入）
    last_shared_pos: AtomicPtr<Location<'static>>,
    wait: Mutex<()>,
    cv_readers: Condvar,
    cv_writers: Condvar,
}

impl RwCore {
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

    /// 共享进入的纯原子快路径：无写者、无等待写者时读者数 +1
    fn try_shared_fast(&self) -> bool {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & (WR_BIT | WW_MASK) != 0 || (s & RD_MASK) >= RD_MAX {
                return false;
            }
            match self
                .state
                .compare_exchange_weak(s, s + 1, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(cur) => s = cur,
            }
        }
    }

    fn record_shared_pos(&self, pos: &'static Location<'static>) {
        if LOCKVAL_ENABLED {
            self.last_shared_pos
                .store(pos as *const Location<'static> as *mut _, Ordering::Relaxed);
        }
    }

    /// 排他进入的纯原子快路径：无读者、无写者时置 WR_BIT
    ///
    /// `dec_waiting` 为真时在同一 CAS 里注销自己的等待登记。
    fn try_excl_fast(&self, dec_waiting: bool) -> bool {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & (RD_MASK | WR_BIT) != 0 {
                return false;
            }
            let mut next = s | WR_BIT;
            if dec_waiting {
                next -= WW_ONE;
            }
            match self
                .state
                .compare_exchange_weak(s, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(cur) => s = cur,
            }
        }
    }
}

/// 读写临界区句柄
#[derive(Clone)]
pub struct RwCritSect {
    core: Arc<RwCore>,
}

impl RwCritSect {
    pub(crate) fn new(
        name: &str,
        vm_name: &str,
        ctx: Arc<dyn CtxOps>,
        validator: Arc<LockValidator>,
        class: ClassId,
    ) -> Self {
        RwCritSect {
            core: Arc::new(RwCore {
                magic: AtomicU32::new(MAGIC_ALIVE),
                name: name.to_string(),
                vm_name: vm_name.to_string(),
                ctx,
                validator,
                class,
                state: AtomicU64::new(0),
                writer: OwnerRecord::new(),
                writer_reads: AtomicU32::new(0),
                last_shared_pos: AtomicPtr::new(core::ptr::null_mut()),
                wait: Mutex::new(()),
                cv_readers: Condvar::new(),
                cv_writers: Condvar::new(),
            }),
        }
    }

    /// 共享（读）进入
    ///
    /// 写者本人走隐式读递归，不计入全局读者数；其余线程在无写者且
    /// 无等待写者时立即成功，否则 Ring3 等待、受限上下文原样返回
    /// `rc_busy`。
    #[track_caller]
    pub fn enter_shared(&self, rc_busy: VmErr) -> Result<(), VmErr> {
        let pos = Location::caller();
        let c = &*self.core;
        c.check_alive()?;
        let tid = current_tid();
        if c.writer.is_owned_by(tid) {
            let reads = c.writer_reads.load(Ordering::Relaxed);
            if reads >= MAX_RECURSION {
                return Err(VmErr::TooManyRecursions);
            }
            c.writer_reads.store(reads + 1, Ordering::Relaxed);
            return Ok(());
        }
        if c.try_shared_fast() {
            c.record_shared_pos(pos);
            return Ok(());
        }
        if !c.ctx.current_ctx().can_block() {
            return Err(rc_busy);
        }
        let mut guard = c.wait.lock().unwrap();
        loop {
            if !c.is_alive() {
                return Err(VmErr::WrongState);
            }
            if c.try_shared_fast() {
                drop(guard);
                c.record_shared_pos(pos);
                return Ok(());
            }
            guard = c.cv_readers.wait(guard).unwrap();
        }
    }

    /// 非阻塞共享尝试，任意上下文可用
    #[track_caller]
    pub fn try_enter_shared(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        c.check_alive()?;
        let tid = current_tid();
        if c.writer.is_owned_by(tid) {
            let reads = c.writer_reads.load(Ordering::Relaxed);
            if reads >= MAX_RECURSION {
                return Err(VmErr::TooManyRecursions);
            }
            c.writer_reads.store(reads + 1, Ordering::Relaxed);
            return Ok(());
        }
        if c.try_shared_fast() {
            c.record_shared_pos(Location::caller());
            Ok(())
        } else {
            Err(VmErr::SemBusy)
        }
    }

    /// 共享（读）离开
    pub fn leave_shared(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        c.check_alive()?;
        let tid = current_tid();
        if c.writer.is_owned_by(tid) {
            // 写者退绕隐式读递归
            let reads = c.writer_reads.load(Ordering::Relaxed);
            if reads == 0 {
                vm_error!(
                    "critsect-rw: 写者无隐式读却 leave_shared '{}' (vm {})",
                    c.name,
                    c.vm_name
                );
                return Err(VmErr::NotOwner);
            }
            c.writer_reads.store(reads - 1, Ordering::Relaxed);
            return Ok(());
        }
        let mut s = c.state.load(Ordering::Acquire);
        loop {
            if s & RD_MASK == 0 {
                vm_error!(
                    "critsect-rw: 无读者却 leave_shared '{}' (vm {}), tid={}",
                    c.name,
                    c.vm_name,
                    tid.0
                );
                return Err(VmErr::NotOwner);
            }
            match c
                .state
                .compare_exchange_weak(s, s - 1, Ordering::Release, Ordering::Acquire)
            {
                Ok(prev) => {
                    let now = prev - 1;
                    let _g = c.wait.lock().unwrap();
                    if now & RD_MASK == 0 && now & WW_MASK != 0 {
                        // 最后一个读者离开且有写者在等
                        c.cv_writers.notify_one();
                    } else if prev & RD_MASK >= RD_MAX {
                        // 读者名额刚从上限回落
                        c.cv_readers.notify_all();
                    }
                    return Ok(());
                }
                Err(cur) => s = cur,
            }
        }
    }

    /// 排他（写）进入
    ///
    /// 当前写者递归加深；否则须等到没有任何读者且无写者。竞争时
    /// Ring3 登记为等待写者后阻塞（从此新读者不再放行，见模块文档
    /// 的防饥饿策略），受限上下文原样返回 `rc_busy`。
    #[track_caller]
    pub fn enter_excl(&self, rc_busy: VmErr) -> Result<(), VmErr> {
        let pos = Location::caller();
        let c = &*self.core;
        c.check_alive()?;
        let tid = current_tid();
        if c.writer.is_owned_by(tid) {
            return c.writer.recurse();
        }
        if c.try_excl_fast(false) {
            c.writer.acquire_direct(tid);
            self.booked(pos);
            return Ok(());
        }
        if !c.ctx.current_ctx().can_block() {
            return Err(rc_busy);
        }
        // 登记等待写者：从此新读者不再放行
        c.state.fetch_add(WW_ONE, Ordering::AcqRel);
        let mut guard = c.wait.lock().unwrap();
        loop {
            if !c.is_alive() {
                drop(guard);
                c.state.fetch_sub(WW_ONE, Ordering::AcqRel);
                return Err(VmErr::WrongState);
            }
            if c.try_excl_fast(true) {
                break;
            }
            guard = c.cv_writers.wait(guard).unwrap();
        }
        drop(guard);
        c.writer.acquire_direct(tid);
        self.booked(pos);
        Ok(())
    }

    /// 非阻塞排他尝试，任意上下文可用；当前写者递归成功
    #[track_caller]
    pub fn try_enter_excl(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        c.check_alive()?;
        let tid = current_tid();
        if c.writer.is_owned_by(tid) {
            return c.writer.recurse();
        }
        if c.try_excl_fast(false) {
            c.writer.acquire_direct(tid);
            self.booked(Location::caller());
            Ok(())
        } else {
            Err(VmErr::SemBusy)
        }
    }

    fn booked(&self, pos: &'static Location<'static>) {
        if LOCKVAL_ENABLED {
            let c = &*self.core;
            c.writer.record_pos(pos);
            c.validator.on_acquire(c.class, pos);
        }
    }

    /// 排他（写）离开
    ///
    /// 写递归递减；归零前要求隐式读递归已全部退绕，否则
    /// [`VmErr::WrongOrder`]。最终释放时按策略唤醒：有等待写者则
    /// 唤醒写者，否则放行读者。
    pub fn leave_excl(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        c.check_alive()?;
        let tid = current_tid();
        if !c.writer.is_owned_by(tid) {
            vm_error!(
                "critsect-rw: 非写者 leave_excl '{}' (vm {}), tid={}",
                c.name,
                c.vm_name,
                tid.0
            );
            return Err(VmErr::NotOwner);
        }
        if c.writer.depth() > 1 {
            c.writer.unwind();
            return Ok(());
        }
        if c.writer_reads.load(Ordering::Relaxed) != 0 {
            vm_error!(
                "critsect-rw: 隐式读未退绕就 leave_excl '{}' (vm {}), reads={}",
                c.name,
                c.vm_name,
                c.writer_reads.load(Ordering::Relaxed)
            );
            return Err(VmErr::WrongOrder);
        }
        if LOCKVAL_ENABLED {
            c.validator.on_release(c.class);
        }
        // 先清身份再清状态位：writer 字段只对自查有意义
        c.writer.clear();
        let prev = c.state.fetch_and(!WR_BIT, Ordering::AcqRel);
        let _g = c.wait.lock().unwrap();
        if prev & WW_MASK != 0 {
            c.cv_writers.notify_one();
        } else {
            c.cv_readers.notify_all();
        }
        Ok(())
    }

    /// 调用线程是否为写者
    pub fn is_write_owner(&self) -> bool {
        self.core.writer.is_owned_by(current_tid())
    }

    /// 调用线程是否持有读权
    ///
    /// 写者本人按隐式读递归如实回答；读者数为零时回答 false；
    /// 其余情形没有按线程的读者登记，只能回答 `wanna_hear`
    /// （与原系统非严格构建的行为一致）。
    pub fn is_read_owner(&self, wanna_hear: bool) -> bool {
        let c = &*self.core;
        if !c.is_alive() {
            return false;
        }
        if c.writer.is_owned_by(current_tid()) {
            return c.writer_reads.load(Ordering::Relaxed) > 0;
        }
        if c.state.load(Ordering::Acquire) & RD_MASK == 0 {
            return false;
        }
        wanna_hear
    }

    /// 写递归深度
    pub fn write_recursion(&self) -> u32 {
        self.core.writer.depth()
    }

    /// 写者隐式读递归深度
    pub fn writer_read_recursion(&self) -> u32 {
        self.core.writer_reads.load(Ordering::Relaxed)
    }

    /// 当前（外部可见的）读者数；写者隐式读不计入
    pub fn read_count(&self) -> u32 {
        (self.core.state.load(Ordering::Acquire) & RD_MASK) as u32
    }

    /// 是否处于可用状态
    pub fn is_initialized(&self) -> bool {
        self.core.is_alive()
    }

    /// 锁名（诊断用）
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// 最近一次排他进入的调用点（严格/调试构建下可用）
    pub fn last_excl_enter_pos(&self) -> Option<&'static Location<'static>> {
        self.core.writer.last_pos()
    }

    /// 最近一次共享进入的调用点（严格/调试构建下可用）
    pub fn last_shared_enter_pos(&self) -> Option<&'static Location<'static>> {
        let p = self.core.last_shared_pos.load(Ordering::Relaxed);
        if p.is_null() {
            None
        } else {
            // SAFETY: 只有 &'static Location 会被存入 last_shared_pos
            Some(unsafe { &*p })
        }
    }

    /// 销毁读写临界区；被持有（读或写）时 [`VmErr::SemBusy`]，
    /// 重复删除为 no-op
    pub fn delete(&self) -> Result<(), VmErr> {
        let c = &*self.core;
        if !c.is_alive() {
            return Ok(());
        }
        if c.state.load(Ordering::Acquire) & (RD_MASK | WR_BIT) != 0 {
            vm_warn!("critsect-rw: delete 被持有的 '{}' (vm {})", c.name, c.vm_name);
            return Err(VmErr::SemBusy);
        }
        c.magic.store(MAGIC_DEAD, Ordering::Release);
        let _g = c.wait.lock().unwrap();
        c.cv_readers.notify_all();
        c.cv_writers.notify_all();
        Ok(())
    }
}
