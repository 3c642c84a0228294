//! 临界区登记表
//!
//! VM 作用域的状态载体：已创建的排他临界区的弱引用表、本 VM 的锁序
//! 校验器、执行上下文提供者。锁只能在 ring-3 创建（受限上下文只
//! 使用预先创建好的锁），LeaveAll 仅在异常/复位路径使用。

use std::sync::{Arc, RwLock, Weak};

use vmcore::{CtxOps, VmErr, current_tid};
use vmlog::vm_warn;

use crate::critsect::{CritSect, SectCore};
use crate::critsect_rw::RwCritSect;
use crate::lockval::{LockValidator, Violation};

struct RegInner {
    vm_name: String,
    ctx: Arc<dyn CtxOps>,
    /// 已创建的排他临界区（LeaveAll 的作用对象）
    sections: RwLock<Vec<Weak<SectCore>>>,
    validator: Arc<LockValidator>,
}

/// 临界区登记表（可克隆句柄）
#[derive(Clone)]
pub struct CritSectRegistry {
    inner: Arc<RegInner>,
}

impl CritSectRegistry {
    /// 为一个 VM 建立登记表
    pub fn new(vm_name: &str, ctx: Arc<dyn CtxOps>) -> Self {
        CritSectRegistry {
            inner: Arc::new(RegInner {
                vm_name: vm_name.to_string(),
                ctx,
                sections: RwLock::new(Vec::new()),
                validator: Arc::new(LockValidator::new()),
            }),
        }
    }

    fn check_ring3(&self) -> Result<(), VmErr> {
        if self.inner.ctx.current_ctx().can_block() {
            Ok(())
        } else {
            Err(VmErr::InvalidContext)
        }
    }

    /// 创建排他临界区（仅 ring-3）
    pub fn create(&self, name: &str) -> Result<CritSect, VmErr> {
        self.check_ring3()?;
        let inner = &*self.inner;
        let class = inner.validator.class_for(name);
        let core = Arc::new(SectCore::new(
            name,
            &inner.vm_name,
            false,
            inner.ctx.clone(),
            inner.validator.clone(),
            class,
        ));
        inner.sections.write().unwrap().push(Arc::downgrade(&core));
        Ok(CritSect::from_core(core))
    }

    /// 创建读写临界区（仅 ring-3；不参与 LeaveAll）
    pub fn create_rw(&self, name: &str) -> Result<RwCritSect, VmErr> {
        self.check_ring3()?;
        let inner = &*self.inner;
        let class = inner.validator.class_for(name);
        Ok(RwCritSect::new(
            name,
            &inner.vm_name,
            inner.ctx.clone(),
            inner.validator.clone(),
            class,
        ))
    }

    /// 创建 Nop 临界区：一切操作平凡成功，用作缺省占位，
    /// 免去调用点的空检查
    pub fn create_nop(&self) -> CritSect {
        let inner = &*self.inner;
        let class = inner.validator.class_for("<nop>");
        // Nop 节不登记：LeaveAll 与校验器都不关心它
        CritSect::from_core(Arc::new(SectCore::new(
            "<nop>",
            &inner.vm_name,
            true,
            inner.ctx.clone(),
            inner.validator.clone(),
            class,
        )))
    }

    /// 强制释放当前线程持有的所有排他临界区
    ///
    /// 仅异常/复位路径使用，稳态设备代码不得调用。返回释放的节数。
    pub fn leave_all(&self) -> usize {
        let tid = current_tid();
        let inner = &*self.inner;
        let alive: Vec<Arc<SectCore>> = inner
            .sections
            .read()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let mut count = 0;
        for core in alive {
            if core.force_leave(tid) {
                vm_warn!(
                    "critsect: leave_all 强制释放 '{}' (vm {}, tid={})",
                    core.name(),
                    inner.vm_name,
                    tid.0
                );
                count += 1;
            }
        }
        // 顺带清掉已失效的弱引用
        inner
            .sections
            .write()
            .unwrap()
            .retain(|w| w.strong_count() > 0);
        count
    }

    /// 本 VM 已记录的锁序违规
    pub fn lock_violations(&self) -> Vec<Violation> {
        self.inner.validator.violations()
    }
}
