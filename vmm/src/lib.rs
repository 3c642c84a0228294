//! hvmm 跨上下文同步核心
//!
//! 宿主型 VMM 的同一套设备/驱动代码要在三种执行上下文下运行：
//! 宿主用户态（ring-3，可阻塞）、宿主内核（ring-0，不得挂起）与
//! 客户机执行上下文（裸机模式）。本 crate 把为此设计的同步设施
//! 装配成 VM 作用域的 [`Vm`] 对象：
//!
//! - 排他/读写临界区（[`CritSect`] / [`RwCritSect`]）：递归、跨上
//!   下文同一 API，受限上下文竞争时原样返回调用方的 rcBusy；
//! - 延迟任务（[`TaskOwner`] / [`TaskHandle`]）：受限上下文触发、
//!   ring-3 专属 worker 执行；
//! - 锁序校验（[`Violation`]）与异常路径的 [`Vm::leave_all`]。
//!
//! 同一进程可以承载多个互不干扰的 VM 实例：所有状态都挂在 `Vm`
//! 上，没有进程全局的锁表。
//!
//! ```
//! use hvmm::{Vm, VmErr};
//!
//! let vm = Vm::new("demo");
//! let lock = vm.critsect("demo/state")?;
//! lock.enter(VmErr::Ring3Retry)?;
//! // ... 受保护的状态操作 ...
//! lock.leave()?;
//! # Ok::<(), VmErr>(())
//! ```

use std::sync::Arc;

pub use critsect::{CritSect, CritSectGuard, EventSem, RwCritSect, Violation};
pub use vmcore::{CtxMode, CtxOps, HostCtx, Tid, VmErr, current_tid, host_ctx};
pub use vmtask::{OwnerKind, TaskFlags, TaskHandle, TaskOwner};

use critsect::CritSectRegistry;
use vmlog::vm_info;
use vmtask::TaskSet;

struct VmInner {
    name: String,
    sections: CritSectRegistry,
    /// 缺省占位锁，免去调用点的空检查
    nop: CritSect,
    /// 每个拥有者类别一个任务集合；VmInner 析构时各自关停 worker
    task_sets: [TaskSet; OwnerKind::COUNT],
}

/// 一个 VM 实例的同步设施（可克隆句柄）
#[derive(Clone)]
pub struct Vm {
    inner: Arc<VmInner>,
}

impl Vm {
    /// 以默认的宿主用户态上下文建 VM
    pub fn new(name: &str) -> Self {
        Self::with_ctx(name, host_ctx())
    }

    /// 以指定的上下文提供者建 VM（受限上下文构建与测试用）
    pub fn with_ctx(name: &str, ctx: Arc<dyn CtxOps>) -> Self {
        let sections = CritSectRegistry::new(name, ctx.clone());
        let nop = sections.create_nop();
        let task_sets = [
            OwnerKind::Device,
            OwnerKind::Driver,
            OwnerKind::Usb,
            OwnerKind::Internal,
        ]
        .map(|kind| TaskSet::new(name, kind, ctx.clone()));
        vm_info!("vmm: VM '{name}' 同步核心就绪");
        Vm {
            inner: Arc::new(VmInner {
                name: name.to_string(),
                sections,
                nop,
                task_sets,
            }),
        }
    }

    /// VM 名
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 创建排他临界区（仅 ring-3）
    pub fn critsect(&self, name: &str) -> Result<CritSect, VmErr> {
        self.inner.sections.create(name)
    }

    /// 创建读写临界区（仅 ring-3）
    pub fn rw_critsect(&self, name: &str) -> Result<RwCritSect, VmErr> {
        self.inner.sections.create_rw(name)
    }

    /// 缺省占位锁：一切操作平凡成功
    pub fn nop(&self) -> CritSect {
        self.inner.nop.clone()
    }

    /// 强制释放当前线程持有的所有排他临界区（仅异常/复位路径）
    pub fn leave_all(&self) -> usize {
        self.inner.sections.leave_all()
    }

    /// 本 VM 已记录的锁序违规
    pub fn lock_violations(&self) -> Vec<Violation> {
        self.inner.sections.lock_violations()
    }

    fn set_for(&self, owner: TaskOwner) -> &TaskSet {
        &self.inner.task_sets[owner.kind().index()]
    }

    /// 注册一个延迟任务（仅 ring-3）
    pub fn task_create(
        &self,
        flags: TaskFlags,
        name: &str,
        owner: TaskOwner,
        callback: Box<dyn Fn() + Send + Sync>,
    ) -> Result<TaskHandle, VmErr> {
        self.set_for(owner).create(flags, name, owner, callback)
    }

    /// 触发一次延迟执行（任何已声明的上下文，绝不阻塞）
    pub fn task_trigger(&self, owner: TaskOwner, handle: TaskHandle) -> Result<(), VmErr> {
        self.set_for(owner).trigger(owner, handle)
    }

    /// 销毁一个任务并等待在途回调结束（仅 ring-3）
    pub fn task_destroy(&self, owner: TaskOwner, handle: TaskHandle) -> Result<(), VmErr> {
        self.set_for(owner).destroy(owner, handle)
    }

    /// 销毁一个拥有者的全部任务（仅 ring-3），返回销毁的个数
    pub fn task_destroy_all(&self, owner: TaskOwner) -> Result<usize, VmErr> {
        self.set_for(owner).destroy_all_by_owner(owner)
    }
}
