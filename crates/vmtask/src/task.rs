//! 任务条目
//!
//! 生命周期：Created → {Idle ⇄ Pending → Executing → Idle} → Destroyed。
//! `pending` 是合并位：触发把它置起，worker 在执行锁下把它清掉再跑
//! 回调；`dead` 与执行锁一起保证销毁后回调不再运行。

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;

use crate::owner::{TaskFlags, TaskOwner};

/// 任务句柄，在所属 [`TaskSet`] 内唯一
///
/// [`TaskSet`]: crate::TaskSet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(pub u32);

pub(crate) struct Task {
    pub(crate) id: TaskHandle,
    pub(crate) name: String,
    pub(crate) owner: TaskOwner,
    pub(crate) flags: TaskFlags,
    /// 合并位：已挂起时再触发是 no-op
    pub(crate) pending: AtomicBool,
    /// 置位后 worker 不再执行该任务
    pub(crate) dead: AtomicBool,
    /// 销毁与在途回调的同步点；worker 执行回调全程持有
    pub(crate) exec_lock: Mutex<()>,
    pub(crate) callback: Box<dyn Fn() + Send + Sync>,
}

impl Task {
    pub(crate) fn new(
        id: TaskHandle,
        name: &str,
        owner: TaskOwner,
        flags: TaskFlags,
        callback: Box<dyn Fn() + Send + Sync>,
    ) -> Self {
        Task {
            id,
            name: name.to_string(),
            owner,
            flags,
            pending: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            exec_lock: Mutex::new(()),
            callback,
        }
    }
}
