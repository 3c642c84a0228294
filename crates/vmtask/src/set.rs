//! 任务集合与专属 worker
//!
//! 每个集合配一条惰性创建的 worker 线程：首次注册任务时 spawn，
//! spawn 失败返回 [`VmErr::NoResources`] 且集合保持可重试。worker
//! 的主循环仿 kworker：扫描一轮挂起任务，没活就在条件变量上睡，
//! 等 [`TaskSet::trigger`] 唤醒。
//!
//! 唤醒协议：trigger 先置任务的 pending 位，再持唤醒互斥量置
//! signaled 并 notify；worker 扫空后持同一互斥量检查 signaled，
//! 两者之间不会丢触发。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use vmcore::{CtxMode, CtxOps, VmErr};
use vmlog::{vm_error, vm_warn};

use crate::owner::{OwnerKind, TaskFlags, TaskOwner};
use crate::task::{Task, TaskHandle};

struct WakeState {
    shutdown: bool,
    /// 扫描间隙到达的触发，worker 睡前消费
    signaled: bool,
}

struct SetInner {
    vm_name: String,
    kind: OwnerKind,
    ctx: Arc<dyn CtxOps>,
    tasks: RwLock<Vec<Arc<Task>>>,
    next_id: AtomicU32,
    wake: Mutex<WakeState>,
    cv: Condvar,
}

/// 一个拥有者类别的任务集合
pub struct TaskSet {
    inner: Arc<SetInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSet {
    /// 为一个 VM 的一个拥有者类别建任务集合
    pub fn new(vm_name: &str, kind: OwnerKind, ctx: Arc<dyn CtxOps>) -> Self {
        TaskSet {
            inner: Arc::new(SetInner {
                vm_name: vm_name.to_string(),
                kind,
                ctx,
                tasks: RwLock::new(Vec::new()),
                next_id: AtomicU32::new(1),
                wake: Mutex::new(WakeState {
                    shutdown: false,
                    signaled: false,
                }),
                cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    fn check_ring3(&self) -> Result<(), VmErr> {
        if self.inner.ctx.current_ctx().can_block() {
            Ok(())
        } else {
            Err(VmErr::InvalidContext)
        }
    }

    /// 首次注册时把 worker 拉起来；失败保持未创建，下次重试
    fn ensure_worker(&self) -> Result<(), VmErr> {
        let mut slot = self.worker.lock().unwrap();
        if slot.is_some() {
            return Ok(());
        }
        let inner = self.inner.clone();
        let name = format!("vmtask-{}/{}", inner.vm_name, inner.kind.name());
        match std::thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(inner))
        {
            Ok(h) => {
                *slot = Some(h);
                Ok(())
            }
            Err(e) => {
                vm_warn!(
                    "vmtask: worker spawn 失败 (vm {}, kind {}): {e}",
                    self.inner.vm_name,
                    self.inner.kind.name()
                );
                Err(VmErr::NoResources)
            }
        }
    }

    /// 注册一个延迟任务（仅 ring-3），返回集合内唯一的句柄
    pub fn create(
        &self,
        flags: TaskFlags,
        name: &str,
        owner: TaskOwner,
        callback: Box<dyn Fn() + Send + Sync>,
    ) -> Result<TaskHandle, VmErr> {
        self.check_ring3()?;
        self.ensure_worker()?;
        let id = TaskHandle(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Arc::new(Task::new(id, name, owner, flags, callback));
        self.inner.tasks.write().unwrap().push(task);
        Ok(id)
    }

    /// 触发一次延迟执行
    ///
    /// 任何已声明的上下文都可调用，绝不阻塞、不触碰任何临界区。
    /// 任务已挂起时是无害 no-op：一次执行清掉此前累计的所有触发。
    pub fn trigger(&self, owner: TaskOwner, handle: TaskHandle) -> Result<(), VmErr> {
        let inner = &*self.inner;
        let task = inner
            .tasks
            .read()
            .unwrap()
            .iter()
            .find(|t| t.id == handle)
            .cloned()
            .ok_or(VmErr::NotFound)?;
        let mode = inner.ctx.current_ctx();
        let allowed = match mode {
            CtxMode::Ring3 => true,
            CtxMode::Ring0 => task.flags.contains(TaskFlags::RING0),
            CtxMode::RawMode => task.flags.contains(TaskFlags::RAW_MODE),
        };
        if !allowed {
            vm_error!(
                "vmtask: 任务 '{}' 未声明 {:?} 触发 (vm {})",
                task.name,
                mode,
                inner.vm_name
            );
            return Err(VmErr::InvalidContext);
        }
        if task.owner != owner {
            return Err(VmErr::NotOwner);
        }
        if !task.pending.swap(true, Ordering::AcqRel) {
            let mut st = inner.wake.lock().unwrap();
            st.signaled = true;
            inner.cv.notify_one();
        }
        Ok(())
    }

    /// 销毁一个任务（仅 ring-3）
    ///
    /// 摘表并等待在途回调结束；返回后回调保证不再运行。
    pub fn destroy(&self, owner: TaskOwner, handle: TaskHandle) -> Result<(), VmErr> {
        self.check_ring3()?;
        let task = {
            let mut tasks = self.inner.tasks.write().unwrap();
            let i = tasks
                .iter()
                .position(|t| t.id == handle)
                .ok_or(VmErr::NotFound)?;
            if tasks[i].owner != owner {
                return Err(VmErr::NotOwner);
            }
            tasks.remove(i)
        };
        self.retire(&task);
        Ok(())
    }

    /// 销毁一个拥有者的全部任务（仅 ring-3），返回销毁的个数
    pub fn destroy_all_by_owner(&self, owner: TaskOwner) -> Result<usize, VmErr> {
        self.check_ring3()?;
        let mut removed = Vec::new();
        self.inner.tasks.write().unwrap().retain(|t| {
            if t.owner == owner {
                removed.push(t.clone());
                false
            } else {
                true
            }
        });
        for task in &removed {
            self.retire(task);
        }
        Ok(removed.len())
    }

    /// 置 dead 后夺一次执行锁，与在途回调会师
    fn retire(&self, task: &Task) {
        task.dead.store(true, Ordering::Release);
        drop(task.exec_lock.lock().unwrap());
    }

    /// 关停 worker 并等待其退出；剩余的挂起触发被丢弃
    pub fn shutdown(&self) {
        {
            let mut st = self.inner.wake.lock().unwrap();
            st.shutdown = true;
            self.inner.cv.notify_all();
        }
        if let Some(h) = self.worker.lock().unwrap().take() {
            let _ = h.join();
        }
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// worker 主循环：扫描一轮挂起任务，没活就睡
fn worker_loop(inner: Arc<SetInner>) {
    loop {
        let snapshot: Vec<Arc<Task>> = inner.tasks.read().unwrap().clone();
        let mut ran = false;
        for task in snapshot {
            if !task.pending.load(Ordering::Acquire) {
                continue;
            }
            // 回调全程持执行锁，destroy 以夺锁与在途回调会师
            let _exec = task.exec_lock.lock().unwrap();
            if task.dead.load(Ordering::Acquire) {
                continue;
            }
            if task.pending.swap(false, Ordering::AcqRel) {
                (task.callback)();
                ran = true;
            }
        }
        if ran {
            continue;
        }
        let mut st = inner.wake.lock().unwrap();
        if st.shutdown {
            return;
        }
        if st.signaled {
            st.signaled = false;
            continue;
        }
        drop(inner.cv.wait(st).unwrap());
    }
}
