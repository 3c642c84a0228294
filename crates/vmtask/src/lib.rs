//! 延迟任务分发
//!
//! 受限上下文（ring-0/裸机模式）里发现的工作不能就地做完——那里
//! 不许挂起、不许碰会阻塞的锁。本 crate 提供的出路是：设备在 ring-3
//! 预先注册回调任务，受限上下文里只做一次 [`TaskSet::trigger`]（纯
//! 原子置位 + 唤醒，绝不阻塞），真正的执行由每个拥有者类别专属的
//! worker 线程在宿主用户态完成。
//!
//! 触发是合并式的：任务已挂起时再触发是无害 no-op，一次执行清掉
//! 此前累计的所有触发。销毁与在途回调经任务私有的执行锁同步，
//! `destroy` 返回后回调保证不再运行、也不在运行中。

mod owner;
mod set;
mod task;

pub use owner::{OwnerKind, TaskFlags, TaskOwner};
pub use set::TaskSet;
pub use task::TaskHandle;

#[cfg(test)]
mod tests;
