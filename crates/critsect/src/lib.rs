//! hvmm 跨上下文同步原语
//!
//! 向模拟设备与驱动提供保护共享 VM 状态的临界区原语。同一把逻辑锁
//! 在三种执行上下文下呈现同一 API：
//!
//! - **Ring3**（宿主用户态）：竞争时阻塞等待
//! - **Ring0**（宿主内核）：竞争时立即返回调用方提供的 rcBusy
//! - **RawMode**（客户机执行上下文）：同 Ring0
//!
//! 受限上下文下的 busy 返回不是错误，而是设计好的控制流信号：
//! 外层分发循环据此回到 ring-3 重新发起同一模拟操作。
//!
//! # 组件
//!
//! - [`CritSect`] - 可递归的排他临界区，带受限上下文快路径与
//!   exit-event 调度
//! - [`RwCritSect`] - 读写临界区，写者隐式持有读权
//! - [`CritSectRegistry`] - VM 作用域的临界区登记表，承载 LeaveAll
//!   与锁序校验器
//! - [`EventSem`] - 自动复位事件信号量（exit-event 的载体）

mod critsect;
mod critsect_rw;
mod event_sem;
mod lockval;
mod ownership;
mod registry;

pub use critsect::{CritSect, CritSectGuard};
pub use critsect_rw::RwCritSect;
pub use event_sem::EventSem;
pub use lockval::Violation;
pub use registry::CritSectRegistry;

#[cfg(test)]
mod tests;
