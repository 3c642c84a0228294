//! hvmm 核心基础类型
//!
//! 为同步原语 crate（critsect）与延迟任务 crate（vmtask）提供共享的
//! 基础类型：状态码、执行上下文抽象与线程标识。
//!
//! # 执行上下文
//!
//! 同一把逻辑锁必须在三种执行上下文下正确工作：
//!
//! - **Ring3**（宿主用户态）：可使用完整的阻塞 OS 原语
//! - **Ring0**（宿主内核）：不得挂起，竞争时立即返回调用方提供的 rcBusy
//! - **RawMode**（客户机执行上下文）：不得回调用户态
//!
//! 上下文来源通过 [`CtxOps`] trait 抽象，由 VM 作用域对象持有，
//! 测试中可注入 Mock 实现来模拟受限上下文。

mod ctx;
mod error;

pub use ctx::*;
pub use error::*;
