//! 执行上下文的 Mock 实现
//!
//! 宿主用户态测试进程里所有线程天然处于 Ring3；busy 合同、
//! 触发许可等测试需要让某个线程**假装**处于 Ring0 或 RawMode。
//! [`MockCtx`] 按线程覆盖当前上下文来实现这一点。

use std::cell::Cell;

use vmcore::{CtxMode, CtxOps};

thread_local! {
    static CTX_OVERRIDE: Cell<CtxMode> = const { Cell::new(CtxMode::Ring3) };
}

/// Mock 上下文提供者：读取按线程设置的上下文覆盖，默认 Ring3
#[derive(Debug, Default)]
pub struct MockCtx;

impl CtxOps for MockCtx {
    fn current_ctx(&self) -> CtxMode {
        CTX_OVERRIDE.with(|c| c.get())
    }
}

/// 设置当前线程的执行上下文
pub fn set_thread_ctx(mode: CtxMode) {
    CTX_OVERRIDE.with(|c| c.set(mode));
}

/// 在指定执行上下文中运行闭包，结束后恢复先前的上下文
pub fn with_ctx<R>(mode: CtxMode, f: impl FnOnce() -> R) -> R {
    let prev = CTX_OVERRIDE.with(|c| c.replace(mode));
    let ret = f();
    CTX_OVERRIDE.with(|c| c.set(prev));
    ret
}
