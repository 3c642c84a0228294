// critsect 单元测试。
//
// 测试进程天然运行在宿主用户态；受限上下文（Ring0/RawMode）由
// test-support 的 MockCtx 按线程模拟。

use std::sync::Arc;

use test_support::mock::MockCtx;

use crate::CritSectRegistry;

/// 以 MockCtx 建一个测试用登记表（未覆盖的线程默认 Ring3）
fn registry() -> CritSectRegistry {
    CritSectRegistry::new("test-vm", Arc::new(MockCtx))
}

mod rw;
