// vmtask 单元测试。受限上下文由 test-support 的 MockCtx 按线程模拟。

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use test_support::mock::MockCtx;

use crate::{OwnerKind, TaskSet};

fn device_set() -> TaskSet {
    TaskSet::new("test-vm", OwnerKind::Device, Arc::new(MockCtx))
}

/// 自动复位门闩：signal 放行一次 wait，用来在回调与测试线程之间
/// 定点会师
struct Gate {
    state: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Gate {
            state: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut s = self.state.lock().unwrap();
        *s = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let mut s = self.state.lock().unwrap();
        while !*s {
            s = self.cv.wait(s).unwrap();
        }
        *s = false;
    }

    fn wait_timeout(&self, dur: Duration) -> bool {
        let mut s = self.state.lock().unwrap();
        let deadline = std::time::Instant::now() + dur;
        while !*s {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            if left.is_zero() {
                return false;
            }
            let (g, _) = self.cv.wait_timeout(s, left).unwrap();
            s = g;
        }
        *s = false;
        true
    }
}

mod dispatch;
