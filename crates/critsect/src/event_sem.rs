//! 自动复位事件信号量
//!
//! [`CritSect::schedule_exit_event`](crate::CritSect::schedule_exit_event)
//! 的载体：ring-0 等待者借它在锁释放的瞬间被唤醒，而不必忙轮询。
//! wait 成功即消费信号（自动复位，单等待者语义）。

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 自动复位事件信号量
pub struct EventSem {
    state: Mutex<bool>,
    cv: Condvar,
}

impl EventSem {
    /// 创建未触发的事件
    pub fn new() -> Self {
        EventSem {
            state: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// 触发事件，唤醒一个等待者
    pub fn signal(&self) {
        let mut signaled = self.state.lock().unwrap();
        *signaled = true;
        self.cv.notify_one();
    }

    /// 等待事件触发并消费信号
    pub fn wait(&self) {
        let mut signaled = self.state.lock().unwrap();
        while !*signaled {
            signaled = self.cv.wait(signaled).unwrap();
        }
        *signaled = false;
    }

    /// 限时等待；返回是否等到（等到即消费信号）
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut signaled = self.state.lock().unwrap();
        loop {
            if *signaled {
                *signaled = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self.cv.wait_timeout(signaled, deadline - now).unwrap();
            signaled = guard;
        }
    }
}

impl Default for EventSem {
    fn default() -> Self {
        Self::new()
    }
}
