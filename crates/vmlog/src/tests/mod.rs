// vmlog 单元测试。
//
// 测试针对独立实例化的 Logger，避免依赖进程级单例的注册顺序。

use core::fmt;
use std::sync::{Arc, Mutex};

use crate::{LogLevel, LogSink, Logger};

/// 捕获型输出端
#[derive(Default)]
struct CaptureSink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl LogSink for CaptureSink {
    fn write(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        self.lines.lock().unwrap().push((level, args.to_string()));
    }
}

mod basic;
