//! hvmm 日志子系统
//!
//! 精简的级别过滤日志层：宏在格式化之前先做级别检查（**早期过滤**，
//! 被禁用级别的日志不产生任何格式化开销），输出交给注册一次的
//! [`LogSink`]；未注册 sink 时日志被直接丢弃。
//!
//! # 组件
//!
//! - [`LogLevel`] - 日志级别（Error 到 Debug）
//! - [`Logger`] - 封装级别阈值与 sink 槽的核心结构，可独立实例化用于测试
//! - [`vm_error!`]/[`vm_warn!`]/[`vm_info!`]/[`vm_debug!`] - 面向使用方的宏，
//!   走进程级的 [`GLOBAL_LOGGER`]

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

#[cfg(test)]
mod tests;

/// 日志级别，数值越大越啰嗦
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// 不变量被破坏等致命诊断
    Error = 0,
    /// 可疑但可继续的状况（锁序违规、强制释放）
    Warning = 1,
    /// 常规生命周期事件
    Info = 2,
    /// 调试细节
    Debug = 3,
}

/// 日志输出端
///
/// 由宿主程序实现并注册；实现不得回调本 crate 以外持锁的路径。
pub trait LogSink: Send + Sync {
    /// 输出一条已通过级别过滤的日志
    fn write(&self, level: LogLevel, args: fmt::Arguments<'_>);
}

/// 日志核心
///
/// 封装级别阈值与 sink 槽。可为测试目的独立实例化，
/// 生产环境中用作全局单例 [`GLOBAL_LOGGER`]。
pub struct Logger {
    level: AtomicU8,
    sink: OnceLock<Arc<dyn LogSink>>,
}

impl Logger {
    /// 创建新的 Logger 实例（const，可用于静态初始化）
    pub const fn new(level: LogLevel) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            sink: OnceLock::new(),
        }
    }

    /// 注册输出端，只能成功一次；重复注册返回 false
    pub fn set_sink(&self, sink: Arc<dyn LogSink>) -> bool {
        self.sink.set(sink).is_ok()
    }

    /// 调整级别阈值
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// 给定级别是否会被输出
    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// 分发一条日志（宏的后端；调用前应先查 [`Logger::enabled`]）
    pub fn dispatch(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if let Some(sink) = self.sink.get() {
            sink.write(level, args);
        }
    }
}

/// 进程级日志单例，默认级别 Warning
pub static GLOBAL_LOGGER: Logger = Logger::new(LogLevel::Warning);

/// 向 [`GLOBAL_LOGGER`] 注册输出端
pub fn register_sink(sink: Arc<dyn LogSink>) -> bool {
    GLOBAL_LOGGER.set_sink(sink)
}

/// 按级别输出日志（内部宏，供各级别宏委托）
#[macro_export]
macro_rules! vm_log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::GLOBAL_LOGGER.enabled($level) {
            $crate::GLOBAL_LOGGER.dispatch($level, core::format_args!($($arg)*));
        }
    };
}

/// Error 级别日志
#[macro_export]
macro_rules! vm_error {
    ($($arg:tt)*) => { $crate::vm_log!($crate::LogLevel::Error, $($arg)*) };
}

/// Warning 级别日志
#[macro_export]
macro_rules! vm_warn {
    ($($arg:tt)*) => { $crate::vm_log!($crate::LogLevel::Warning, $($arg)*) };
}

/// Info 级别日志
#[macro_export]
macro_rules! vm_info {
    ($($arg:tt)*) => { $crate::vm_log!($crate::LogLevel::Info, $($arg)*) };
}

/// Debug 级别日志
#[macro_export]
macro_rules! vm_debug {
    ($($arg:tt)*) => { $crate::vm_log!($crate::LogLevel::Debug, $($arg)*) };
}
