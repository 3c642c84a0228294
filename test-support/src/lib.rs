//! 测试支持 crate
//!
//! 提供 Mock 实现和测试工具

pub mod mock;
