//! Mock 实现

mod ctx;

pub use ctx::*;
