//! Mock 实现模块
//!
//! 提供架构与内存管理子系统的 Mock 实现，用于宿主机测试

pub mod arch;
pub mod mm;
