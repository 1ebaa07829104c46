//! 内存管理核心
//!
//! RISC-V Sv39 教学内核的虚拟内存子系统：物理帧分配、三级页表、
//! 进程地址空间的生命周期，以及内核与用户地址空间之间的字节拷贝。
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`ArchMmOps`]: 物理地址到内核虚拟地址的转换、页表切换、TLB 刷新
//! - [`MmConfig`]: 物理内存布局（内核镜像边界、物理内存上界、设备寄存器区间）
//!
//! 使用前必须调用 [`register_arch_ops`] 和 [`register_config`] 注册实现，
//! 然后调用 [`init_frame_allocator`] 登记空闲物理内存。
//!
//! # 错误处理
//!
//! 资源耗尽与非法用户地址以 [`PagingError`] 返回；
//! 违反内核自身不变量的情况（重复映射、重复释放、销毁仍有叶子的页表等）直接 panic。

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod arch_ops;
mod config;

pub mod address;
pub mod frame_allocator;
pub mod memory_space;
pub mod page_table;
pub mod uaccess;

#[cfg(test)]
mod test_utils;

pub use arch_ops::{ArchMmOps, arch_ops, register_arch_ops};
pub use config::{
    ALLOC_FILL, FREE_FILL, MAX_VA, MmConfig, MmioRegion, PAGE_SIZE, TRAMPOLINE, mm_config,
    register_config,
};

// Re-export 常用类型
pub use address::{AlignOps, PageNum, Paddr, Ppn, PpnRange, UsizeConvert, Vaddr, Vpn, VpnRange};
pub use frame_allocator::{
    FrameAllocator, FrameTracker, FrameUse, init_frame_allocator, kernel_frames,
};
pub use memory_space::{MemorySpace, new_kernel_table};
pub use page_table::{PageTable, PageTableEntry, PagingError, PagingResult, PteFlags};
pub use uaccess::{ActiveMapping, COPY_STATS, CopyStats, DirectAccess, HardwareMapping, UserAccess};
