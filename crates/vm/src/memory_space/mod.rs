//! 内存空间模块
//!
//! 进程用户地址空间的生命周期（创建、生长、收缩、复制、销毁），
//! 以及带共享映射的内核页表。
//!
//! 用户地址空间从虚拟地址 0 开始连续占用 `[0, size)`，
//! 其中每一页都由独立分配的物理帧支撑，权限为 `R|W|X|U`。

pub mod kernel;
mod space;

pub use kernel::new_kernel_table;
pub use space::MemorySpace;
