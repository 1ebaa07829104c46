//! 用户内存访问
//!
//! 在内核缓冲区与用户地址空间之间搬运字节。提供两条路径：
//!
//! - 翻译路径：[`PageTable`](crate::PageTable) 实现 [`UserAccess`]，逐页经由
//!   [`translate`](crate::PageTable::translate) 检查有效位与 U 位后访问物理帧
//! - 直接路径：[`DirectAccess`] 在用户页已镜像到当前内核页表的前提下，
//!   只对进程大小做边界检查，然后直接访问
//!
//! 两条路径对调用者的约定相同。拷贝都不是原子的：
//! 失败前已经写入的字节保持原样。

mod direct;
mod stats;
mod translated;

pub use direct::{ActiveMapping, DirectAccess, HardwareMapping};
pub use stats::{COPY_STATS, CopyStats};

use crate::page_table::PagingResult;

/// 内核与用户地址空间之间的字节拷贝
pub trait UserAccess {
    /// 把 `src` 写到用户地址 `dst_va`
    fn copy_out(&self, dst_va: usize, src: &[u8]) -> PagingResult<()>;

    /// 从用户地址 `src_va` 读取 `dst.len()` 字节
    fn copy_in(&self, dst: &mut [u8], src_va: usize) -> PagingResult<()>;

    /// 从用户地址 `src_va` 读取以 NUL 结尾的字符串，最多 `dst.len()` 字节（含 NUL）。
    ///
    /// 成功时 NUL 也被写入 `dst`，返回不含 NUL 的字符串长度。
    ///
    /// # Errors
    /// 上限内没有 NUL：[`PagingError::MissingTerminator`](crate::PagingError::MissingTerminator)
    fn copy_in_str(&self, dst: &mut [u8], src_va: usize) -> PagingResult<usize>;
}
